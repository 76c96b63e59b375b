// src/exec/mod.rs

//! Execution layer.
//!
//! This module performs the builds, deploys and live updates that the
//! scheduler dispatches, and reports back to the orchestration runtime via
//! `RuntimeEvent`s.
//!
//! - [`backend`] provides the `ExecutorBackend` and `BuildExecutor` traits
//!   and the `RealExecutorBackend` the runtime uses in production; tests
//!   replace either seam with a fake.
//! - [`executor_loop`] owns the bounded worker loop.
//! - [`task_runner`] runs one update task with cancellation.
//! - [`shell`] is the `BuildExecutor` that shells out to `docker` and the
//!   configured deploy/delete commands.

pub mod backend;
pub mod executor_loop;
pub mod shell;
pub mod task_runner;

pub use backend::{BoxFuture, BuildExecutor, ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{spawn_executor, ExecutorRequest};
pub use shell::{ShellExecutor, BUILT_BY_LABEL, TAG_PREFIX};
