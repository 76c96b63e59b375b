// src/liveupdate/mod.rs

//! In-place container updates.
//!
//! - [`spec`] holds the validated, ordered step list attached to a build unit.
//! - [`engine`] decides, for a set of changed paths, whether those steps can
//!   express the change or a full rebuild is required.

pub mod engine;
pub mod spec;

pub use engine::{
    decide, FallbackReason, LiveUpdateDecision, LiveUpdatePlan, PlanBuilder, PlannedStep, SyncOp,
};
pub use spec::{LiveUpdateSpec, LiveUpdateStep, PathSet};
