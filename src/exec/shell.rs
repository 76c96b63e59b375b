// src/exec/shell.rs

//! Production [`BuildExecutor`] that shells out to `docker` and the
//! resource's own deploy/delete commands.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{BuildUnit, Resource, UpdateTask};
use crate::exec::backend::{BoxFuture, BuildExecutor};
use crate::liveupdate::{LiveUpdatePlan, PlannedStep, SyncOp};
use crate::types::BuildStrategy;

/// Label put on every image this tool builds; the pruner only touches these.
pub const BUILT_BY_LABEL: &str = "builtby=devorch";

/// Prefix of the tags this tool gives its images.
pub const TAG_PREFIX: &str = "devorch-";

/// How long `await_readiness` polls before giving up.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);

const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lines of stderr kept for error messages.
const STDERR_TAIL: usize = 20;

/// Runs builds with `docker build` (or the unit's custom command), deploys
/// with `deploy_cmd` and performs live updates through `docker exec`/`cp`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    upsert_timeout: Duration,
    readiness_timeout: Duration,
}

impl ShellExecutor {
    /// `upsert_timeout` bounds every deploy and delete command.
    pub fn new(upsert_timeout: Duration) -> Self {
        Self {
            upsert_timeout,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    async fn full_build(&self, task: &UpdateTask) -> Result<()> {
        let resource = &task.resource;
        let mut image_env = Vec::new();

        for unit in &task.units {
            let tag = image_tag(unit, task);
            match unit.strategy {
                BuildStrategy::Docker => {
                    info!(resource = %resource.name, unit = %unit.name, tag = %tag, "docker build");
                    let mut cmd = Command::new("docker");
                    cmd.arg("build")
                        .arg("-t")
                        .arg(&tag)
                        .arg("--label")
                        .arg(BUILT_BY_LABEL)
                        .arg(&unit.context)
                        .current_dir(&resource.workdir);
                    run_process(&format!("docker build of '{}'", unit.name), cmd).await?;
                }
                BuildStrategy::Custom => {
                    let Some(command) = unit.command.as_deref() else {
                        bail!("custom build unit '{}' has no command", unit.name);
                    };
                    info!(resource = %resource.name, unit = %unit.name, cmd = %command, "custom build");
                    let mut cmd = shell_command(command, &resource.workdir);
                    cmd.env("EXPECTED_REF", &tag);
                    run_process(&format!("build command of '{}'", unit.name), cmd).await?;
                }
                BuildStrategy::None => {
                    debug!(resource = %resource.name, unit = %unit.name, "nothing to build");
                    continue;
                }
            }
            image_env.push((image_env_var(&unit.name), tag));
        }

        let Some(deploy) = resource.deploy_cmd.as_deref() else {
            debug!(resource = %resource.name, "no deploy_cmd; build only");
            return Ok(());
        };

        let mut cmd = shell_command(deploy, &resource.workdir);
        cmd.envs(image_env);
        self.with_upsert_timeout(
            &format!("deploy of '{}'", resource.name),
            run_process(&format!("deploy_cmd of '{}'", resource.name), cmd),
        )
        .await
    }

    async fn live_update(&self, task: &UpdateTask, plans: &[LiveUpdatePlan]) -> Result<()> {
        let resource = &task.resource;
        let container = resource
            .container
            .as_deref()
            .ok_or_else(|| anyhow!("resource '{}' has no container for live update", resource.name))?;

        for plan in plans {
            debug!(resource = %resource.name, unit = plan.unit(), steps = plan.steps().len(), "applying live update");
            for step in plan.steps() {
                match step {
                    PlannedStep::Sync(op) => sync_file(container, op).await?,
                    PlannedStep::Run(run) => {
                        let mut cmd = Command::new("docker");
                        cmd.args(["exec", container, "sh", "-c", run]);
                        run_process(&format!("run step '{run}'"), cmd).await?;
                    }
                    PlannedStep::RestartContainer => {
                        let mut cmd = Command::new("docker");
                        cmd.args(["restart", container]);
                        run_process(&format!("restart of container '{container}'"), cmd).await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn delete(&self, resource: &Resource) -> Result<()> {
        let Some(delete) = resource.delete_cmd.as_deref() else {
            debug!(resource = %resource.name, "no delete_cmd; nothing to tear down");
            return Ok(());
        };

        let cmd = shell_command(delete, &resource.workdir);
        self.with_upsert_timeout(
            &format!("delete of '{}'", resource.name),
            run_process(&format!("delete_cmd of '{}'", resource.name), cmd),
        )
        .await
    }

    async fn readiness(&self, resource: &Resource) -> Result<()> {
        let Some(probe) = resource.readiness_cmd.as_deref() else {
            return Ok(());
        };

        let poll = async {
            loop {
                let cmd = shell_command(probe, &resource.workdir);
                match run_process("readiness_cmd", cmd).await {
                    Ok(()) => return,
                    Err(err) => debug!(resource = %resource.name, error = %format!("{err:#}"), "not ready yet"),
                }
                tokio::time::sleep(READINESS_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(self.readiness_timeout, poll)
            .await
            .map_err(|_| {
                anyhow!(
                    "'{}' not ready after {}s",
                    resource.name,
                    self.readiness_timeout.as_secs()
                )
            })
    }

    async fn with_upsert_timeout(
        &self,
        what: &str,
        fut: impl std::future::Future<Output = Result<()>>,
    ) -> Result<()> {
        // Dropping the future on timeout kills the child (kill_on_drop).
        tokio::time::timeout(self.upsert_timeout, fut)
            .await
            .map_err(|_| anyhow!("{what} timed out after {}s", self.upsert_timeout.as_secs()))?
    }
}

impl BuildExecutor for ShellExecutor {
    fn execute_full_build<'a>(&'a self, task: &'a UpdateTask) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.full_build(task))
    }

    fn execute_live_update<'a>(
        &'a self,
        task: &'a UpdateTask,
        plans: &'a [LiveUpdatePlan],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.live_update(task, plans))
    }

    fn execute_delete<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.delete(resource))
    }

    fn await_readiness<'a>(&'a self, resource: &'a Resource) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.readiness(resource))
    }
}

/// `<unit>:devorch-<build time>-<task id>`.
fn image_tag(unit: &BuildUnit, task: &UpdateTask) -> String {
    format!(
        "{}:{TAG_PREFIX}{}-{}",
        unit.name.to_lowercase(),
        task.created_at.format("%Y%m%d%H%M%S"),
        task.id.0
    )
}

/// `DEVORCH_IMAGE_<UNIT>`, handed to `deploy_cmd`.
fn image_env_var(unit: &str) -> String {
    let suffix: String = unit
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("DEVORCH_IMAGE_{suffix}")
}

/// Copy one file into the container, or remove it there if it is gone locally.
async fn sync_file(container: &str, op: &SyncOp) -> Result<()> {
    let remote = op.remote.to_string_lossy();

    if !op.local.exists() {
        debug!(container, remote = %remote, "local file removed; deleting in container");
        let mut cmd = Command::new("docker");
        cmd.args(["exec", container, "rm", "-rf"]).arg(&op.remote);
        return run_process(&format!("removal of '{remote}'"), cmd).await;
    }

    if let Some(parent) = op.remote.parent() {
        let mut mkdir = Command::new("docker");
        mkdir.args(["exec", container, "mkdir", "-p"]).arg(parent);
        run_process(&format!("mkdir of '{}'", parent.display()), mkdir).await?;
    }

    let mut cp = Command::new("docker");
    cp.arg("cp")
        .arg(&op.local)
        .arg(format!("{container}:{remote}"));
    run_process(&format!("copy of '{}'", op.local.display()), cp).await
}

/// Build a shell command appropriate for the platform.
fn shell_command(script: &str, workdir: &Path) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    };
    cmd.current_dir(workdir);
    cmd
}

/// Run `cmd` to completion, logging its output.
///
/// A non-zero exit becomes an error carrying the exit code and the tail of
/// stderr.
async fn run_process(label: &str, mut cmd: Command) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().with_context(|| format!("spawning {label}"))?;

    if let Some(stdout) = child.stdout.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(process = %label, "stdout: {}", line);
            }
        });
    }

    // Always consume stderr so buffers don't fill.
    let stderr_task = child.stderr.take().map(|stderr| {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(process = %label, "stderr: {}", line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
    });

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for {label}"))?;

    if status.success() {
        return Ok(());
    }

    let tail = match stderr_task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => VecDeque::new(),
    };
    let code = status
        .code()
        .map_or_else(|| "signal".to_string(), |c| c.to_string());

    if tail.is_empty() {
        bail!("{label} failed (exit code {code})");
    }
    bail!(
        "{label} failed (exit code {code}): {}",
        Vec::from(tail).join("\n")
    )
}
