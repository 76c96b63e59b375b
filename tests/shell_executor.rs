// tests/shell_executor.rs

#![cfg(unix)]

mod common;
use crate::common::builders::{ConfigFileBuilder, ImageBuilder, ResourceBuilder};
use crate::common::{init_tracing, with_timeout};

use std::fs;
use std::path::Path;
use std::time::Duration;

use devorch::config::ConfigFile;
use devorch::dag::{Resource, Scheduler, UpdateTask};
use devorch::exec::{BuildExecutor, ShellExecutor, TAG_PREFIX};

fn first_task(cfg: &ConfigFile) -> UpdateTask {
    let mut scheduler = Scheduler::new(cfg.graph().clone(), 1);
    scheduler.start(&[]).dispatched.remove(0)
}

fn config_in(dir: &Path, resource: ResourceBuilder) -> ConfigFile {
    ConfigFileBuilder::new()
        .at(dir.join("Devorch.toml"))
        .with_image(
            "tools",
            ImageBuilder::new(".")
                .custom("echo \"$EXPECTED_REF\" > built.txt")
                .build(),
        )
        .with_resource("api", resource.image("tools").build())
        .build()
}

#[tokio::test]
async fn custom_build_hands_its_tag_to_the_deploy_command() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(
        dir.path(),
        ResourceBuilder::new().deploy("echo \"$DEVORCH_IMAGE_TOOLS\" > deployed.txt"),
    );

    let executor = ShellExecutor::new(Duration::from_secs(10));
    with_timeout(executor.execute_full_build(&first_task(&cfg)))
        .await
        .unwrap();

    let built = fs::read_to_string(dir.path().join("built.txt")).unwrap();
    let deployed = fs::read_to_string(dir.path().join("deployed.txt")).unwrap();
    assert!(built.starts_with(&format!("tools:{TAG_PREFIX}")), "{built}");
    assert_eq!(built, deployed);
}

#[tokio::test]
async fn failing_deploy_reports_exit_code_and_stderr() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(
        dir.path(),
        ResourceBuilder::new().deploy("echo 'quota exceeded' >&2; exit 3"),
    );

    let executor = ShellExecutor::new(Duration::from_secs(10));
    let err = with_timeout(executor.execute_full_build(&first_task(&cfg)))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("deploy_cmd of 'api'"), "{err}");
    assert!(err.contains("exit code 3"), "{err}");
    assert!(err.contains("quota exceeded"), "{err}");
}

#[tokio::test]
async fn slow_deploy_hits_the_upsert_timeout() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config_in(dir.path(), ResourceBuilder::new().deploy("sleep 5"));

    let executor = ShellExecutor::new(Duration::from_millis(200));
    let err = with_timeout(executor.execute_full_build(&first_task(&cfg)))
        .await
        .unwrap_err()
        .to_string();

    assert!(err.contains("timed out"), "{err}");
}

#[tokio::test]
async fn delete_without_a_command_is_a_no_op() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut resource = Resource::new("api");
    resource.workdir = dir.path().to_path_buf();

    let executor = ShellExecutor::new(Duration::from_secs(1));
    with_timeout(executor.execute_delete(&resource)).await.unwrap();

    resource.delete_cmd = Some("touch deleted".into());
    with_timeout(executor.execute_delete(&resource)).await.unwrap();
    assert!(dir.path().join("deleted").exists());
}

#[tokio::test]
async fn readiness_probe_gives_up_after_its_timeout() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut resource = Resource::new("db");
    resource.workdir = dir.path().to_path_buf();
    resource.readiness_cmd = Some("test -f ready".into());

    let executor = ShellExecutor::new(Duration::from_secs(1))
        .with_readiness_timeout(Duration::from_millis(300));
    let err = with_timeout(executor.await_readiness(&resource))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'db' not ready"), "{err}");

    fs::write(dir.path().join("ready"), "").unwrap();
    with_timeout(executor.await_readiness(&resource)).await.unwrap();
}
