// tests/scheduler.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, ImageBuilder, ResourceBuilder};
use crate::common::{changes_for, unit_change};

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;

use devorch::dag::{
    choose_action, ChangeSet, Resource, ResourceGraph, Scheduler, TaskAction, TaskId, UpdateTask,
    READINESS_FAILED,
};
use devorch::engine::TaskOutcome;
use devorch::types::{ResourceStatus, UpdateStrategy};

fn scheduler_for(cfg: devorch::config::ConfigFile) -> Scheduler {
    let max = cfg.config.max_parallel_updates;
    Scheduler::new(cfg.graph().clone(), max)
}

fn complete(s: &mut Scheduler, task: &UpdateTask, outcome: TaskOutcome) -> devorch::dag::SchedulerStep {
    s.handle_completion(task.resource_name(), task.id, outcome)
}

#[test]
fn concurrency_bound_keeps_the_third_resource_queued() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("a", ResourceBuilder::new().build())
            .with_resource("b", ResourceBuilder::new().build())
            .with_resource("c", ResourceBuilder::new().build())
            .max_parallel(2)
            .build(),
    );

    let step = s.start(&[]);
    assert_eq!(step.dispatched_names(), ["a", "b"]);
    assert_eq!(s.queued(), ["c"]);
    assert!(!step.became_idle);

    let a = step.dispatched[0].clone();
    let step = complete(&mut s, &a, TaskOutcome::Success);
    assert_eq!(step.newly_ready, ["a"]);
    assert_eq!(step.dispatched_names(), ["c"]);
    assert_eq!(s.building(), ["b", "c"]);
}

#[test]
fn dependents_wait_for_their_dependencies() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("api", ResourceBuilder::new().dep("db").build())
            .with_resource("db", ResourceBuilder::new().build())
            .build(),
    );

    let step = s.start(&[]);
    assert_eq!(step.dispatched_names(), ["db"]);
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Queued));

    let db = step.dispatched[0].clone();
    let step = complete(&mut s, &db, TaskOutcome::Success);
    assert_eq!(step.dispatched_names(), ["api"]);
    assert_eq!(step.dispatched[0].strategy(), UpdateStrategy::FullBuild);
}

#[test]
fn failed_dependency_blocks_dependents_until_retriggered() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("db", ResourceBuilder::new().build())
            .with_resource("api", ResourceBuilder::new().dep("db").build())
            .build(),
    );

    let db = s.start(&[]).dispatched[0].clone();
    let step = complete(&mut s, &db, TaskOutcome::Failed("exit status 1".into()));

    assert_eq!(step.newly_failed, ["db"]);
    assert!(step.dispatched.is_empty());
    assert!(step.became_idle);
    assert!(s.is_idle());
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Queued));
    assert_eq!(
        s.state_of("db").unwrap().last_error.as_deref(),
        Some("exit status 1")
    );

    let step = s.handle_trigger("db");
    assert_eq!(step.dispatched_names(), ["db"]);

    let db = step.dispatched[0].clone();
    let step = complete(&mut s, &db, TaskOutcome::Success);
    assert_eq!(step.dispatched_names(), ["api"]);
    assert!(s.state_of("db").unwrap().last_error.is_none());
}

#[test]
fn manual_resource_collects_changes_until_triggered() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_image("tool", ImageBuilder::new("tool").build())
            .with_resource(
                "tool",
                ResourceBuilder::new()
                    .image("tool")
                    .manual()
                    .auto_init(false)
                    .build(),
            )
            .build(),
    );

    assert!(s.start(&[]).dispatched.is_empty());
    assert_eq!(s.status_of("tool"), Some(ResourceStatus::Pending));

    let step = s.handle_changes(changes_for(
        "tool",
        unit_change("tool", &["/project/tool/main.rs"]),
    ));
    assert!(step.dispatched.is_empty());
    assert_eq!(s.status_of("tool"), Some(ResourceStatus::Pending));

    let step = s.handle_trigger("tool");
    assert_eq!(step.dispatched_names(), ["tool"]);
    assert_eq!(
        step.dispatched[0].changes.all_paths().len(),
        1,
        "pending changes travel with the triggered task"
    );
}

#[test]
fn startup_trigger_queues_a_manual_resource() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("seed", ResourceBuilder::new().manual().auto_init(false).build())
            .build(),
    );
    let step = s.start(&["seed".to_string(), "nope".to_string()]);
    assert_eq!(step.dispatched_names(), ["seed"]);
}

#[test]
fn stale_and_unknown_completions_are_ignored() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("api", ResourceBuilder::new().build())
            .build(),
    );
    let task = s.start(&[]).dispatched[0].clone();

    let step = s.handle_completion("api", TaskId(task.id.0 + 100), TaskOutcome::Success);
    assert!(step.newly_ready.is_empty());
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Building));

    let step = s.handle_completion("ghost", task.id, TaskOutcome::Success);
    assert!(step.newly_ready.is_empty());

    complete(&mut s, &task, TaskOutcome::Success);
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Ready));
    assert_eq!(s.completed_builds(), 1);
}

#[test]
fn changes_during_a_build_are_coalesced_into_one_rerun() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_image("db", ImageBuilder::new("db").build())
            .with_resource("db", ResourceBuilder::new().image("db").build())
            .build(),
    );
    let first = s.start(&[]).dispatched[0].clone();

    for file in ["/project/db/a.sql", "/project/db/b.sql"] {
        let step = s.handle_changes(changes_for("db", unit_change("db", &[file])));
        assert!(step.dispatched.is_empty());
    }
    assert_eq!(s.snapshot().resource("db").unwrap().pending_changes, 2);

    let step = complete(&mut s, &first, TaskOutcome::Success);
    assert_eq!(step.dispatched_names(), ["db"]);

    let rerun = &step.dispatched[0];
    assert!(rerun.id > first.id);
    assert_eq!(rerun.changes.all_paths().len(), 2);
    // No live update configured for the unit.
    assert_eq!(rerun.strategy(), UpdateStrategy::FullBuild);
}

fn web_config() -> devorch::config::ConfigFile {
    ConfigFileBuilder::new()
        .with_image(
            "web",
            ImageBuilder::new("web")
                .fall_back_on(&["package.json"])
                .sync("src", "/app/src")
                .build(),
        )
        .with_resource("web", ResourceBuilder::new().image("web").build())
        .build()
}

#[test]
fn live_update_requires_a_previous_successful_deploy() {
    let mut s = scheduler_for(web_config());
    let first = s.start(&[]).dispatched[0].clone();
    assert_eq!(first.strategy(), UpdateStrategy::FullBuild);

    // Fails before ever deploying: the next change still needs a full build.
    complete(&mut s, &first, TaskOutcome::Failed("boom".into()));
    let step = s.handle_changes(changes_for(
        "web",
        unit_change("web", &["/project/web/src/app.js"]),
    ));
    assert_eq!(step.dispatched[0].strategy(), UpdateStrategy::FullBuild);

    let second = step.dispatched[0].clone();
    complete(&mut s, &second, TaskOutcome::Success);

    let step = s.handle_changes(changes_for(
        "web",
        unit_change("web", &["/project/web/src/app.js"]),
    ));
    let task = &step.dispatched[0];
    assert_eq!(task.strategy(), UpdateStrategy::LiveUpdate);
    match &task.action {
        TaskAction::LiveUpdate(plans) => {
            assert_eq!(plans.len(), 1);
            assert_eq!(
                plans[0].sync_ops().next().unwrap().remote,
                std::path::PathBuf::from("/app/src/app.js")
            );
        }
        other => panic!("expected live update, got {other:?}"),
    }
}

#[test]
fn unsyncable_change_falls_back_to_a_full_build() {
    let cfg = web_config();
    let units = cfg.graph().units_of("web");

    let fallback = choose_action(
        &units,
        &unit_change("web", &["/project/web/package.json"]),
        true,
    );
    assert_eq!(fallback.strategy(), UpdateStrategy::LiveUpdateFallback);
    assert!(fallback.is_full_build());

    let outside = choose_action(
        &units,
        &unit_change("web", &["/project/web/Dockerfile"]),
        true,
    );
    assert_eq!(outside.strategy(), UpdateStrategy::LiveUpdateFallback);

    assert_eq!(
        choose_action(&units, &ChangeSet::config_reload(), true),
        TaskAction::FullBuild
    );
    assert_eq!(
        choose_action(&units, &unit_change("web", &["/project/web/src/a.js"]), false),
        TaskAction::FullBuild
    );

    let mut watched = unit_change("web", &["/project/web/src/a.js"]);
    watched.add_watch_path("/project/k8s/web.yaml".into(), 3);
    assert_eq!(choose_action(&units, &watched, true), TaskAction::FullBuild);
}

#[test]
fn readiness_wait_gates_dependents_on_the_workload() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("db", ResourceBuilder::new().wait_for_readiness().build())
            .with_resource("api", ResourceBuilder::new().dep("db").build())
            .build(),
    );

    let db = s.start(&[]).dispatched[0].clone();
    let step = complete(&mut s, &db, TaskOutcome::Success);
    assert!(step.dispatched.is_empty());
    assert!(!s.is_idle(), "api is still waiting for db's workload");
    assert!(!step.became_idle);

    let step = s.handle_readiness("db", true);
    assert_eq!(step.dispatched_names(), ["api"]);
}

#[test]
fn readiness_timeout_leaves_dependents_blocked_and_the_scheduler_idle() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("db", ResourceBuilder::new().wait_for_readiness().build())
            .with_resource("api", ResourceBuilder::new().dep("db").build())
            .build(),
    );

    let db = s.start(&[]).dispatched[0].clone();
    complete(&mut s, &db, TaskOutcome::Success);
    assert!(s.snapshot().is_busy());

    let step = s.handle_readiness("db", false);
    assert!(step.dispatched.is_empty());
    assert!(step.became_idle);
    assert!(s.is_idle());
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Queued));
    assert_eq!(s.blocked(), ["api"]);
    assert_eq!(
        s.state_of("db").unwrap().last_error.as_deref(),
        Some(READINESS_FAILED)
    );

    let snap = s.snapshot();
    assert_eq!(snap.blocked, ["api"]);
    assert!(!snap.is_busy());

    // A fresh deploy of db waits for readiness again and then releases api.
    let db = s.handle_trigger("db").dispatched[0].clone();
    complete(&mut s, &db, TaskOutcome::Success);
    assert!(!s.is_idle());
    assert!(s.blocked().is_empty());

    let step = s.handle_readiness("db", true);
    assert_eq!(step.dispatched_names(), ["api"]);
    assert!(s.state_of("db").unwrap().last_error.is_none());
}

fn watch_change(path: &str) -> ChangeSet {
    let mut cs = ChangeSet::default();
    cs.add_watch_path(path.into(), 0);
    cs
}

/// db <- api, both deployed once.
fn deployed_chain() -> Scheduler {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("db", ResourceBuilder::new().build())
            .with_resource("api", ResourceBuilder::new().dep("db").build())
            .build(),
    );
    let db = s.start(&[]).dispatched[0].clone();
    let api = complete(&mut s, &db, TaskOutcome::Success).dispatched[0].clone();
    complete(&mut s, &api, TaskOutcome::Success);
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Ready));
    s
}

#[test]
fn dependent_stays_queued_while_its_dependency_rebuilds() {
    let mut s = deployed_chain();

    let mut batch = BTreeMap::new();
    batch.insert("db".to_string(), watch_change("/project/db/schema.sql"));
    batch.insert("api".to_string(), watch_change("/project/api/main.go"));

    let step = s.handle_changes(batch);
    assert_eq!(step.dispatched_names(), ["db"]);
    assert_eq!(s.building(), ["db"]);
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Queued));

    let db = step.dispatched[0].clone();
    let step = complete(&mut s, &db, TaskOutcome::Success);
    assert_eq!(step.dispatched_names(), ["api"]);
}

#[test]
fn dependency_rebuild_does_not_requeue_ready_dependents() {
    let mut s = deployed_chain();

    let step = s.handle_changes(changes_for("db", watch_change("/project/db/schema.sql")));
    assert_eq!(step.dispatched_names(), ["db"]);
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Ready));

    let db = step.dispatched[0].clone();
    let step = complete(&mut s, &db, TaskOutcome::Success);
    assert_eq!(step.newly_ready, ["db"]);
    assert!(step.dispatched.is_empty());
    assert_eq!(s.status_of("api"), Some(ResourceStatus::Ready));
    assert_eq!(s.state_of("api").unwrap().build_count, 1);
}

#[test]
fn reload_holds_dispatch_then_swaps_the_graph() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("api", ResourceBuilder::new().build())
            .with_resource("worker", ResourceBuilder::new().build())
            .build(),
    );
    for task in s.start(&[]).dispatched {
        complete(&mut s, &task, TaskOutcome::Success);
    }
    assert!(s.is_idle());

    s.begin_reload();
    assert!(s.reload_pending());
    assert!(!s.is_idle());
    assert!(s.handle_trigger("api").dispatched.is_empty());

    let next = ConfigFileBuilder::new()
        .with_resource("api", ResourceBuilder::new().build())
        .with_resource("cache", ResourceBuilder::new().build())
        .max_parallel(4)
        .build();
    let replacement = s.replace_graph(next.graph().clone(), 4);

    let removed: Vec<&str> = replacement.removed.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(removed, ["worker"]);
    assert_eq!(replacement.step.dispatched_names(), ["api", "cache"]);
    assert!(replacement.step.dispatched[0].changes.config_changed);
    assert_eq!(s.max_parallel(), 4);
    assert!(!s.reload_pending());
    assert!(s.status_of("worker").is_none());
    // api kept its history across the reload.
    assert_eq!(s.state_of("api").unwrap().build_count, 1);
}

#[test]
fn failed_reload_keeps_the_old_graph() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("api", ResourceBuilder::new().auto_init(false).build())
            .build(),
    );
    s.start(&[]);
    s.begin_reload();
    s.handle_trigger("api");

    let step = s.reload_failed("bad toml".into());
    assert_eq!(step.dispatched_names(), ["api"]);
    assert_eq!(s.snapshot().config_error.as_deref(), Some("bad toml"));
}

#[test]
fn snapshot_reports_progress() {
    let mut s = scheduler_for(
        ConfigFileBuilder::new()
            .with_image("api", ImageBuilder::new("api").build())
            .with_resource("api", ResourceBuilder::new().image("api").build())
            .build(),
    );
    let task = s.start(&[]).dispatched[0].clone();

    let snap = s.snapshot();
    assert!(snap.is_busy());
    assert_eq!(snap.building, ["api"]);
    assert!(snap.has_docker_build);

    complete(&mut s, &task, TaskOutcome::Success);
    let snap = s.snapshot();
    assert!(!snap.is_busy());
    assert_eq!(snap.completed_builds, 1);

    let view = snap.resource("api").unwrap();
    assert_eq!(view.status, ResourceStatus::Ready);
    assert_eq!(view.last_strategy, Some(UpdateStrategy::FullBuild));
    assert!(view.last_success.is_some());

    let json = snap.to_json().unwrap();
    assert!(json.contains("\"status\": \"ready\""));
}

#[test]
fn teardown_order_is_reverse_topological() {
    let s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("web", ResourceBuilder::new().dep("api").build())
            .with_resource("api", ResourceBuilder::new().dep("db").build())
            .with_resource("db", ResourceBuilder::new().build())
            .build(),
    );
    let names: Vec<String> = s.teardown_order().iter().map(|r| r.name.clone()).collect();
    assert_eq!(names, ["web", "api", "db"]);
}

// Random DAGs, random failures, random completion order: the scheduler never
// exceeds its bound, never starts a resource before its dependencies are
// ready, and always settles.
proptest! {
    #[test]
    fn scheduler_settles_without_violating_order(
        deps in proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), 1..10),
        failing in proptest::collection::hash_set(0usize..10, 0..3),
        max_parallel in 1usize..4,
        pick in proptest::collection::vec(any::<usize>(), 64),
    ) {
        let resources: Vec<Resource> = deps
            .iter()
            .enumerate()
            .map(|(i, ds)| {
                let mut r = Resource::new(format!("r{i}"));
                if i > 0 {
                    let mut ds: Vec<usize> = ds.iter().map(|d| d % i).collect();
                    ds.sort_unstable();
                    ds.dedup();
                    r.deps = ds.into_iter().map(|d| format!("r{d}")).collect();
                }
                r
            })
            .collect();
        let graph = ResourceGraph::load(resources, vec![]).unwrap();
        let mut s = Scheduler::new(graph.clone(), max_parallel);

        let mut in_flight: VecDeque<UpdateTask> = s.start(&[]).dispatched.into();
        let mut started = HashSet::new();
        let mut picks = pick.iter().cycle();

        for task in &in_flight {
            started.insert(task.resource_name().to_string());
        }

        let mut rounds = 0;
        while !in_flight.is_empty() {
            let idx = picks.next().unwrap() % in_flight.len();
            rounds += 1;
            prop_assert!(rounds <= 100, "scheduler did not settle");
            prop_assert!(in_flight.len() <= max_parallel);

            let task = in_flight.remove(idx).unwrap();
            let n: usize = task.resource_name()[1..].parse().unwrap();
            let outcome = if failing.contains(&n) {
                TaskOutcome::Failed("fail".into())
            } else {
                TaskOutcome::Success
            };

            let step = s.handle_completion(task.resource_name(), task.id, outcome);
            for next in step.dispatched {
                for dep in graph.dependencies_of(next.resource_name()) {
                    prop_assert_eq!(s.status_of(dep), Some(ResourceStatus::Ready));
                }
                prop_assert!(started.insert(next.resource_name().to_string()), "started twice");
                in_flight.push_back(next);
            }
        }

        prop_assert!(s.is_idle());
        for name in graph.topo_order() {
            let status = s.status_of(name).unwrap();
            prop_assert!(
                status.is_terminal() || status == ResourceStatus::Queued,
                "{} left in {}", name, status
            );
        }
    }
}

#[test]
fn teardown_hands_out_the_graph_resources() {
    let s = scheduler_for(
        ConfigFileBuilder::new()
            .with_resource("api", ResourceBuilder::new().build())
            .build(),
    );
    let a = s.graph().get("api").unwrap();
    let b = &s.teardown_order()[0];
    assert!(Arc::ptr_eq(a, b));
}
