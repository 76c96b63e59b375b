// tests/graph.rs

use std::collections::HashMap;

use proptest::prelude::*;

use devorch::dag::{BuildUnit, Resource, ResourceGraph};
use devorch::errors::DevorchError;

fn res(name: &str, deps: &[&str]) -> Resource {
    let mut r = Resource::new(name);
    r.deps = deps.iter().map(|d| d.to_string()).collect();
    r
}

#[test]
fn topo_order_puts_dependencies_first_and_keeps_declaration_order() {
    // web -> api -> db, worker -> db, docs independent.
    let graph = ResourceGraph::load(
        vec![
            res("web", &["api"]),
            res("docs", &[]),
            res("api", &["db"]),
            res("worker", &["db"]),
            res("db", &[]),
        ],
        vec![],
    )
    .unwrap();

    assert_eq!(graph.topo_order(), ["docs", "db", "api", "web", "worker"]);
    assert_eq!(graph.dependencies_of("web"), ["api"]);
    assert_eq!(graph.dependents_of("db"), ["api", "worker"]);
    assert_eq!(graph.transitive_dependents("db"), ["api", "web", "worker"]);
    assert!(graph.transitive_dependents("docs").is_empty());
}

#[test]
fn two_node_cycle_is_reported_with_its_path() {
    let err = ResourceGraph::load(vec![res("A", &["B"]), res("B", &["A"])], vec![]).unwrap_err();

    match err {
        DevorchError::CyclicDependency { cycle } => assert_eq!(cycle, ["A", "B", "A"]),
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
}

#[test]
fn cycle_error_message_lists_the_cycle() {
    let err = ResourceGraph::load(
        vec![res("a", &["c"]), res("b", &["a"]), res("c", &["b"]), res("d", &[])],
        vec![],
    )
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Cycle detected in resource graph: a -> c -> b -> a"
    );
}

#[test]
fn duplicate_resource_is_rejected() {
    let err = ResourceGraph::load(vec![res("api", &[]), res("api", &[])], vec![]).unwrap_err();
    assert!(matches!(err, DevorchError::DuplicateResource(name) if name == "api"));
}

#[test]
fn duplicate_build_unit_is_rejected() {
    let err = ResourceGraph::load(
        vec![res("api", &[])],
        vec![BuildUnit::new("img", "/ctx"), BuildUnit::new("img", "/other")],
    )
    .unwrap_err();
    assert!(matches!(err, DevorchError::DuplicateBuildUnit(name) if name == "img"));
}

#[test]
fn unknown_dependency_is_rejected() {
    let err = ResourceGraph::load(vec![res("api", &["db"])], vec![]).unwrap_err();
    match err {
        DevorchError::UnknownDependency {
            resource,
            dependency,
        } => {
            assert_eq!(resource, "api");
            assert_eq!(dependency, "db");
        }
        other => panic!("expected UnknownDependency, got {other:?}"),
    }
}

#[test]
fn shared_build_unit_maps_to_every_user() {
    let mut api = res("api", &[]);
    api.build_units = vec!["base".into()];
    let mut worker = res("worker", &[]);
    worker.build_units = vec!["base".into()];

    let graph =
        ResourceGraph::load(vec![api, worker], vec![BuildUnit::new("base", "/src")]).unwrap();

    let users: Vec<&str> = graph.resources_using_unit("base").collect();
    assert_eq!(users, ["api", "worker"]);
    assert_eq!(graph.units_of("api").len(), 1);
}

// Acyclic graphs: resource i may only depend on resources declared before it.
fn dag_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n).prop_map(
            |raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let mut deps: Vec<usize> =
                            if i == 0 { vec![] } else { deps.into_iter().map(|d| d % i).collect() };
                        deps.sort_unstable();
                        deps.dedup();
                        deps
                    })
                    .collect()
            },
        )
    })
}

proptest! {
    #[test]
    fn topo_order_is_a_permutation_respecting_every_edge(deps in dag_strategy(12)) {
        // Declare in reverse so the order has to be computed, not copied.
        let resources: Vec<Resource> = deps
            .iter()
            .enumerate()
            .rev()
            .map(|(i, ds)| {
                let names: Vec<String> = ds.iter().map(|d| format!("r{d}")).collect();
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                res(&format!("r{i}"), &refs)
            })
            .collect();

        let graph = ResourceGraph::load(resources, vec![]).unwrap();
        let order = graph.topo_order();
        prop_assert_eq!(order.len(), deps.len());

        let pos: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
        prop_assert_eq!(pos.len(), deps.len());

        for (i, ds) in deps.iter().enumerate() {
            for d in ds {
                let dependent = format!("r{i}");
                let dependency = format!("r{d}");
                prop_assert!(pos[dependency.as_str()] < pos[dependent.as_str()]);
            }
        }
    }
}
