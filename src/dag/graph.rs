// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::dag::resource::{BuildUnit, Resource, ResourceName};
use crate::errors::{DevorchError, Result};

/// Immutable, validated resource graph.
///
/// Edges point from a dependent to its dependencies. Resources keep their
/// declaration order, which is the tie-break for [`ResourceGraph::topo_order`].
/// A new graph is built on every configuration load and swapped in whole.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: IndexMap<ResourceName, Arc<Resource>>,
    units: IndexMap<String, Arc<BuildUnit>>,
    dependents: HashMap<ResourceName, Vec<ResourceName>>,
    topo: Vec<ResourceName>,
    topo_index: HashMap<ResourceName, usize>,
}

impl ResourceGraph {
    /// Validate and index the given resources and build units.
    ///
    /// Fails on duplicate names, unknown dependencies or build units, and
    /// dependency cycles. Nothing is mutated on failure, so a caller holding a
    /// previous graph keeps it.
    pub fn load(resources: Vec<Resource>, build_units: Vec<BuildUnit>) -> Result<Self> {
        let mut units: IndexMap<String, Arc<BuildUnit>> = IndexMap::new();
        for unit in build_units {
            if units.contains_key(&unit.name) {
                return Err(DevorchError::DuplicateBuildUnit(unit.name));
            }
            units.insert(unit.name.clone(), Arc::new(unit));
        }

        let mut by_name: IndexMap<ResourceName, Arc<Resource>> = IndexMap::new();
        for res in resources {
            if by_name.contains_key(&res.name) {
                return Err(DevorchError::DuplicateResource(res.name));
            }
            by_name.insert(res.name.clone(), Arc::new(res));
        }

        for res in by_name.values() {
            for dep in &res.deps {
                if !by_name.contains_key(dep) {
                    return Err(DevorchError::UnknownDependency {
                        resource: res.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for unit in &res.build_units {
                if !units.contains_key(unit) {
                    return Err(DevorchError::ConfigError(format!(
                        "resource '{}' references unknown image '{}'",
                        res.name, unit
                    )));
                }
            }
        }

        check_acyclic(&by_name)?;

        let mut dependents: HashMap<ResourceName, Vec<ResourceName>> = by_name
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        for res in by_name.values() {
            for dep in &res.deps {
                if let Some(list) = dependents.get_mut(dep) {
                    if !list.contains(&res.name) {
                        list.push(res.name.clone());
                    }
                }
            }
        }

        let topo = stable_topo_order(&by_name);
        let topo_index = topo
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        Ok(Self {
            resources: by_name,
            units,
            dependents,
            topo,
            topo_index,
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.values()
    }

    pub fn build_unit(&self, name: &str) -> Option<&Arc<BuildUnit>> {
        self.units.get(name)
    }

    pub fn build_units(&self) -> impl Iterator<Item = &Arc<BuildUnit>> {
        self.units.values()
    }

    /// Build units deployed by `resource`, in the resource's declared order.
    pub fn units_of(&self, resource: &str) -> Vec<Arc<BuildUnit>> {
        self.get(resource)
            .map(|res| {
                res.build_units
                    .iter()
                    .filter_map(|u| self.units.get(u).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of resources that deploy build unit `unit`.
    pub fn resources_using_unit<'a>(&'a self, unit: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.resources
            .values()
            .filter(move |r| r.build_units.iter().any(|u| u == unit))
            .map(|r| r.name.as_str())
    }

    /// Immediate dependencies of a resource.
    pub fn dependencies_of(&self, name: &str) -> &[ResourceName] {
        self.resources
            .get(name)
            .map(|r| r.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a resource.
    pub fn dependents_of(&self, name: &str) -> &[ResourceName] {
        self.dependents
            .get(name)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// Every resource that depends on `name`, directly or transitively, in
    /// topological order.
    pub fn transitive_dependents(&self, name: &str) -> Vec<ResourceName> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);

        while let Some(current) = queue.pop_front() {
            for dep in self.dependents_of(current) {
                if seen.insert(dep.as_str()) {
                    queue.push_back(dep.as_str());
                }
            }
        }

        self.topo
            .iter()
            .filter(|n| seen.contains(n.as_str()))
            .cloned()
            .collect()
    }

    /// Dependencies before dependents; ties broken by declaration order.
    pub fn topo_order(&self) -> &[ResourceName] {
        &self.topo
    }

    pub fn topo_index(&self, name: &str) -> Option<usize> {
        self.topo_index.get(name).copied()
    }
}

fn check_acyclic(resources: &IndexMap<ResourceName, Arc<Resource>>) -> Result<()> {
    // Edge direction for petgraph: dep -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in resources.keys() {
        graph.add_node(name.as_str());
    }
    for res in resources.values() {
        for dep in &res.deps {
            graph.add_edge(dep.as_str(), res.name.as_str(), ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    // Report the cycle through the earliest-declared resource that is on one.
    let on_cycle: HashSet<&str> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .collect();

    let start = resources
        .keys()
        .map(|k| k.as_str())
        .find(|k| on_cycle.contains(k))
        .unwrap_or_default();

    Err(DevorchError::CyclicDependency {
        cycle: cycle_through(start, &on_cycle, resources),
    })
}

/// Walk dependency edges from `start` (restricted to `members`) back to
/// `start`, returning e.g. `[A, B, A]`.
fn cycle_through(
    start: &str,
    members: &HashSet<&str>,
    resources: &IndexMap<ResourceName, Arc<Resource>>,
) -> Vec<String> {
    let deps_of = |name: &str| -> Vec<String> {
        resources
            .get(name)
            .map(|r| r.deps.clone())
            .unwrap_or_default()
    };

    let mut parent: HashMap<String, String> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([start.to_string()]);

    while let Some(current) = queue.pop_front() {
        for dep in deps_of(&current) {
            if dep == start {
                let mut back = Vec::new();
                let mut node = current.clone();
                while node != start {
                    let prev = parent.get(&node).cloned().unwrap_or_else(|| start.to_string());
                    back.push(node);
                    node = prev;
                }
                let mut cycle = vec![start.to_string()];
                cycle.extend(back.into_iter().rev());
                cycle.push(start.to_string());
                return cycle;
            }
            if members.contains(dep.as_str()) && seen.insert(dep.clone()) {
                parent.insert(dep.clone(), current.clone());
                queue.push_back(dep);
            }
        }
    }

    vec![start.to_string()]
}

/// Kahn's algorithm, always releasing the earliest-declared ready resource.
fn stable_topo_order(resources: &IndexMap<ResourceName, Arc<Resource>>) -> Vec<ResourceName> {
    let mut remaining: Vec<usize> = resources.values().map(|r| r.deps.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];

    for (idx, res) in resources.values().enumerate() {
        for dep in &res.deps {
            if let Some(dep_idx) = resources.get_index_of(dep) {
                dependents[dep_idx].push(idx);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(idx, _)| Reverse(idx))
        .collect();

    let mut order = Vec::with_capacity(resources.len());
    while let Some(Reverse(idx)) = ready.pop() {
        if let Some((name, _)) = resources.get_index(idx) {
            order.push(name.clone());
        }
        for &child in &dependents[idx] {
            remaining[child] -= 1;
            if remaining[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    order
}
