#![allow(dead_code)]

pub use devorch_test_utils::{builders, fake_executor, init_tracing, with_timeout};

use std::collections::BTreeMap;
use std::path::PathBuf;

use devorch::dag::{ChangeSet, ResourceName};

/// Change set for `paths` under build unit `unit`.
pub fn unit_change(unit: &str, paths: &[&str]) -> ChangeSet {
    let mut cs = ChangeSet::default();
    for (seq, p) in paths.iter().enumerate() {
        cs.add_unit_path(unit, PathBuf::from(p), seq as u64);
    }
    cs
}

/// Change map with a single resource entry.
pub fn changes_for(resource: &str, cs: ChangeSet) -> BTreeMap<ResourceName, ChangeSet> {
    let mut map = BTreeMap::new();
    map.insert(resource.to_string(), cs);
    map
}
