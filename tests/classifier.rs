// tests/classifier.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, ImageBuilder, ResourceBuilder};

use std::path::PathBuf;

use devorch::config::ConfigFile;
use devorch::watch::{ChangeClassifier, ChangeEvent, IgnoreRules, OnlyRules};

fn events(paths: &[&str]) -> Vec<ChangeEvent> {
    paths
        .iter()
        .enumerate()
        .map(|(seq, p)| ChangeEvent {
            path: PathBuf::from(p),
            seq: seq as u64,
        })
        .collect()
}

/// api builds image `api` from /project/api; docs watches /project/docs.
fn project() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_image("api", ImageBuilder::new("api").ignore("*.log").build())
        .with_resource("api", ResourceBuilder::new().image("api").build())
        .with_resource(
            "docs",
            ResourceBuilder::new().watch("docs").ignore("drafts/").build(),
        )
        .with_config_input("extra.toml")
        .build()
}

#[test]
fn ignored_log_file_does_not_affect_but_source_does() {
    let classifier = ChangeClassifier::new(&project());

    let out = classifier.classify(&events(&["/project/api/app.log"]));
    assert!(out.changes.is_empty());
    assert_eq!(out.dropped, 1);

    let out = classifier.classify(&events(&["/project/api/app.go"]));
    let api = out.changes.get("api").expect("api affected");
    assert_eq!(
        api.unit_paths["api"].iter().collect::<Vec<_>>(),
        [&PathBuf::from("/project/api/app.go")]
    );
    assert!(api.watch_paths.is_empty());
}

#[test]
fn paths_outside_every_root_are_dropped() {
    let classifier = ChangeClassifier::new(&project());
    let out = classifier.classify(&events(&["/project/README.md", "/elsewhere/x.go"]));
    assert!(out.is_empty());
    assert_eq!(out.dropped, 2);
}

#[test]
fn resource_watch_paths_are_classified_separately() {
    let classifier = ChangeClassifier::new(&project());
    let out = classifier.classify(&events(&[
        "/project/docs/index.md",
        "/project/docs/drafts/wip.md",
    ]));

    let docs = out.changes.get("docs").expect("docs affected");
    assert!(docs.unit_paths.is_empty());
    assert_eq!(
        docs.watch_paths.iter().collect::<Vec<_>>(),
        [&PathBuf::from("/project/docs/index.md")]
    );
}

#[test]
fn config_change_requires_reload_and_short_circuits_the_batch() {
    let classifier = ChangeClassifier::new(&project());

    let out = classifier.classify(&events(&["/project/api/main.go", "/project/Devorch.toml"]));
    assert!(out.reload_required);
    assert!(out.changes.is_empty());

    let out = classifier.classify(&events(&["/project/extra.toml"]));
    assert!(out.reload_required);
}

#[test]
fn sequence_numbers_span_the_batch() {
    let classifier = ChangeClassifier::new(&project());
    let out = classifier.classify(&[
        ChangeEvent {
            path: PathBuf::from("/project/api/a.go"),
            seq: 7,
        },
        ChangeEvent {
            path: PathBuf::from("/project/api/b.go"),
            seq: 9,
        },
    ]);

    let api = &out.changes["api"];
    assert_eq!(api.first_seq, Some(7));
    assert_eq!(api.last_seq, Some(9));
}

#[test]
fn shared_unit_change_reaches_every_user() {
    let cfg = ConfigFileBuilder::new()
        .with_image("base", ImageBuilder::new("base").build())
        .with_resource("api", ResourceBuilder::new().image("base").build())
        .with_resource("worker", ResourceBuilder::new().image("base").build())
        .build();

    let out = ChangeClassifier::new(&cfg).classify(&events(&["/project/base/lib.rs"]));
    assert_eq!(out.changes.keys().collect::<Vec<_>>(), ["api", "worker"]);
}

#[test]
fn only_list_intersects_with_ignore() {
    let cfg = ConfigFileBuilder::new()
        .with_image(
            "web",
            ImageBuilder::new("web")
                .only("src/")
                .ignore("src/**/*.test.js")
                .build(),
        )
        .with_resource("web", ResourceBuilder::new().image("web").build())
        .build();
    let classifier = ChangeClassifier::new(&cfg);

    assert!(classifier
        .classify(&events(&["/project/web/src/app.js"]))
        .changes
        .contains_key("web"));
    assert!(classifier
        .classify(&events(&["/project/web/package.json"]))
        .changes
        .is_empty());
    assert!(classifier
        .classify(&events(&["/project/web/src/lib/app.test.js"]))
        .changes
        .is_empty());
}

#[test]
fn ignore_rules_follow_dockerignore_semantics() {
    let rules = IgnoreRules::compile(&[
        "*.log".to_string(),
        "build".to_string(),
        "**/*.tmp".to_string(),
        "!keep.log".to_string(),
    ])
    .unwrap();

    assert!(rules.is_ignored(&PathBuf::from("app.log")));
    assert!(!rules.is_ignored(&PathBuf::from("keep.log")));
    assert!(!rules.is_ignored(&PathBuf::from("app.go")));
    assert!(rules.is_ignored(&PathBuf::from("build/out.bin")));
    assert!(rules.is_ignored(&PathBuf::from("deep/nested/x.tmp")));
    // `*` does not cross directory boundaries.
    assert!(!rules.is_ignored(&PathBuf::from("logs/app.log")));
}

#[test]
fn invalid_patterns_are_skipped_leniently() {
    let rules = IgnoreRules::compile_lenient("api", &["[".to_string(), "*.log".to_string()]);
    assert!(rules.is_ignored(&PathBuf::from("x.log")));

    let only = OnlyRules::compile_lenient("api", &["[".to_string()]);
    assert!(only.admits(&PathBuf::from("anything.go")));
}
