//! Contract Invariant Tests
//!
//! End-to-end guarantees of the evaluation core: conditional tags, the
//! defaults bundle, global tag uniqueness, deterministic compilation and
//! propagation resolution.

use std::collections::BTreeMap;

use imagekeeper_core::{
    artifacts::ArtifactWriter,
    error::KeeperError,
    plan::{self, PlanCompiler},
    propagate::{self, ManualOverride, Mode, Triggers},
    remote::StaticCommits,
    spec::KeeperSpec,
};

const SPEC: &str = r#"
active: true
docker_repo: 'acme/coq'
base_url: 'https://gitlab.com/acme/coq'
args:
  BUILD_DATE: '{defaults[build_date]}'
images:
  - matrix:
      base: ['latest', '4.09.0-flambda']
      coq: ['dev']
    build:
      context: './coq'
      commit_api:
        fetcher: github
        repo: 'coq/coq'
        branch: 'master'
      nightly: true
      args:
        VCS_REF: '{defaults[commit][0:7]}'
      tags:
        - tag: '{matrix[coq]}-{matrix[base]}'
        - tag: 'latest'
          if: '{matrix[base]} == "latest"'
      keywords:
        - '{matrix[coq]}'
      after_deploy_export:
        COQ_VERSION: '{matrix[coq]}'
      after_deploy:
        - 'echo "${COQ_VERSION}"'
        - script: 'curl -fsS https://example.org/hook'
          if: '{matrix[base]} == "latest"'
propagate:
  mathcomp:
    strategy:
      - when: 'rebuild-all'
        mode: 'rebuild-all'
      - when: 'nightly'
        mode: 'nightly'
      - when: 'exists'
        expr: '{keywords}'
        subset: 'dev'
        mode: 'rebuild-keyword'
        item: '{keywords}'
      - mode: 'minimal'
  contribs:
    strategy:
      - when: 'forall'
        expr: '{matrix[coq]}'
        subset: 'dev,8.13'
        mode: 'nightly'
      - mode: 'none'
"#;

fn fetcher() -> StaticCommits {
    StaticCommits::new().with("coq/coq", "master", "cafebabedeadbeef")
}

fn compile(spec_text: &str) -> Vec<imagekeeper_core::BuildItem> {
    let spec = KeeperSpec::from_str(spec_text).unwrap();
    let commits = fetcher();
    PlanCompiler::new(&commits, "2020-01-01T00:00:00Z".to_string())
        .compile(&spec)
        .unwrap()
}

#[test]
fn conditional_tag_applies_to_one_combination_only() {
    let items = compile(SPEC);
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].matrix["base"], "latest");
    assert_eq!(items[0].tags, ["dev-latest", "latest"]);
    assert_eq!(items[1].matrix["base"], "4.09.0-flambda");
    assert_eq!(items[1].tags, ["dev-4.09.0-flambda"]);
}

#[test]
fn defaults_bundle_feeds_args() {
    let items = compile(SPEC);
    for item in &items {
        assert_eq!(item.args["BUILD_DATE"], "2020-01-01T00:00:00Z");
        assert_eq!(item.args["VCS_REF"], "cafebab");
    }
}

#[test]
fn post_deploy_script_ordering() {
    let items = compile(SPEC);
    assert_eq!(
        items[0].after_deploy_script,
        [
            "export COQ_VERSION='dev'",
            "echo \"${COQ_VERSION}\"",
            "curl -fsS https://example.org/hook",
        ]
    );
    // The conditioned line is dropped on the other combination.
    assert_eq!(
        items[1].after_deploy_script,
        ["export COQ_VERSION='dev'", "echo \"${COQ_VERSION}\""]
    );
}

#[test]
fn compilation_is_deterministic() {
    let a = serde_json::to_string(&compile(SPEC)).unwrap();
    let b = serde_json::to_string(&compile(SPEC)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn duplicate_tags_across_images_are_fatal() {
    let clashing = SPEC.replace(
        "        - tag: '{matrix[coq]}-{matrix[base]}'\n",
        "        - tag: '{matrix[coq]}-{matrix[base]}'\n        - tag: 'dev-{matrix[base]}'\n",
    );
    let spec = KeeperSpec::from_str(&clashing).unwrap();
    let commits = fetcher();
    let err = PlanCompiler::new(&commits, "2020-01-01T00:00:00Z".to_string())
        .compile(&spec)
        .unwrap_err();
    match err {
        KeeperError::Invariant(message) => assert!(message.contains("dev-latest")),
        other => panic!("expected an invariant error, got: {other}"),
    }
}

#[test]
fn automatic_propagation_and_idempotence() {
    let spec = KeeperSpec::from_str(SPEC).unwrap();
    let strategies = spec.propagate.compile().unwrap();
    let items = compile(SPEC);
    let overrides = BTreeMap::new();

    let resolved =
        propagate::resolve(&strategies, &items, Triggers::default(), &overrides).unwrap();
    // mathcomp: the exists rule matches ({keywords} = "dev" is a subset);
    // contribs: the forall rule matches, mode nightly.
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0].target, "mathcomp");
    assert_eq!(resolved[0].mode, Mode::RebuildKeyword);
    assert_eq!(resolved[0].keywords, ["dev"]);
    assert_eq!(resolved[1].target, "contribs");
    assert_eq!(resolved[1].mode, Mode::Nightly);

    let again = propagate::resolve(&strategies, &items, Triggers::default(), &overrides).unwrap();
    assert_eq!(resolved, again);
}

#[test]
fn trigger_rules_shadow_quantifiers() {
    let spec = KeeperSpec::from_str(SPEC).unwrap();
    let strategies = spec.propagate.compile().unwrap();
    let items = compile(SPEC);
    let overrides = BTreeMap::new();

    let nightly = Triggers {
        nightly: true,
        rebuild_all: false,
    };
    let resolved = propagate::resolve(&strategies, &items, nightly, &overrides).unwrap();
    assert_eq!(resolved[0].mode, Mode::Nightly);

    let rebuild_all = Triggers {
        nightly: false,
        rebuild_all: true,
    };
    let resolved = propagate::resolve(&strategies, &items, rebuild_all, &overrides).unwrap();
    assert_eq!(resolved[0].mode, Mode::RebuildAll);
}

#[test]
fn forall_exists_duality_on_homogeneous_items() {
    let narrowed = SPEC.replace("subset: 'dev,8.13'", "subset: '8.13'");
    let spec = KeeperSpec::from_str(&narrowed).unwrap();
    let strategies = spec.propagate.compile().unwrap();
    let items = compile(&narrowed);
    let overrides = BTreeMap::new();

    // Homogeneous items: when the forall test fails, an exists rule with the
    // same expr/subset fails too, so contribs falls through to 'none' and is
    // omitted.
    let resolved =
        propagate::resolve(&strategies, &items, Triggers::default(), &overrides).unwrap();
    assert!(resolved.iter().all(|entry| entry.target != "contribs"));
}

#[test]
fn manual_override_switches_the_run_to_manual_only() {
    let spec = KeeperSpec::from_str(SPEC).unwrap();
    let strategies = spec.propagate.compile().unwrap();
    let items = compile(SPEC);

    let mut overrides = BTreeMap::new();
    overrides.insert(
        "mathcomp".to_string(),
        ManualOverride {
            mode: Mode::Minimal,
            keywords: Vec::new(),
        },
    );
    let resolved =
        propagate::resolve(&strategies, &items, Triggers::default(), &overrides).unwrap();
    // contribs has automatic rules that would match, but the run is
    // manual-only: it is omitted, not resolved.
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].target, "mathcomp");
    assert_eq!(resolved[0].mode, Mode::Minimal);
}

#[test]
fn override_mode_none_is_omitted() {
    let spec = KeeperSpec::from_str(SPEC).unwrap();
    let strategies = spec.propagate.compile().unwrap();
    let items = compile(SPEC);

    let mut overrides = BTreeMap::new();
    overrides.insert(
        "contribs".to_string(),
        ManualOverride {
            mode: Mode::None,
            keywords: Vec::new(),
        },
    );
    let resolved =
        propagate::resolve(&strategies, &items, Triggers::default(), &overrides).unwrap();
    assert!(resolved.is_empty());
}

#[test]
fn override_for_unknown_target_is_fatal() {
    let spec = KeeperSpec::from_str(SPEC).unwrap();
    let strategies = spec.propagate.compile().unwrap();
    let items = compile(SPEC);

    let mut overrides = BTreeMap::new();
    overrides.insert(
        "nonexistent".to_string(),
        ManualOverride {
            mode: Mode::Minimal,
            keywords: Vec::new(),
        },
    );
    let err = propagate::resolve(&strategies, &items, Triggers::default(), &overrides).unwrap_err();
    assert!(err.to_string().contains("nonexistent"));
}

#[test]
fn selection_minimal_and_nightly() {
    let items = compile(SPEC);
    let remote = vec!["dev-latest".to_string(), "latest".to_string()];
    let min = plan::minimal_rebuild(&items, &remote);
    assert_eq!(min.len(), 1);
    assert_eq!(min[0].tags, ["dev-4.09.0-flambda"]);

    // Nightly selection adds nightly-flagged items without duplication.
    let nightly = plan::merge_items(&min, &plan::nightly_only(&items));
    assert_eq!(nightly.len(), 2);
}

#[test]
fn artifacts_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::new(dir.path());
    let items = compile(SPEC);

    writer.write_build_data_chosen(&items).unwrap();
    writer.write_remote_tags(&["latest".to_string()]).unwrap();
    writer.write_dockerfiles(&items).unwrap();

    let read_back = writer.read_build_data_chosen().unwrap();
    assert_eq!(read_back, items);

    let tags = std::fs::read_to_string(dir.path().join("remote_tags.txt")).unwrap();
    assert_eq!(tags, "latest\n");
    let dockerfiles = std::fs::read_to_string(dir.path().join("Dockerfiles.txt")).unwrap();
    assert_eq!(dockerfiles, "coq/Dockerfile\n");
}
