//! Image Specification - Strict Schema
//!
//! The YAML specification is parsed structurally: every field maps to a
//! named, typed slot and unknown fields are rejected at parse time.

use crate::condition::Condition;
use crate::error::{KeeperError, Result};
use crate::matrix::AxisMap;
use crate::propagate::PropagateTable;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeeperSpec {
    /// Tasks stay disabled until the forked specification is adapted.
    #[serde(default)]
    pub active: bool,
    pub docker_repo: String,
    pub base_url: String,
    /// Global build arguments; per-image arguments override them by key.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    /// Downstream repositories and their propagation strategies.
    #[serde(default)]
    pub propagate: PropagateTable,
    pub images: Vec<ImageSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageSpec {
    pub matrix: AxisMap,
    pub build: BuildSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub context: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub commit_api: Option<CommitApi>,
    /// Nightly-build images are added to the plan on `--nightly` runs.
    #[serde(default)]
    pub nightly: bool,
    pub tags: Vec<TagCandidate>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// `export NAME='value'` lines prepended to the post-deploy script.
    #[serde(default)]
    pub after_deploy_export: BTreeMap<String, String>,
    #[serde(default)]
    pub after_deploy: Option<AfterDeploy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagCandidate {
    pub tag: String,
    #[serde(rename = "if", default)]
    pub condition: Option<Condition>,
}

/// Upstream commit reference, resolved through a [`crate::remote::CommitFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitApi {
    pub fetcher: Fetcher,
    pub repo: String,
    pub branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fetcher {
    Github,
    Gitlab,
}

/// Post-deploy script: a single line, or a list of plain and conditional lines.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AfterDeploy {
    One(String),
    Many(Vec<ScriptLine>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptLine {
    Plain(String),
    Conditional(ScriptItem),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptItem {
    pub script: String,
    #[serde(rename = "if", default)]
    pub condition: Option<Condition>,
}

impl KeeperSpec {
    pub fn from_str(text: &str) -> Result<Self> {
        let spec: KeeperSpec = serde_yaml::from_str(text)?;
        if !spec.active {
            return Err(KeeperError::Invariant(
                "the specification is not active yet; review it, then set 'active: true'".into(),
            ));
        }
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("loading '{}'", path.display());
        Self::from_str(&fs::read_to_string(path)?)
    }
}

/// Fail on an absolute path and trim a leading `./`.
pub fn trim_relative_path(path: &str) -> Result<&str> {
    if path.starts_with('/') {
        Err(KeeperError::Invariant(format!(
            "expecting a relative path, but was given '{path}'"
        )))
    } else if let Some(trimmed) = path.strip_prefix("./") {
        Ok(trimmed)
    } else {
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
active: true
docker_repo: 'acme/images'
base_url: 'https://gitlab.com/acme/images'
images:
  - matrix:
      base: ['latest']
    build:
      context: './base'
      tags:
        - tag: 'latest'
"#;

    #[test]
    fn minimal_spec_parses() {
        let spec = KeeperSpec::from_str(MINIMAL).unwrap();
        assert_eq!(spec.docker_repo, "acme/images");
        assert_eq!(spec.images.len(), 1);
        assert!(spec.propagate.is_empty());
        assert!(spec.images[0].build.dockerfile.is_none());
    }

    #[test]
    fn inactive_spec_is_rejected() {
        let text = MINIMAL.replace("active: true", "active: false");
        assert!(matches!(
            KeeperSpec::from_str(&text),
            Err(KeeperError::Invariant(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = MINIMAL.replace("context: './base'", "context: './base'\n      ctx: 'x'");
        assert!(matches!(KeeperSpec::from_str(&text), Err(KeeperError::Yaml(_))));
    }

    #[test]
    fn after_deploy_forms() {
        let text = MINIMAL.replace(
            "      tags:\n        - tag: 'latest'\n",
            concat!(
                "      tags:\n        - tag: 'latest'\n",
                "      after_deploy:\n",
                "        - 'echo done'\n",
                "        - script: 'curl -fsS $HOOK'\n",
                "          if: '{matrix[base]} == \"latest\"'\n",
            ),
        );
        let spec = KeeperSpec::from_str(&text).unwrap();
        match spec.images[0].build.after_deploy.as_ref().unwrap() {
            AfterDeploy::Many(lines) => {
                assert_eq!(lines.len(), 2);
                assert!(matches!(lines[0], ScriptLine::Plain(_)));
                assert!(matches!(lines[1], ScriptLine::Conditional(_)));
            }
            AfterDeploy::One(_) => panic!("expected a list"),
        }
    }

    #[test]
    fn relative_paths() {
        assert_eq!(trim_relative_path(".").unwrap(), ".");
        assert_eq!(trim_relative_path("./foo/bar").unwrap(), "foo/bar");
        assert_eq!(trim_relative_path("bar/baz").unwrap(), "bar/baz");
        assert!(trim_relative_path("/etc").is_err());
    }
}
