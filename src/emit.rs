//! CI Config Emission
//!
//! Pure string templating of the GitLab CI YAML document from the chosen
//! build items. One deploy job is emitted per item; an empty plan yields a
//! no-op config.

use crate::plan::BuildItem;
use std::collections::BTreeMap;

const NOOP_CONFIG: &str = r#"---
# GitLab CI config automatically generated by imagekeeper; do not edit.
# yamllint disable rule:line-length rule:empty-lines

stages:
  - build

noop:
  stage: build
  image: alpine:latest
  variables:
    GIT_STRATEGY: none
  script:
    - echo "No image to rebuild."
  only:
    - master
"#;

/// `{"VAR1": "v1"} -> ["VAR1=v1"]`, in sorted key order.
fn equalize_args(args: &BTreeMap<String, String>) -> Vec<String> {
    args.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

fn first_shortest_tag(tags: &[String]) -> Option<&String> {
    tags.iter().min_by_key(|t| (t.len(), t.as_str()))
}

fn escape_single_quotes(script: &str) -> String {
    script.replace('\'', "'\\''")
}

fn indent_script(lines: &[String], indent_level: usize) -> String {
    let indent = " ".repeat(indent_level);
    lines.join(&format!("\n{indent}"))
}

fn quote_join(words: &[String]) -> String {
    format!("\"{}\"", words.join("\" \""))
}

/// Render the full CI YAML document for the chosen build items.
///
/// `keeper_subtree` is the in-repository directory holding the shell
/// helpers sourced by every deploy job.
pub fn generate_config(docker_repo: &str, items: &[BuildItem], keeper_subtree: &str) -> String {
    let mut jobs = String::new();
    let mut job_id = 0;
    for item in items {
        // Items whose tag conditions all failed cannot be pushed anywhere.
        let some_real_tag = match first_shortest_tag(&item.tags) {
            Some(tag) => tag,
            None => continue,
        };
        job_id += 1;
        let after_deploy = escape_single_quotes(&indent_script(&item.after_deploy_script, 6));
        jobs.push_str(&format!(
            r#"
deploy_{job_id}_{some_real_tag}:
  extends: .docker-deploy
  script: |
    /usr/bin/env bash -e -c '
      echo $0
      . "{keeper_subtree}/gitlab_functions.sh"
      dk_login
      dk_build "{context}" "{dockerfile}" "{one_tag}" {args}
      dk_push "{docker_repo}" "{one_tag}" {tags}
      dk_logout
      {after_deploy}' bash
"#,
            context = item.context,
            dockerfile = item.dockerfile,
            one_tag = format!("image_{job_id}"),
            args = quote_join(&equalize_args(&item.args)),
            tags = quote_join(&item.tags),
        ));
    }
    if jobs.is_empty() {
        return NOOP_CONFIG.to_string();
    }

    format!(
        r#"---
# GitLab CI config automatically generated by imagekeeper; do not edit.
# yamllint disable rule:line-length rule:empty-lines

stages:
  - deploy
  - remove

# Changes below (or jobs extending .docker-deploy) should be carefully
# reviewed to avoid leaks of HUB_TOKEN
.docker-deploy:
  stage: deploy
  only:
    - master
  variables:
    HUB_REPO: "{docker_repo}"
    # HUB_USER: # protected variable
    # HUB_TOKEN: # protected variable
    # FOO_TOKEN: # other, user-defined tokens for after_deploy_script
  image: docker:latest
  services:
    - docker:dind
  before_script:
    - cat /proc/cpuinfo /proc/meminfo
    - echo $0
    - apk add --no-cache bash
    - /usr/bin/env bash --version
    - apk add --no-cache curl
    - curl --version
    - pwd

{jobs}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_plan_is_a_noop() {
        let yaml = generate_config("acme/images", &[], "imagekeeper");
        assert!(yaml.contains("No image to rebuild."));
    }

    #[test]
    fn one_job_per_item() {
        let mut item = BuildItem::stub(&[("base", "latest")], &["latest", "dev"], &[]);
        item.args = [("BUILD_DATE".to_string(), "2020-01-01T00:00:00Z".to_string())]
            .into_iter()
            .collect();
        item.after_deploy_script = vec!["echo 'done'".to_string()];
        let yaml = generate_config("acme/images", &[item], "imagekeeper");
        assert!(yaml.contains("deploy_1_dev:"));
        assert!(yaml.contains(r#"dk_build "base" "Dockerfile" "image_1" "BUILD_DATE=2020-01-01T00:00:00Z""#));
        assert!(yaml.contains(r#"dk_push "acme/images" "image_1" "latest" "dev""#));
        // Single quotes in the post-deploy script are escaped for the
        // surrounding bash -c '...' wrapper.
        assert!(yaml.contains(r#"echo '\''done'\''"#));
        assert!(yaml.contains(r#"HUB_REPO: "acme/images""#));
    }

    #[test]
    fn tagless_items_are_skipped() {
        let item = BuildItem::stub(&[("base", "latest")], &[], &[]);
        let yaml = generate_config("acme/images", &[item], "imagekeeper");
        assert!(yaml.contains("No image to rebuild."));
    }
}
