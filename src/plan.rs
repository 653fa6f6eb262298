//! Build Plan Compiler
//!
//! Turns one image specification into concrete build items: the matrix is
//! expanded, then per assignment the conditional tag candidates, merged
//! build arguments, keywords and the post-deploy script are evaluated.
//! Compilation always ends with the global tag-uniqueness check.

use crate::condition::eval_condition;
use crate::error::{KeeperError, Result};
use crate::matrix::{assignment_value, expand_matrix, MatrixAssignment};
use crate::pattern::{expand, Bindings, Value};
use crate::remote::CommitFetcher;
use crate::spec::{trim_relative_path, AfterDeploy, BuildSection, KeeperSpec, ScriptLine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One fully resolved build variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildItem {
    pub context: String,
    pub dockerfile: String,
    /// `context/dockerfile`, the repository-relative Dockerfile path.
    pub path: String,
    pub matrix: MatrixAssignment,
    pub tags: Vec<String>,
    pub args: BTreeMap<String, String>,
    pub keywords: Vec<String>,
    pub after_deploy_script: Vec<String>,
    #[serde(default)]
    pub nightly: bool,
}

#[cfg(test)]
impl BuildItem {
    pub(crate) fn stub(matrix: &[(&str, &str)], tags: &[&str], keywords: &[&str]) -> Self {
        BuildItem {
            context: "base".into(),
            dockerfile: "Dockerfile".into(),
            path: "base/Dockerfile".into(),
            matrix: matrix
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            args: BTreeMap::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            after_deploy_script: Vec::new(),
            nightly: false,
        }
    }
}

/// ISO-8601 UTC timestamp for the defaults bundle.
pub fn utc_build_date() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Compiles a specification into its full build-item list.
pub struct PlanCompiler<'a> {
    fetcher: &'a dyn CommitFetcher,
    build_date: String,
}

impl<'a> PlanCompiler<'a> {
    pub fn new(fetcher: &'a dyn CommitFetcher, build_date: String) -> Self {
        Self {
            fetcher,
            build_date,
        }
    }

    /// Compile every image and enforce global tag uniqueness.
    pub fn compile(&self, spec: &KeeperSpec) -> Result<Vec<BuildItem>> {
        let mut items = Vec::new();
        for image in &spec.images {
            self.compile_image(&spec.args, &image.build, &image.matrix, &mut items)?;
        }
        check_tags(&items)?;
        Ok(items)
    }

    fn compile_image(
        &self,
        global_args: &BTreeMap<String, String>,
        build: &BuildSection,
        matrix: &crate::matrix::AxisMap,
        items: &mut Vec<BuildItem>,
    ) -> Result<()> {
        let context = trim_relative_path(&build.context)?.to_string();
        let dockerfile = match &build.dockerfile {
            Some(name) => trim_relative_path(name)?.to_string(),
            None => "Dockerfile".to_string(),
        };
        let path = format!("{context}/{dockerfile}");

        let mut defaults: BTreeMap<String, Value> = BTreeMap::new();
        defaults.insert("build_date".into(), Value::str(&self.build_date));
        if let Some(api) = &build.commit_api {
            defaults.insert("commit".into(), Value::str(self.fetcher.commit(api)?));
        }
        let defaults = Value::Map(defaults);

        let mut merged_args = global_args.clone();
        for (key, value) in &build.args {
            merged_args.insert(key.clone(), value.clone());
        }

        for assignment in expand_matrix(matrix)? {
            let bindings = Bindings::new()
                .bind("matrix", assignment_value(&assignment))
                .bind("defaults", defaults.clone());

            let mut tags = Vec::new();
            for candidate in &build.tags {
                // A false condition skips the tag synonym.
                if eval_condition(candidate.condition.as_ref(), &bindings)? {
                    tags.push(expand(&candidate.tag, &bindings)?);
                }
            }

            let mut args = BTreeMap::new();
            for (key, template) in &merged_args {
                args.insert(key.clone(), expand(template, &bindings)?);
            }

            let mut keywords = Vec::new();
            for template in &build.keywords {
                keywords.push(expand(template, &bindings)?);
            }

            let after_deploy_script = self.compile_script(build, &bindings)?;

            items.push(BuildItem {
                context: context.clone(),
                dockerfile: dockerfile.clone(),
                path: path.clone(),
                matrix: assignment,
                tags,
                args,
                keywords,
                after_deploy_script,
                nightly: build.nightly,
            });
        }
        Ok(())
    }

    fn compile_script(&self, build: &BuildSection, bindings: &Bindings) -> Result<Vec<String>> {
        let mut script = Vec::new();
        for (name, template) in &build.after_deploy_export {
            // The expanded value is final: no `{}` interpolation is
            // re-applied to the generated export line.
            script.push(format!("export {}='{}'", name, expand(template, bindings)?));
        }
        let lines: Vec<&ScriptLine> = match &build.after_deploy {
            None => Vec::new(),
            Some(AfterDeploy::One(line)) => {
                script.push(line.clone());
                Vec::new()
            }
            Some(AfterDeploy::Many(lines)) => lines.iter().collect(),
        };
        for line in lines {
            match line {
                // Verbatim, so `${BASH_VARIABLE}` never hits the template
                // parser.
                ScriptLine::Plain(text) => script.push(text.clone()),
                ScriptLine::Conditional(item) => {
                    if eval_condition(item.condition.as_ref(), bindings)? {
                        script.push(expand(&item.script, bindings)?);
                    }
                }
            }
        }
        Ok(script)
    }
}

/// Concatenated tags of every item, after checking global uniqueness.
pub fn check_tags(items: &[BuildItem]) -> Result<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    let mut all = Vec::new();
    for item in items {
        for tag in &item.tags {
            if !seen.insert(tag.clone()) {
                duplicates.insert(tag.clone());
            }
            all.push(tag.clone());
        }
    }
    if !duplicates.is_empty() {
        let listed: Vec<String> = duplicates.into_iter().collect();
        return Err(KeeperError::Invariant(format!(
            "duplicate tags in build plan: {}",
            listed.join(", ")
        )));
    }
    Ok(all)
}

fn meet<'t>(a: &'t [String], b: &[String]) -> Vec<&'t String> {
    a.iter().filter(|e| b.contains(e)).collect()
}

fn is_subset(a: &[String], b: &[String]) -> bool {
    a.iter().all(|e| b.contains(e))
}

/// Items having at least one tag absent from the remote repository.
pub fn minimal_rebuild(items: &[BuildItem], remote_tags: &[String]) -> Vec<BuildItem> {
    items
        .iter()
        .filter(|item| !is_subset(&item.tags, remote_tags))
        .cloned()
        .collect()
}

/// Remote tags no longer produced by the plan, in remote order.
pub fn tags_to_remove(all_tags: &[String], remote_tags: &[String]) -> Vec<String> {
    remote_tags
        .iter()
        .filter(|tag| !all_tags.contains(tag))
        .cloned()
        .collect()
}

/// Append to `base` the items of `extra` that are not already present.
pub fn merge_items(base: &[BuildItem], extra: &[BuildItem]) -> Vec<BuildItem> {
    let mut merged = base.to_vec();
    for item in extra {
        if !base.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

pub fn nightly_only(items: &[BuildItem]) -> Vec<BuildItem> {
    items.iter().filter(|i| i.nightly).cloned().collect()
}

pub fn by_files(items: &[BuildItem], dockerfiles: &[String]) -> Vec<BuildItem> {
    items
        .iter()
        .filter(|i| dockerfiles.contains(&i.path))
        .cloned()
        .collect()
}

pub fn by_tags(items: &[BuildItem], tags: &[String]) -> Vec<BuildItem> {
    items
        .iter()
        .filter(|i| !meet(&i.tags, tags).is_empty())
        .cloned()
        .collect()
}

pub fn by_keywords(items: &[BuildItem], keywords: &[String]) -> Vec<BuildItem> {
    items
        .iter()
        .filter(|i| !meet(&i.keywords, keywords).is_empty())
        .cloned()
        .collect()
}

pub fn by_keyword(items: &[BuildItem], keyword: &str) -> Vec<BuildItem> {
    items
        .iter()
        .filter(|i| i.keywords.iter().any(|k| k == keyword))
        .cloned()
        .collect()
}
