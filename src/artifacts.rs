//! Artifact Writers
//!
//! Everything the CI pipeline consumes downstream is materialized under the
//! output directory: build-data JSON files, tag lists, the resolved
//! propagation table and the templated README.

use crate::error::Result;
use crate::plan::BuildItem;
use crate::propagate::ResolvedPropagation;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

const JSON_INDENT: &str = "  ";
const README_MARKER: &str = "<!-- tags -->";

pub struct ArtifactWriter {
    out_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    fn target(&self, basename: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir)?;
        Ok(self.out_dir.join(basename))
    }

    pub fn write_json<T: Serialize>(&self, basename: &str, value: &T) -> Result<()> {
        let path = self.target(basename)?;
        tracing::info!("generating '{}'", path.display());
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(JSON_INDENT.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        value.serialize(&mut ser)?;
        fs::write(path, buf)?;
        Ok(())
    }

    pub fn write_text(&self, basename: &str, text: &str) -> Result<()> {
        let path = self.target(basename)?;
        tracing::info!("generating '{}'", path.display());
        fs::write(path, text)?;
        Ok(())
    }

    pub fn write_lines(&self, basename: &str, lines: &[String]) -> Result<()> {
        let mut text = lines.join("\n");
        text.push('\n');
        self.write_text(basename, &text)
    }

    pub fn read_json<T: serde::de::DeserializeOwned>(&self, basename: &str) -> Result<T> {
        let path = self.out_dir.join(basename);
        tracing::info!("reading '{}'", path.display());
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn write_build_data_all(&self, items: &[BuildItem]) -> Result<()> {
        self.write_json("build_data_all.json", &items)
    }

    pub fn write_build_data_chosen(&self, items: &[BuildItem]) -> Result<()> {
        self.write_json("build_data_chosen.json", &items)
    }

    pub fn read_build_data_chosen(&self) -> Result<Vec<BuildItem>> {
        self.read_json("build_data_chosen.json")
    }

    pub fn write_build_data_min(&self, items: &[BuildItem]) -> Result<()> {
        self.write_json("build_data_min.json", &items)
    }

    pub fn write_remote_tags(&self, tags: &[String]) -> Result<()> {
        self.write_lines("remote_tags.txt", tags)
    }

    pub fn write_remote_tags_to_rm(&self, tags: &[String]) -> Result<()> {
        self.write_json("remote_tags_to_rm.json", &tags)
    }

    pub fn write_docker_repo(&self, docker_repo: &str) -> Result<()> {
        self.write_text("docker_repo.txt", &format!("{docker_repo}\n"))
    }

    /// Sorted, deduplicated Dockerfile paths of the whole plan.
    pub fn write_dockerfiles(&self, items: &[BuildItem]) -> Result<()> {
        let paths: BTreeSet<&String> = items.iter().map(|i| &i.path).collect();
        let lines: Vec<String> = paths.into_iter().cloned().collect();
        self.write_lines("Dockerfiles.txt", &lines)
    }

    pub fn write_propagate(&self, resolved: &[ResolvedPropagation]) -> Result<()> {
        self.write_json("propagate.json", &resolved)
    }

    /// Instantiate `README.md` from the repository root into the output
    /// directory, replacing the `<!-- tags -->` marker.
    pub fn write_readme(&self, base_url: &str, items: &[BuildItem]) -> Result<()> {
        tracing::info!("reading the template 'README.md'");
        let template = fs::read_to_string("README.md")?;
        self.write_text("README.md", &render_readme(&template, base_url, items))
    }
}

/// Replace the `<!-- tags -->` marker with one bullet per build item,
/// linking every tag to its Dockerfile.
pub fn render_readme(template: &str, base_url: &str, items: &[BuildItem]) -> String {
    let base_url = base_url.trim_end_matches('/');
    let bullets: Vec<String> = items
        .iter()
        .map(|item| {
            format!(
                "-\t[`{}`]({}/blob/master/{})",
                item.tags.join("`, `"),
                base_url,
                item.path
            )
        })
        .collect();
    let index = format!(
        "# <a name=\"supported-tags\"></a>\
         Supported tags and respective `Dockerfile` links\n\n{}",
        bullets.join("\n")
    );
    template.replace(README_MARKER, &index)
}
