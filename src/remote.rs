//! Remote Collaborators
//!
//! Everything that touches the network lives here: upstream commit lookup
//! (GitHub/GitLab) and the Docker Hub tag listing. The evaluation core only
//! sees the [`CommitFetcher`] trait, so tests run with a static table.

use crate::error::{KeeperError, Result};
use crate::spec::{CommitApi, Fetcher};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Resolves a branch reference to a commit identifier.
pub trait CommitFetcher {
    fn commit(&self, api: &CommitApi) -> Result<String>;
}

/// Offline fetcher backed by a `repo@branch -> commit` table.
#[derive(Debug, Clone, Default)]
pub struct StaticCommits(BTreeMap<String, String>);

impl StaticCommits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, repo: &str, branch: &str, commit: &str) -> Self {
        self.0.insert(format!("{repo}@{branch}"), commit.to_string());
        self
    }
}

impl CommitFetcher for StaticCommits {
    fn commit(&self, api: &CommitApi) -> Result<String> {
        self.0
            .get(&format!("{}@{}", api.repo, api.branch))
            .cloned()
            .ok_or_else(|| {
                KeeperError::Lookup(format!(
                    "no commit known for '{}@{}'",
                    api.repo, api.branch
                ))
            })
    }
}

/// <https://gitlab.com/help/api/README.md#namespaced-path-encoding>
fn naive_url_encode(name: &str) -> String {
    name.replace('/', "%2F")
}

pub struct HttpClient {
    client: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("imagekeeper-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[derive(Deserialize)]
struct GitlabBranch {
    commit: GitlabCommit,
}

#[derive(Deserialize)]
struct GitlabCommit {
    id: String,
}

impl CommitFetcher for HttpClient {
    fn commit(&self, api: &CommitApi) -> Result<String> {
        match api.fetcher {
            Fetcher::Github => {
                let url = format!(
                    "https://api.github.com/repos/{}/commits/{}",
                    api.repo, api.branch
                );
                tracing::info!("GET {url}");
                let sha = self
                    .client
                    .get(&url)
                    .header("Accept", "application/vnd.github.v3.sha")
                    .send()?
                    .error_for_status()?
                    .text()?;
                Ok(sha.trim().to_string())
            }
            Fetcher::Gitlab => {
                // https://gitlab.com/help/api/branches.md#get-single-repository-branch
                let url = format!(
                    "https://gitlab.com/api/v4/projects/{}/repository/branches/{}",
                    naive_url_encode(&api.repo),
                    naive_url_encode(&api.branch)
                );
                tracing::info!("GET {url}");
                let branch: GitlabBranch = self
                    .client
                    .get(&url)
                    .send()?
                    .error_for_status()?
                    .json()?;
                Ok(branch.commit.id)
            }
        }
    }
}

#[derive(Deserialize)]
struct HubTagPage {
    results: Vec<HubTag>,
}

#[derive(Deserialize)]
struct HubTag {
    name: String,
}

impl HttpClient {
    /// List every published tag of a Docker Hub repository.
    ///
    /// <https://registry.hub.docker.com/v2/repositories/library/debian/tags>
    pub fn remote_tags(&self, docker_repo: &str) -> Result<Vec<String>> {
        // Max page size allowed by hub.docker.com is 100; stay below.
        let per_page = 50;
        let max_per_sec = 5;
        let url = format!("https://registry.hub.docker.com/v2/repositories/{docker_repo}/tags");
        let mut page = 0u32;
        let mut tags = Vec::new();
        loop {
            page += 1;
            if page % max_per_sec == 0 {
                std::thread::sleep(Duration::from_millis(1100));
            }
            tracing::info!("GET {url} # page: {page}");
            let body: HubTagPage = self
                .client
                .get(&url)
                .query(&[("page", page.to_string()), ("page_size", per_page.to_string())])
                .send()?
                .error_for_status()?
                .json()?;
            if body.results.is_empty() {
                break;
            }
            tags.extend(body.results.into_iter().map(|t| t.name));
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_commits_lookup() {
        let fetcher = StaticCommits::new().with("coq/coq", "master", "deadbeef");
        let api = CommitApi {
            fetcher: Fetcher::Github,
            repo: "coq/coq".into(),
            branch: "master".into(),
        };
        assert_eq!(fetcher.commit(&api).unwrap(), "deadbeef");
        let missing = CommitApi {
            branch: "v8.13".into(),
            ..api
        };
        assert!(matches!(
            fetcher.commit(&missing),
            Err(KeeperError::Lookup(_))
        ));
    }

    #[test]
    fn url_encoding() {
        assert_eq!(naive_url_encode("coq/coq"), "coq%2Fcoq");
    }
}
