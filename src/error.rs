//! Engine Errors
//!
//! Every failure is fatal at the point of detection: the evaluation is
//! aborted with a message naming the offending field or target.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    /// Unknown placeholder name, key, attribute or index.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Malformed condition, template or propagation rule.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Violated structural invariant (duplicate tags, empty matrix, ...).
    #[error("invariant error: {0}")]
    Invariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("specification error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("artifact error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, KeeperError>;
