//! Imagekeeper Core - Declarative Build-Matrix Keeper
//!
//! Maintains a Docker Hub repository of stable and nightly images from a
//! YAML specification: compiles the build matrix into concrete build items,
//! selects the subset to rebuild, emits the GitLab CI config, and resolves
//! which rebuild triggers to propagate to downstream repositories.
//!
//! The evaluation core (pattern, condition, matrix, plan, propagate) is
//! pure: given identical inputs it produces byte-identical output.

pub mod artifacts;
pub mod condition;
pub mod emit;
pub mod error;
pub mod matrix;
pub mod pattern;
pub mod plan;
pub mod propagate;
pub mod remote;
pub mod spec;

pub use artifacts::ArtifactWriter;
pub use condition::{eval_condition, Condition};
pub use error::{KeeperError, Result};
pub use matrix::{expand_matrix, AxisMap, MatrixAssignment};
pub use pattern::{expand, Bindings, Value};
pub use plan::{BuildItem, PlanCompiler};
pub use propagate::{resolve, ManualOverride, Mode, ResolvedPropagation, Triggers};
pub use remote::{CommitFetcher, HttpClient, StaticCommits};
pub use spec::KeeperSpec;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
