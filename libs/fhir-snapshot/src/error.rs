//! Error types for snapshot generation

use crate::issue::SnapshotIssue;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Circular profile dependency: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Base definition '{url}' could not be loaded: {source}")]
    BaseNotFound {
        url: String,
        #[source]
        source: strata_context::Error,
    },

    #[error("Differential elements were not applied: {}", paths.join(", "))]
    UnconsumedDifferential { paths: Vec<String> },

    #[error("Snapshot generation aborted: {issue}")]
    Aborted { issue: SnapshotIssue },

    #[error("Maximum recursion depth {depth} exceeded while generating '{url}'")]
    MaxDepthExceeded { depth: usize, url: String },

    #[error("Loader error: {0}")]
    Context(#[from] strata_context::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_yaml::Error),
}
