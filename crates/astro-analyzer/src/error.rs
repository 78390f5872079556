//! Error types for the analyzer
//!
//! Only [`AnalyzerError`] aborts a resolve. The other kinds are scoped:
//! - [`ReferentialError`]: an edge is skipped and the graph proceeds degraded
//! - [`StructuralError`]: the offending node and its dependents are blocked
//! - [`PropagationError`]: recorded against one target's propagation
//! - [`SchedulerError`]: one command is recorded as failed

use astro_store::{Juid, StoreError};
use serde::Serialize;
use std::path::PathBuf;

/// Fatal resolve error
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    /// Record store could not be reactivated or released
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A reference field points to an id that is not in the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("node {node}: field `{field}` references unknown id {missing}")]
pub struct ReferentialError {
    pub node: Juid,
    pub field: &'static str,
    pub missing: Juid,
}

/// Malformed data scoped to one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum StructuralError {
    /// Set record whose `stype` is not one of the known subtypes
    #[error("set {node} has unrecognized type {stype:?}")]
    UnknownSetType { node: Juid, stype: String },

    /// A field the node's action depends on is absent
    #[error("node {node} is missing required field `{field}`")]
    MissingField { node: Juid, field: &'static str },

    /// Merge set with more than one sidecar
    #[error("merge set {node} has {count} sidecars, expected at most one")]
    AmbiguousSidecars { node: Juid, count: usize },

    /// Predecessor cycle found during the walk
    #[error("predecessor cycle {}", format_chain(.chain))]
    Cycle { chain: Vec<Juid> },

    /// Node needs a target name but none was assigned or recorded
    #[error("node {node} has no target name")]
    MissingTarget { node: Juid },
}

/// Target name propagation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum PropagationError {
    /// Recursion went deeper than the configured limit
    #[error("target {target}: propagation exceeded depth {limit} along {}", format_chain(.chain))]
    DepthExceeded {
        target: String,
        limit: usize,
        chain: Vec<Juid>,
    },
}

/// Failure to run one staged command
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The program could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran past the configured timeout and was killed
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Render an id chain as `a -> b -> c`
#[must_use]
pub fn format_chain(chain: &[Juid]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
