//! Astro Analyzer - incremental rebuild engine for observatory sessions
//!
//! Reads the session's record store, builds a dependency graph over images,
//! stacks, photometry outputs, analyses, submissions and sets, decides which
//! outputs are stale, and re-runs the external tools that produce them:
//!
//! 1. **Graph Builder** ([`graph`]): one node per record, edges from the
//!    reference fields, target names pushed down from `Set/Target` nodes
//! 2. **Satisfaction Engine** ([`satisfy`]): depth-first walk that stages
//!    commands and raises `dirty`
//! 3. **Scheduler** ([`scheduler`], [`analyzer`]): runs each batch and
//!    reconciles the store afterwards
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use astro_analyzer::prelude::*;
//! use astro_store::JsonFileStore;
//!
//! let config = AnalyzerConfig::default().with_base_directory("/home/IMAGES/9-2-2022");
//! let mut analyzer = Analyzer::new(
//!     JsonFileStore::in_session_dir(config.base_directory()),
//!     Arc::new(FsProbe::new(&config.catalogue_suffix)),
//!     Arc::new(ProcessRunner::new()),
//!     config,
//! );
//! let report = analyzer.resolve(&TargetSelector::All, false).await?;
//! ```

#![allow(missing_docs)]

pub mod analyzer;
pub mod command;
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod probe;
pub mod report;
pub mod satisfy;
pub mod scheduler;

pub use analyzer::{Analyzer, TargetSelector};
pub use config::{AnalyzerConfig, ProgramTable};
pub use error::{AnalyzerError, ConfigError, SchedulerError, StructuralError};
pub use report::{PlanReport, ResolveReport, TargetOutcome, TargetReport};

/// Common imports for embedding the analyzer
pub mod prelude {
    pub use crate::analyzer::{Analyzer, TargetSelector};
    pub use crate::config::AnalyzerConfig;
    pub use crate::probe::{ArtifactProbe, FsProbe};
    pub use crate::report::{PlanReport, ResolveReport};
    pub use crate::scheduler::{CommandRunner, CommandStatus, ProcessRunner};
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
