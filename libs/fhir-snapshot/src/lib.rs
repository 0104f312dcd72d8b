//! FHIR StructureDefinition snapshot generation
//!
//! Builds the snapshot of a profile from its differential and the snapshot
//! of its base definition. Bases without a snapshot are generated first,
//! through the same [`StructureDefinitionLoader`](strata_context::StructureDefinitionLoader).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata_context::InMemoryLoader;
//! use strata_snapshot::{GeneratorConfig, SnapshotGenerator};
//!
//! # async fn run(profile: strata_models::StructureDefinition) -> strata_snapshot::Result<()> {
//! let loader = Arc::new(InMemoryLoader::new());
//! loader.load_directory("definitions").await?;
//!
//! let config = GeneratorConfig::builder().throw_on_error(false).build();
//! let mut generator = SnapshotGenerator::with_config(loader, config);
//! let result = generator.generate(profile).await?;
//!
//! for issue in &result.issues {
//!     println!("{}", issue);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constraints;
pub mod error;
pub mod generator;
pub mod issue;
pub mod merge;
pub mod path;
pub mod slicing;
pub mod sorter;

pub use config::{GeneratorConfig, GeneratorConfigBuilder};
pub use constraints::{merge_constraints, set_base_traceability};
pub use error::{Error, Result};
pub use generator::SnapshotGenerator;
pub use issue::{IssueCode, IssueSeverity, SnapshotIssue, SnapshotResult};
pub use merge::{create_merge_context, merge_snapshot, process_paths, DiffTracker, MergeContext};
pub use sorter::{ensure_element_ids, find_base_index, sort_differential, validate_element_order};
pub use strata_models::{ElementDefinition, Snapshot, StructureDefinition};
