//! StructureDefinition access for the snapshot engine
//!
//! Provides the trait-based loader contract the engine resolves base
//! definitions and datatypes through, plus an in-memory registry that
//! implements it.

pub mod error;
pub mod loader;
pub mod registry;

pub use error::{Error, Result};
pub use loader::{split_versioned_url, StructureDefinitionLoader};
pub use registry::{InMemoryLoader, LoaderStatistics};
