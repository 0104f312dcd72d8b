//! FHIR conformance models
//!
//! This crate provides strongly-typed Rust structures for the FHIR conformance
//! resources consumed by the snapshot engine.
//!
//! # Module Organization
//!
//! - `common`: Version-agnostic models that work across FHIR R4, R4B, and R5
//!
//! # Design Philosophy
//!
//! - **Version-agnostic core**: Common fields present across all FHIR versions
//! - **Fixed schema**: every constraint field of an ElementDefinition is an explicit optional value
//! - **Lossless**: unrecognized properties are kept and written back unchanged
//!
//! # Example
//!
//! ```rust
//! use strata_models::common::{StructureDefinition, StructureDefinitionKind};
//! use serde_json::json;
//!
//! let sd_json = json!({
//!     "resourceType": "StructureDefinition",
//!     "id": "Patient",
//!     "url": "http://hl7.org/fhir/StructureDefinition/Patient",
//!     "version": "4.0.1",
//!     "name": "Patient",
//!     "status": "active",
//!     "kind": "resource",
//!     "abstract": false,
//!     "type": "Patient"
//! });
//!
//! let sd: StructureDefinition = serde_json::from_value(sd_json).unwrap();
//! assert_eq!(sd.name, "Patient");
//! assert_eq!(sd.kind, Some(StructureDefinitionKind::Resource));
//! ```

pub mod common;

// Re-export commonly used types
pub use common::*;
