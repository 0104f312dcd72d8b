//! FHIR StructureDefinition model
//!
//! Version-agnostic model for StructureDefinitions that works across R4, R4B, and R5.

use super::complex::*;
use super::element_definition::{Differential, ElementDefinition, Snapshot};
use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// FHIR StructureDefinition resource
///
/// Defines the structure, constraints, and terminology bindings for FHIR resources and data types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    /// Resource type - always "StructureDefinition"
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    /// Logical id of this artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Canonical identifier for this structure definition (unique globally)
    ///
    /// Left empty when absent so the generator can report it.
    #[serde(default)]
    pub url: String,

    /// Business version of the structure definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Name for this structure definition (computer friendly)
    #[serde(default)]
    pub name: String,

    /// Name for this structure definition (human friendly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Publication status (draft | active | retired | unknown)
    #[serde(default)]
    pub status: PublicationStatus,

    /// For testing purposes, not real usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<bool>,

    /// Date last changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Name of the publisher (organization or individual)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// Natural language description of the structure definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// FHIR Version this StructureDefinition targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    /// External specifications that this structure conforms to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<StructureDefinitionMapping>>,

    /// Kind of structure (primitive-type | complex-type | resource | logical)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<StructureDefinitionKind>,

    /// Whether this is an abstract type
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub is_abstract: Option<bool>,

    /// If an extension, where it can be used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<StructureDefinitionContext>>,

    /// Type defined or constrained by this structure
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Definition that this type is constrained/specialized from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    /// Derivation type (specialization | constraint)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<TypeDerivationRule>,

    /// Snapshot view of the structure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    /// Differential view of the structure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<Differential>,

    /// Additional content beyond core fields (text, contact, extensions, version-specific fields)
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_resource_type() -> String {
    "StructureDefinition".to_string()
}

/// Kind of structure this definition describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    /// A primitive data type
    PrimitiveType,
    /// A complex data type
    ComplexType,
    /// A resource
    Resource,
    /// A logical model (not directly implementable)
    Logical,
}

/// How the type relates to its baseDefinition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeDerivationRule {
    /// This definition defines a new type based on the baseDefinition
    Specialization,
    /// This definition constrains the baseDefinition
    Constraint,
}

/// Mapping to another standard/specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureDefinitionMapping {
    /// Internal id when this mapping is used
    pub identity: String,

    /// Identifies what this mapping refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Names what this mapping refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Versions, issues, scope limitations, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Context where an extension can be used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureDefinitionContext {
    /// Type of context (fhirpath | element | extension)
    #[serde(rename = "type")]
    pub context_type: String,

    /// FHIRPath expression or element id
    pub expression: String,
}

impl StructureDefinition {
    /// Create a new StructureDefinition with minimal required fields
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        kind: StructureDefinitionKind,
        type_: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: default_resource_type(),
            id: None,
            url: url.into(),
            version: None,
            name: name.into(),
            title: None,
            status: PublicationStatus::Draft,
            experimental: None,
            date: None,
            publisher: None,
            description: None,
            fhir_version: None,
            mapping: None,
            kind: Some(kind),
            is_abstract: Some(false),
            context: None,
            type_: type_.into(),
            base_definition: None,
            derivation: None,
            snapshot: None,
            differential: None,
            extensions: HashMap::new(),
        }
    }

    /// Parse from JSON Value
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.get("resourceType").and_then(Value::as_str) != Some("StructureDefinition") {
            return Err(Error::InvalidResource(
                "resourceType is not StructureDefinition".to_string(),
            ));
        }
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    /// Convert to JSON Value
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::from)
    }

    /// Get the root element from snapshot
    pub fn get_root_element(&self) -> Option<&ElementDefinition> {
        self.snapshot.as_ref().and_then(|s| s.element.first())
    }

    /// Get element by path from snapshot
    pub fn get_element_by_path(&self, path: &str) -> Option<&ElementDefinition> {
        self.snapshot.as_ref().and_then(|s| s.get_element(path))
    }

    /// Snapshot elements, empty when there is no snapshot
    pub fn snapshot_elements(&self) -> &[ElementDefinition] {
        self.snapshot
            .as_ref()
            .map(|s| s.element.as_slice())
            .unwrap_or_default()
    }

    /// Differential elements, empty when there is no differential
    pub fn differential_elements(&self) -> &[ElementDefinition] {
        self.differential
            .as_ref()
            .map(|d| d.element.as_slice())
            .unwrap_or_default()
    }

    /// Check if this is a resource definition
    pub fn is_resource(&self) -> bool {
        self.kind == Some(StructureDefinitionKind::Resource)
    }

    /// Check if this is an extension definition
    pub fn is_extension(&self) -> bool {
        self.type_ == "Extension"
    }

    /// Check if this is a profile (constraint on another definition)
    pub fn is_profile(&self) -> bool {
        self.derivation == Some(TypeDerivationRule::Constraint)
    }

    /// Check if this has a non-empty snapshot
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| !s.element.is_empty())
    }

    /// Check if this has a differential
    pub fn has_differential(&self) -> bool {
        self.differential.is_some()
    }

    /// Get the version with the URL (canonical|version format)
    pub fn get_versioned_url(&self) -> String {
        match &self.version {
            Some(v) => format!("{}|{}", self.url, v),
            None => self.url.clone(),
        }
    }

    /// Get base type name (strips canonical URL)
    pub fn get_base_type_name(&self) -> Option<String> {
        self.base_definition
            .as_ref()
            .and_then(|url| url.rsplit('/').next().map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_structure_definition() {
        let json = json!({
            "resourceType": "StructureDefinition",
            "id": "Patient",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "version": "4.0.1",
            "name": "Patient",
            "status": "active",
            "kind": "resource",
            "abstract": false,
            "type": "Patient",
            "baseDefinition": "http://hl7.org/fhir/StructureDefinition/DomainResource",
            "derivation": "specialization"
        });

        let sd: StructureDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(sd.name, "Patient");
        assert_eq!(sd.url, "http://hl7.org/fhir/StructureDefinition/Patient");
        assert_eq!(sd.kind, Some(StructureDefinitionKind::Resource));
        assert_eq!(sd.derivation, Some(TypeDerivationRule::Specialization));
        assert_eq!(sd.is_abstract, Some(false));
    }

    #[test]
    fn test_missing_url_deserializes_as_empty() {
        let sd: StructureDefinition = serde_json::from_value(json!({
            "resourceType": "StructureDefinition",
            "type": "Patient"
        }))
        .unwrap();
        assert!(sd.url.is_empty());
        assert_eq!(sd.status, PublicationStatus::Draft);
    }

    #[test]
    fn test_from_value_rejects_other_resources() {
        let err = StructureDefinition::from_value(&json!({"resourceType": "ValueSet"}));
        assert!(matches!(err, Err(Error::InvalidResource(_))));
    }

    #[test]
    fn test_serialize_structure_definition() {
        let sd = StructureDefinition::new(
            "http://example.org/fhir/StructureDefinition/MyPatient",
            "MyPatient",
            StructureDefinitionKind::Resource,
            "Patient",
        );

        let json = serde_json::to_value(&sd).unwrap();
        assert_eq!(json["resourceType"], "StructureDefinition");
        assert_eq!(json["name"], "MyPatient");
        assert_eq!(json["kind"], "resource");
        assert!(json.get("snapshot").is_none());
    }

    #[test]
    fn test_unknown_properties_survive_round_trip() {
        let json = json!({
            "resourceType": "StructureDefinition",
            "url": "http://example.org/StructureDefinition/X",
            "name": "X",
            "status": "draft",
            "type": "Patient",
            "text": { "status": "generated" }
        });
        let sd: StructureDefinition = serde_json::from_value(json).unwrap();
        assert!(sd.extensions.contains_key("text"));
        assert_eq!(sd.to_value().unwrap()["text"]["status"], "generated");
    }

    #[test]
    fn test_is_profile() {
        let mut sd = StructureDefinition::new(
            "http://example.org/StructureDefinition/MyProfile",
            "MyProfile",
            StructureDefinitionKind::Resource,
            "Patient",
        );
        assert!(!sd.is_profile());

        sd.derivation = Some(TypeDerivationRule::Constraint);
        assert!(sd.is_profile());
    }

    #[test]
    fn test_has_snapshot_requires_elements() {
        let mut sd = StructureDefinition::new(
            "http://example.org/StructureDefinition/Test",
            "Test",
            StructureDefinitionKind::Resource,
            "Patient",
        );
        assert!(!sd.has_snapshot());
        sd.snapshot = Some(Snapshot::default());
        assert!(!sd.has_snapshot());
        sd.snapshot = Some(Snapshot::new(vec![ElementDefinition::new("Patient")]));
        assert!(sd.has_snapshot());
        assert_eq!(sd.snapshot_elements().len(), 1);
        assert!(sd.differential_elements().is_empty());
    }

    #[test]
    fn test_get_versioned_url() {
        let mut sd = StructureDefinition::new(
            "http://example.org/StructureDefinition/Test",
            "Test",
            StructureDefinitionKind::Resource,
            "Patient",
        );
        assert_eq!(
            sd.get_versioned_url(),
            "http://example.org/StructureDefinition/Test"
        );

        sd.version = Some("1.0.0".to_string());
        assert_eq!(
            sd.get_versioned_url(),
            "http://example.org/StructureDefinition/Test|1.0.0"
        );
    }

    #[test]
    fn test_get_base_type_name() {
        let mut sd = StructureDefinition::new(
            "http://example.org/StructureDefinition/MyPatient",
            "MyPatient",
            StructureDefinitionKind::Resource,
            "Patient",
        );
        assert_eq!(sd.get_base_type_name(), None);

        sd.base_definition =
            Some("http://hl7.org/fhir/StructureDefinition/DomainResource".to_string());
        assert_eq!(sd.get_base_type_name(), Some("DomainResource".to_string()));
    }
}
