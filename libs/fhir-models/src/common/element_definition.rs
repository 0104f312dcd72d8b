//! FHIR ElementDefinition model
//!
//! Version-agnostic model for ElementDefinition (used in StructureDefinition snapshots and differentials)

use super::complex::*;
use super::error::{Error, Result};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// FHIR ElementDefinition - defines an element in a resource or data type structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    /// Unique id for inter-element referencing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Path of the element in the hierarchy (e.g., "Patient.name")
    pub path: String,

    /// Codes that define how this element is represented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representation: Option<Vec<PropertyRepresentation>>,

    /// Name for this particular element (in a slice)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    /// If this slice definition constrains an inherited slice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_is_constraining: Option<bool>,

    /// Name for element to display with or prompt for element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Corresponding codes in terminologies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Vec<Coding>>,

    /// This element is sliced - slices follow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementDefinitionSlicing>,

    /// Short label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    /// Full formal definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    /// Comments about the use of this element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Why this resource has been created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    /// Other names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<Vec<String>>,

    /// Minimum cardinality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,

    /// Maximum cardinality
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Max>,

    /// Base definition information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementDefinitionBase>,

    /// Reference to definition of content if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,

    /// Data type and profile for this element
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ElementDefinitionType>>,

    /// Implicit meaning when this element is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meaning_when_missing: Option<String>,

    /// What the order of the elements means
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_meaning: Option<String>,

    /// Example value (as defined for type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Vec<ElementDefinitionExample>>,

    /// Max length for strings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    /// Reference to invariant about presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Vec<String>>,

    /// Condition that must evaluate to true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<ElementDefinitionConstraint>>,

    /// If this element must be supported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,

    /// If this modifies the meaning of other elements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier: Option<bool>,

    /// Reason that this element is marked as a modifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier_reason: Option<String>,

    /// Include when in summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_summary: Option<bool>,

    /// ValueSet details if this is coded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementDefinitionBinding>,

    /// Map element to another set of definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<ElementDefinitionMapping>>,

    /// Choice-typed values and every property not modelled above
    #[serde(flatten)]
    pub values: ElementValues,
}

/// The `[x]` value constraints of an element plus unrecognized properties
///
/// Serialized flat into the owning element: `fixed` with type `Uri` becomes
/// `"fixedUri": ...`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementValues {
    pub fixed: Option<TypedValue>,
    pub pattern: Option<TypedValue>,
    pub default_value: Option<TypedValue>,
    pub min_value: Option<TypedValue>,
    pub max_value: Option<TypedValue>,
    /// Extensions, `_` primitive extensions and version-specific fields
    pub other: Map<String, Value>,
}

const FIXED: &str = "fixed";
const PATTERN: &str = "pattern";
const DEFAULT_VALUE: &str = "defaultValue";
const MIN_VALUE: &str = "minValue";
const MAX_VALUE: &str = "maxValue";

/// Remove the first `<prefix><Type>` key from the map and return it as a typed value
fn take_typed(map: &mut Map<String, Value>, prefix: &str) -> Option<TypedValue> {
    let key = map
        .keys()
        .find(|k| {
            k.strip_prefix(prefix)
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_ascii_uppercase())
        })?
        .clone();
    let value = map.remove(&key)?;
    Some(TypedValue::new(&key[prefix.len()..], value))
}

fn serialize_typed<M: SerializeMap>(
    map: &mut M,
    prefix: &str,
    typed: &Option<TypedValue>,
) -> std::result::Result<(), M::Error> {
    if let Some(typed) = typed {
        map.serialize_entry(&format!("{}{}", prefix, typed.type_name), &typed.value)?;
    }
    Ok(())
}

impl Serialize for ElementValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        serialize_typed(&mut map, DEFAULT_VALUE, &self.default_value)?;
        serialize_typed(&mut map, FIXED, &self.fixed)?;
        serialize_typed(&mut map, PATTERN, &self.pattern)?;
        serialize_typed(&mut map, MIN_VALUE, &self.min_value)?;
        serialize_typed(&mut map, MAX_VALUE, &self.max_value)?;
        for (key, value) in &self.other {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ElementValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut other = Map::deserialize(deserializer)?;
        Ok(Self {
            fixed: take_typed(&mut other, FIXED),
            pattern: take_typed(&mut other, PATTERN),
            default_value: take_typed(&mut other, DEFAULT_VALUE),
            min_value: take_typed(&mut other, MIN_VALUE),
            max_value: take_typed(&mut other, MAX_VALUE),
            other,
        })
    }
}

/// How a property is represented when serialized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyRepresentation {
    XmlAttr,
    XmlText,
    TypeAttr,
    CdaText,
    Xhtml,
}

/// Base definition information for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionBase {
    /// Path that identifies the base element
    pub path: String,

    /// Min cardinality of the base element
    pub min: u32,

    /// Max cardinality of the base element
    pub max: Max,
}

/// Data type for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionType {
    /// Data type code
    pub code: String,

    /// Profile (StructureDefinition canonical URLs) that apply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,

    /// Profile (StructureDefinition) for Reference/canonical target types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,

    /// Aggregation modes for references (contained | referenced | bundled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Vec<AggregationMode>>,

    /// Versioning rule for references (either | independent | specific)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning: Option<ReferenceVersionRules>,
}

impl ElementDefinitionType {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            profile: None,
            target_profile: None,
            aggregation: None,
            versioning: None,
        }
    }
}

/// How aggregated references are handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    Contained,
    Referenced,
    Bundled,
}

/// How reference versions are handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceVersionRules {
    Either,
    Independent,
    Specific,
}

/// Example value for an element
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDefinitionExample {
    /// Describes the purpose of this example
    pub label: String,

    /// Value of example (`valueString`, `valueQuantity`, ...)
    pub value: Option<TypedValue>,
}

impl Serialize for ElementDefinitionExample {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("label", &self.label)?;
        serialize_typed(&mut map, "value", &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ElementDefinitionExample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut map = Map::deserialize(deserializer)?;
        let label = match map.remove("label") {
            Some(Value::String(label)) => label,
            _ => return Err(de::Error::missing_field("label")),
        };
        Ok(Self {
            label,
            value: take_typed(&mut map, "value"),
        })
    }
}

/// Constraint on an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionConstraint {
    /// Target of 'condition' reference
    pub key: String,

    /// Why this constraint is necessary or appropriate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,

    /// Severity (error | warning)
    pub severity: ConstraintSeverity,

    /// Human description of constraint
    pub human: String,

    /// FHIRPath expression of constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// XPath expression of constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,

    /// Reference to original source of constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Severity of a constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    Error,
    Warning,
}

/// ValueSet binding for a coded element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionBinding {
    /// Binding strength (required | extensible | preferred | example)
    pub strength: BindingStrength,

    /// Human explanation of the value set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source of value set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

/// Mapping to another standard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionMapping {
    /// Reference to mapping declaration
    pub identity: String,

    /// Computable language of mapping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Details of the mapping
    pub map: String,

    /// Comments about the mapping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Slicing information for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionSlicing {
    /// Element values that are used to distinguish slices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<ElementDefinitionDiscriminator>>,

    /// Text description of how slicing works
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// If elements must be in same order as slices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,

    /// Slicing rules (closed | open | openAtEnd)
    pub rules: SlicingRules,
}

/// Discriminator for slicing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionDiscriminator {
    /// Type of discriminator (value | exists | pattern | type | profile | position)
    #[serde(rename = "type")]
    pub discriminator_type: DiscriminatorType,

    /// Path to element value
    pub path: String,
}

/// Type of slicing discriminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscriminatorType {
    Value,
    Exists,
    Pattern,
    Type,
    Profile,
    Position,
}

/// Slicing rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    Closed,
    Open,
    OpenAtEnd,
}

impl std::fmt::Display for SlicingRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::OpenAtEnd => "openAtEnd",
        };
        f.write_str(s)
    }
}

/// Snapshot - a set of elements that define the structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

/// Differential - a set of elements that define changes from the base
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Differential {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

impl Snapshot {
    pub fn new(element: Vec<ElementDefinition>) -> Self {
        Self { element }
    }

    /// Parse from JSON Value
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    /// Get an element by path
    pub fn get_element(&self, path: &str) -> Option<&ElementDefinition> {
        self.element.iter().find(|e| e.path == path)
    }

    /// Get an element by id
    pub fn get_element_by_id(&self, id: &str) -> Option<&ElementDefinition> {
        self.element.iter().find(|e| e.id.as_deref() == Some(id))
    }
}

impl Differential {
    pub fn new(element: Vec<ElementDefinition>) -> Self {
        Self { element }
    }

    /// Parse from JSON Value
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    /// Get an element by path
    pub fn get_element(&self, path: &str) -> Option<&ElementDefinition> {
        self.element.iter().find(|e| e.path == path)
    }
}

impl ElementDefinition {
    /// Create an element with only its path set
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Get the key for this element (path:sliceName for slices, just path otherwise)
    pub fn key(&self) -> String {
        if let Some(ref slice_name) = self.slice_name {
            format!("{}:{}", self.path, slice_name)
        } else {
            self.path.clone()
        }
    }

    /// Check if this element has a non-empty slice name
    pub fn is_slice(&self) -> bool {
        self.slice_name.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Get the parent path (everything before the last '.')
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rfind('.').map(|pos| &self.path[..pos])
    }

    /// Check if this is a choice type element (ends with [x])
    pub fn is_choice_type(&self) -> bool {
        self.path.ends_with("[x]")
    }

    /// Get type codes for this element
    pub fn type_codes(&self) -> Vec<&str> {
        self.types
            .as_ref()
            .map(|types| types.iter().map(|t| t.code.as_str()).collect())
            .unwrap_or_default()
    }

    /// Check if element is required (min > 0)
    pub fn is_required(&self) -> bool {
        self.min.unwrap_or(0) > 0
    }

    /// Check if element is array/list (max = "*" or max > 1)
    pub fn is_array(&self) -> bool {
        self.max.is_some_and(|m| m.is_repeating())
    }

    /// Get the cardinality as a string (e.g., "0..1", "1..*")
    pub fn cardinality_string(&self) -> String {
        let min = self.min.unwrap_or(0);
        let max = self.max.unwrap_or(Max::Unbounded);
        format!("{}..{}", min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_key() {
        let elem = ElementDefinition {
            slice_name: Some("official".to_string()),
            ..ElementDefinition::new("Patient.name")
        };

        assert_eq!(elem.key(), "Patient.name:official");
        assert!(elem.is_slice());
    }

    #[test]
    fn test_empty_slice_name_is_not_a_slice() {
        let elem = ElementDefinition {
            slice_name: Some(String::new()),
            ..ElementDefinition::new("Patient.name")
        };
        assert!(!elem.is_slice());
    }

    #[test]
    fn test_is_choice_type() {
        let mut elem = ElementDefinition::new("Observation.value[x]");
        assert!(elem.is_choice_type());

        elem.path = "Observation.value".to_string();
        assert!(!elem.is_choice_type());
    }

    #[test]
    fn test_cardinality_string() {
        let elem = ElementDefinition {
            min: Some(1),
            max: Some(Max::Unbounded),
            ..ElementDefinition::new("Patient.name")
        };

        assert_eq!(elem.cardinality_string(), "1..*");
        assert!(elem.is_required());
        assert!(elem.is_array());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(
            ElementDefinition::new("Patient.name.given").parent_path(),
            Some("Patient.name")
        );
        assert_eq!(ElementDefinition::new("Patient").parent_path(), None);
    }

    #[test]
    fn test_typed_values_are_split_out_of_flattened_fields() {
        let elem: ElementDefinition = serde_json::from_value(json!({
            "id": "Patient.gender",
            "path": "Patient.gender",
            "min": 1,
            "max": "1",
            "fixedCode": "female",
            "patternCodeableConcept": { "text": "x" },
            "_short": { "extension": [] },
            "extension": [{ "url": "http://example.org/ext", "valueBoolean": true }]
        }))
        .unwrap();

        let fixed = elem.values.fixed.as_ref().unwrap();
        assert_eq!(fixed.type_name, "Code");
        assert_eq!(fixed.value, json!("female"));
        assert_eq!(
            elem.values.pattern.as_ref().unwrap().type_name,
            "CodeableConcept"
        );
        assert_eq!(elem.max, Some(Max::Bounded(1)));
        assert!(elem.values.other.contains_key("_short"));
        assert!(elem.values.other.contains_key("extension"));
        assert!(!elem.values.other.contains_key("fixedCode"));
    }

    #[test]
    fn test_typed_values_serialize_with_type_suffix() {
        let mut elem = ElementDefinition::new("Observation.status");
        elem.values.fixed = Some(TypedValue::new("Code", json!("final")));
        elem.values.default_value = Some(TypedValue::new("Boolean", json!(false)));

        let json = serde_json::to_value(&elem).unwrap();
        assert_eq!(json["fixedCode"], "final");
        assert_eq!(json["defaultValueBoolean"], false);
        assert!(json.get("fixed").is_none());
    }

    #[test]
    fn test_prefix_without_type_suffix_is_kept_as_other() {
        let elem: ElementDefinition = serde_json::from_value(json!({
            "path": "X.y",
            "fixedness": "not a value"
        }))
        .unwrap();
        assert!(elem.values.fixed.is_none());
        assert!(elem.values.other.contains_key("fixedness"));
    }

    #[test]
    fn test_example_value() {
        let example: ElementDefinitionExample = serde_json::from_value(json!({
            "label": "General",
            "valueString": "hello"
        }))
        .unwrap();
        assert_eq!(example.label, "General");
        assert_eq!(example.value.as_ref().unwrap().type_name, "String");

        let back = serde_json::to_value(&example).unwrap();
        assert_eq!(back["valueString"], "hello");
    }

    #[test]
    fn test_type_uses_camel_case_target_profile() {
        let ty: ElementDefinitionType = serde_json::from_value(json!({
            "code": "Reference",
            "targetProfile": ["http://hl7.org/fhir/StructureDefinition/Patient"]
        }))
        .unwrap();
        assert_eq!(ty.target_profile.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_slicing_rules_serialization() {
        let slicing: ElementDefinitionSlicing = serde_json::from_value(json!({
            "discriminator": [{ "type": "value", "path": "url" }],
            "rules": "openAtEnd"
        }))
        .unwrap();
        assert_eq!(slicing.rules, SlicingRules::OpenAtEnd);
        assert_eq!(slicing.rules.to_string(), "openAtEnd");
    }
}
