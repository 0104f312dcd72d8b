//! FHIR complex types and shared data structures
//!
//! This module contains enums and structs that are reused across FHIR resources.

use super::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Publication status of a conformance resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    #[default]
    Draft,
    Active,
    Retired,
    Unknown,
}

/// Binding strength for terminology bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

impl BindingStrength {
    /// Strictness rank: example < preferred < extensible < required
    pub fn rank(self) -> u8 {
        match self {
            Self::Example => 0,
            Self::Preferred => 1,
            Self::Extensible => 2,
            Self::Required => 3,
        }
    }
}

impl fmt::Display for BindingStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Required => "required",
            Self::Extensible => "extensible",
            Self::Preferred => "preferred",
            Self::Example => "example",
        };
        f.write_str(s)
    }
}

/// Coding - a reference to a code defined by a terminology system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(rename = "userSelected", skip_serializing_if = "Option::is_none")]
    pub user_selected: Option<bool>,
}

/// Maximum cardinality of an element: a bound or `*`
///
/// `Unbounded` compares greater than every bound and equal only to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Max {
    Bounded(u32),
    Unbounded,
}

impl Max {
    /// True when more than one occurrence is allowed
    pub fn is_repeating(&self) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bounded(n) => *n > 1,
        }
    }
}

impl Ord for Max {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Unbounded, Self::Unbounded) => Ordering::Equal,
            (Self::Unbounded, Self::Bounded(_)) => Ordering::Greater,
            (Self::Bounded(_), Self::Unbounded) => Ordering::Less,
            (Self::Bounded(a), Self::Bounded(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Max {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Max {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("*"),
            Self::Bounded(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for Max {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::Unbounded);
        }
        s.parse::<u32>()
            .map(Self::Bounded)
            .map_err(|_| Error::InvalidFieldValue(format!("invalid max cardinality '{}'", s)))
    }
}

impl Serialize for Max {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Max {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A choice-typed value (`fixed[x]`, `pattern[x]`, ...) with its type suffix
///
/// `fixedCode: "male"` is held as `type_name = "Code"`, `value = "male"`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub type_name: String,
    pub value: Value,
}

impl TypedValue {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_orders_unbounded_last() {
        assert!(Max::Unbounded > Max::Bounded(u32::MAX));
        assert!(Max::Bounded(1) < Max::Bounded(2));
        assert_eq!(Max::Unbounded.cmp(&Max::Unbounded), Ordering::Equal);
    }

    #[test]
    fn max_parses_fhir_strings() {
        assert_eq!("*".parse::<Max>().unwrap(), Max::Unbounded);
        assert_eq!("3".parse::<Max>().unwrap(), Max::Bounded(3));
        assert!("many".parse::<Max>().is_err());
    }

    #[test]
    fn max_serializes_as_string() {
        assert_eq!(serde_json::to_value(Max::Unbounded).unwrap(), "*");
        assert_eq!(serde_json::to_value(Max::Bounded(1)).unwrap(), "1");
        let max: Max = serde_json::from_value(serde_json::json!("0")).unwrap();
        assert_eq!(max, Max::Bounded(0));
    }

    #[test]
    fn binding_strength_rank_is_monotonic() {
        assert!(BindingStrength::Required.rank() > BindingStrength::Extensible.rank());
        assert!(BindingStrength::Extensible.rank() > BindingStrength::Preferred.rank());
        assert!(BindingStrength::Preferred.rank() > BindingStrength::Example.rank());
    }
}
