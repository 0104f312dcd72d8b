//! Field-level merge of one differential element onto one snapshot element
//!
//! The derived value always wins. Tightening rules (cardinality, types,
//! binding strength) are checked first and violations are recorded as
//! issues, never refused.

use crate::issue::{IssueCode, SnapshotIssue};
use strata_models::{
    BindingStrength, ElementDefinition, ElementDefinitionBase, ElementDefinitionType, Max,
};

/// Type codes any derived type may constrain
const PERMISSIVE_BASE_TYPES: &[&str] = &["*", "Element", "Resource", "DomainResource"];

/// Derived type codes accepted against any base type
const UNIVERSAL_DERIVED_TYPES: &[&str] = &["*", "Extension", "Element"];

/// Apply every field present on `source` to `dest`
pub fn merge_constraints(
    dest: &mut ElementDefinition,
    source: &ElementDefinition,
    issues: &mut Vec<SnapshotIssue>,
) {
    merge_cardinality(dest, source, issues);
    merge_types(dest, source, issues);
    merge_binding(dest, source, issues);

    overwrite(&mut dest.short, &source.short);
    overwrite(&mut dest.definition, &source.definition);
    overwrite(&mut dest.comment, &source.comment);
    overwrite(&mut dest.requirements, &source.requirements);
    overwrite(&mut dest.label, &source.label);

    overwrite(&mut dest.values.fixed, &source.values.fixed);
    overwrite(&mut dest.values.pattern, &source.values.pattern);
    overwrite(&mut dest.values.default_value, &source.values.default_value);
    overwrite(&mut dest.values.min_value, &source.values.min_value);
    overwrite(&mut dest.values.max_value, &source.values.max_value);
    overwrite(&mut dest.max_length, &source.max_length);
    overwrite(&mut dest.meaning_when_missing, &source.meaning_when_missing);
    overwrite(&mut dest.order_meaning, &source.order_meaning);

    overwrite(&mut dest.must_support, &source.must_support);
    overwrite(&mut dest.is_modifier, &source.is_modifier);
    overwrite(&mut dest.is_modifier_reason, &source.is_modifier_reason);
    merge_is_summary(dest, source, issues);

    overwrite(&mut dest.slicing, &source.slicing);
    overwrite(&mut dest.slice_name, &source.slice_name);
    overwrite(&mut dest.slice_is_constraining, &source.slice_is_constraining);

    overwrite(&mut dest.representation, &source.representation);
    overwrite(&mut dest.code, &source.code);
    overwrite(&mut dest.content_reference, &source.content_reference);
    overwrite(&mut dest.condition, &source.condition);

    union_by_key(&mut dest.constraint, &source.constraint, |c| c.key.clone());
    union_by_key(&mut dest.alias, &source.alias, |a| a.clone());
    union_by_key(&mut dest.example, &source.example, |e| e.label.clone());
    union_by_key(&mut dest.mapping, &source.mapping, |m| {
        (m.identity.clone(), m.map.clone())
    });

    for (key, value) in &source.values.other {
        dest.values.other.insert(key.clone(), value.clone());
    }
}

fn overwrite<T: Clone>(dest: &mut Option<T>, source: &Option<T>) {
    if let Some(value) = source {
        *dest = Some(value.clone());
    }
}

/// Append source entries, replacing base entries that share a key
fn union_by_key<T: Clone, K: PartialEq>(
    dest: &mut Option<Vec<T>>,
    source: &Option<Vec<T>>,
    key: impl Fn(&T) -> K,
) {
    let Some(source) = source else {
        return;
    };
    let merged = dest.get_or_insert_with(Vec::new);
    for item in source {
        let item_key = key(item);
        match merged.iter_mut().find(|existing| key(existing) == item_key) {
            Some(existing) => *existing = item.clone(),
            None => merged.push(item.clone()),
        }
    }
}

fn merge_cardinality(
    dest: &mut ElementDefinition,
    source: &ElementDefinition,
    issues: &mut Vec<SnapshotIssue>,
) {
    if let Some(min) = source.min {
        if let Some(base_min) = dest.min {
            if min < base_min && !source.is_slice() {
                issues.push(
                    SnapshotIssue::error(
                        IssueCode::CardinalityViolation,
                        format!("min {} is less than the base min {}", min, base_min),
                    )
                    .with_path(source.path.clone()),
                );
            }
        }
        dest.min = Some(min);
    }

    if let Some(max) = source.max {
        if let Some(base_max) = dest.max {
            if max > base_max {
                issues.push(
                    SnapshotIssue::error(
                        IssueCode::CardinalityViolation,
                        format!("max {} is greater than the base max {}", max, base_max),
                    )
                    .with_path(source.path.clone()),
                );
            }
        }
        dest.max = Some(max);
    }

    if let (Some(min), Some(Max::Bounded(max))) = (dest.min, dest.max) {
        if min > max && (source.min.is_some() || source.max.is_some()) {
            issues.push(
                SnapshotIssue::error(
                    IssueCode::CardinalityViolation,
                    format!("min {} exceeds max {}", min, max),
                )
                .with_path(source.path.clone()),
            );
        }
    }
}

pub fn is_type_compatible(derived: &str, base: &str) -> bool {
    derived == base
        || UNIVERSAL_DERIVED_TYPES.contains(&derived)
        || PERMISSIVE_BASE_TYPES.contains(&base)
        || matches!((derived, base), ("uri", "string") | ("string", "uri"))
}

fn merge_types(
    dest: &mut ElementDefinition,
    source: &ElementDefinition,
    issues: &mut Vec<SnapshotIssue>,
) {
    let Some(derived) = source.types.as_ref() else {
        return;
    };

    if let Some(base) = dest.types.as_ref().filter(|t| !t.is_empty()) {
        let incompatible: Vec<&ElementDefinitionType> = derived
            .iter()
            .filter(|d| !base.iter().any(|b| is_type_compatible(&d.code, &b.code)))
            .collect();
        if !incompatible.is_empty() {
            let codes: Vec<&str> = incompatible.iter().map(|t| t.code.as_str()).collect();
            let allowed: Vec<&str> = base.iter().map(|t| t.code.as_str()).collect();
            issues.push(
                SnapshotIssue::error(
                    IssueCode::TypeIncompatible,
                    format!("type {} is not allowed by the base", codes.join(", ")),
                )
                .with_path(source.path.clone())
                .with_details(format!("base allows {}", allowed.join(", "))),
            );
        }
    }

    dest.types = Some(derived.clone());
}

fn merge_binding(
    dest: &mut ElementDefinition,
    source: &ElementDefinition,
    issues: &mut Vec<SnapshotIssue>,
) {
    let Some(derived) = source.binding.as_ref() else {
        return;
    };

    let mut merged = derived.clone();
    if let Some(base) = dest.binding.as_ref() {
        if base.strength == BindingStrength::Required && derived.strength != BindingStrength::Required {
            issues.push(
                SnapshotIssue::error(
                    IssueCode::BindingViolation,
                    format!(
                        "required binding cannot be relaxed to {}",
                        derived.strength
                    ),
                )
                .with_path(source.path.clone()),
            );
        }
        if merged.value_set.is_none() {
            merged.value_set = base.value_set.clone();
        }
        if merged.description.is_none() {
            merged.description = base.description.clone();
        }
    }
    dest.binding = Some(merged);
}

fn merge_is_summary(
    dest: &mut ElementDefinition,
    source: &ElementDefinition,
    issues: &mut Vec<SnapshotIssue>,
) {
    let Some(derived) = source.is_summary else {
        return;
    };
    match dest.is_summary {
        Some(base) if base != derived => {
            issues.push(
                SnapshotIssue::warning(
                    IssueCode::InvalidConstraint,
                    format!(
                        "isSummary cannot change from {} to {}; keeping the base value",
                        base, derived
                    ),
                )
                .with_path(source.path.clone()),
            );
        }
        _ => dest.is_summary = Some(derived),
    }
}

/// Record which ancestor element `dest` constrains
///
/// An existing `base` on the source element is kept so the original
/// ancestor stays visible through any number of derivations.
pub fn set_base_traceability(dest: &mut ElementDefinition, base: &ElementDefinition) {
    dest.base = Some(base.base.clone().unwrap_or_else(|| ElementDefinitionBase {
        path: base.path.clone(),
        min: base.min.unwrap_or(0),
        max: base.max.unwrap_or(Max::Unbounded),
    }));
}
