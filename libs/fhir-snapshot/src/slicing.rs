//! Slicing rules for snapshot generation
//!
//! Covers introducing slicing on an array element, refining slicing that a
//! base already declares, implicit slicing of extension arrays and
//! re-slicing (`parent/child` slice names).

use crate::issue::{IssueCode, SnapshotIssue};
use crate::path::{get_child_scope, tail_segment};
use strata_models::{
    DiscriminatorType, ElementDefinition, ElementDefinitionDiscriminator,
    ElementDefinitionSlicing, Max, SlicingRules,
};
use tracing::debug;

/// Slicing every extension array carries unless a profile says otherwise
pub fn make_extension_slicing() -> ElementDefinitionSlicing {
    ElementDefinitionSlicing {
        discriminator: Some(vec![ElementDefinitionDiscriminator {
            discriminator_type: DiscriminatorType::Value,
            path: "url".to_string(),
        }]),
        description: Some("Extensions are always sliced by (at least) url".to_string()),
        ordered: Some(false),
        rules: SlicingRules::Open,
    }
}

pub fn is_extension_path(path: &str) -> bool {
    matches!(tail_segment(path), "extension" | "modifierExtension")
}

/// Indices of the slices that follow the slicing root at `root`
///
/// Each slice's own children are skipped, so only the slice entries
/// themselves are returned.
pub fn get_slice_siblings(elements: &[ElementDefinition], root: usize) -> Vec<usize> {
    let Some(root_element) = elements.get(root) else {
        return Vec::new();
    };

    let mut siblings = Vec::new();
    let mut i = skip_subtree(elements, root);
    while let Some(element) = elements.get(i) {
        if element.path != root_element.path || !element.is_slice() {
            break;
        }
        siblings.push(i);
        i = skip_subtree(elements, i);
    }
    siblings
}

/// Index just past `elements[index]` and its children
pub(crate) fn skip_subtree(elements: &[ElementDefinition], index: usize) -> usize {
    get_child_scope(elements, index).map_or(index + 1, |scope| scope.end + 1)
}

/// Check that `derived` only narrows `base`
///
/// Rules may go from `open` to anything and from `openAtEnd` to `closed`;
/// `closed` stays `closed`. Ordered slicing cannot become unordered and the
/// base discriminators must remain a prefix of the derived ones.
pub fn validate_slicing_refinement(
    base: &ElementDefinitionSlicing,
    derived: &ElementDefinitionSlicing,
    path: &str,
    issues: &mut Vec<SnapshotIssue>,
) -> bool {
    let mut valid = true;

    let rules_ok = match (base.rules, derived.rules) {
        (SlicingRules::Open, _) => true,
        (SlicingRules::OpenAtEnd, SlicingRules::OpenAtEnd | SlicingRules::Closed) => true,
        (SlicingRules::Closed, SlicingRules::Closed) => true,
        _ => false,
    };
    if !rules_ok {
        issues.push(
            SnapshotIssue::error(
                IssueCode::SlicingError,
                format!(
                    "slicing rules cannot be loosened from {} to {}",
                    base.rules, derived.rules
                ),
            )
            .with_path(path),
        );
        valid = false;
    }

    if base.ordered == Some(true) && derived.ordered == Some(false) {
        issues.push(
            SnapshotIssue::error(
                IssueCode::SlicingError,
                "ordered slicing cannot become unordered",
            )
            .with_path(path),
        );
        valid = false;
    }

    if let (Some(base_disc), Some(derived_disc)) = (&base.discriminator, &derived.discriminator) {
        if !derived_disc.starts_with(base_disc) {
            issues.push(
                SnapshotIssue::error(
                    IssueCode::SlicingError,
                    "derived discriminators must extend the base discriminators",
                )
                .with_path(path),
            );
            valid = false;
        }
    }

    valid
}

/// Field-by-field merge; the derived value wins wherever it is present
pub fn merge_slicing(
    base: &ElementDefinitionSlicing,
    diff: &ElementDefinitionSlicing,
) -> ElementDefinitionSlicing {
    ElementDefinitionSlicing {
        discriminator: diff
            .discriminator
            .clone()
            .or_else(|| base.discriminator.clone()),
        description: diff
            .description
            .clone()
            .or_else(|| base.description.clone()),
        ordered: diff.ordered.or(base.ordered),
        rules: diff.rules,
    }
}

/// True if any differential slice restricts types or profiles beyond `base`
///
/// Such a slice takes its children from its own type rather than from the
/// element it slices.
pub fn diffs_constrain_types(diffs: &[&ElementDefinition], base: &ElementDefinition) -> bool {
    let base_types = base.types.as_deref().unwrap_or_default();
    diffs.iter().any(|diff| match diff.types.as_deref() {
        None => false,
        Some(types) => types.iter().any(|t| {
            match base_types.iter().find(|b| b.code == t.code) {
                None => true,
                Some(b) => t.profile.is_some() && t.profile != b.profile,
            }
        }),
    })
}

fn base_max(base: &ElementDefinition) -> Max {
    base.base
        .as_ref()
        .map(|b| b.max)
        .or(base.max)
        .unwrap_or(Max::Unbounded)
}

/// Slicing for an element the base does not slice yet
///
/// Uses the differential's slicing when given, otherwise synthesizes one.
pub fn handle_new_slicing(
    base: &ElementDefinition,
    path: &str,
    diff_slicing: Option<&ElementDefinitionSlicing>,
    issues: &mut Vec<SnapshotIssue>,
) -> ElementDefinitionSlicing {
    if !base_max(base).is_repeating() && !base.is_choice_type() {
        issues.push(
            SnapshotIssue::error(
                IssueCode::SlicingError,
                format!("element with max {} cannot be sliced", base_max(base)),
            )
            .with_path(path),
        );
    }

    if let Some(slicing) = diff_slicing {
        return slicing.clone();
    }

    if is_extension_path(path) {
        debug!(path, "applying implicit extension slicing");
        return make_extension_slicing();
    }

    issues.push(
        SnapshotIssue::warning(
            IssueCode::SlicingError,
            "slices declared without a slicing definition; assuming open slicing",
        )
        .with_path(path),
    );
    ElementDefinitionSlicing {
        discriminator: None,
        description: None,
        ordered: Some(false),
        rules: SlicingRules::Open,
    }
}

/// Slicing for an element the base already slices
pub fn handle_existing_slicing(
    base_slicing: &ElementDefinitionSlicing,
    diff_slicing: Option<&ElementDefinitionSlicing>,
    new_slice_names: &[&str],
    path: &str,
    issues: &mut Vec<SnapshotIssue>,
) -> ElementDefinitionSlicing {
    let merged = match diff_slicing {
        Some(diff) => {
            validate_slicing_refinement(base_slicing, diff, path, issues);
            merge_slicing(base_slicing, diff)
        }
        None => base_slicing.clone(),
    };

    if base_slicing.rules == SlicingRules::Closed {
        for name in new_slice_names {
            issues.push(
                SnapshotIssue::error(
                    IssueCode::SlicingError,
                    format!("slice '{}' cannot be added to closed slicing", name),
                )
                .with_path(path),
            );
        }
    }

    merged
}

/// Parent of a re-slice name: `MRN/old` gives `MRN`
pub fn reslice_parent(slice_name: &str) -> Option<&str> {
    slice_name.rsplit_once('/').map(|(parent, _)| parent)
}

/// Report a re-slice whose parent slice is unknown
pub fn validate_reslice(
    slice_name: &str,
    known: &[&str],
    path: &str,
    issues: &mut Vec<SnapshotIssue>,
) -> bool {
    match reslice_parent(slice_name) {
        Some(parent) if !known.contains(&parent) => {
            issues.push(
                SnapshotIssue::error(
                    IssueCode::SlicingError,
                    format!(
                        "re-slice '{}' refers to unknown slice '{}'",
                        slice_name, parent
                    ),
                )
                .with_path(path),
            );
            false
        }
        _ => true,
    }
}
