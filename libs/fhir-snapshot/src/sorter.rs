//! Differential ordering, snapshot order validation and id assignment

use crate::issue::{IssueCode, SnapshotIssue};
use crate::path::{
    get_child_scope, is_choice_type_path, matches_choice_type, parent_path, rewrite_path,
};
use std::collections::HashSet;
use strata_models::ElementDefinition;

/// Locate the base element a differential path constrains
///
/// Tries exact path and slice name, then exact path alone, then a choice
/// element whose `[x]` the path realizes.
pub fn find_base_index(
    base: &[ElementDefinition],
    path: &str,
    slice_name: Option<&str>,
) -> Option<usize> {
    base.iter()
        .position(|e| e.path == path && e.slice_name.as_deref() == slice_name)
        .or_else(|| base.iter().position(|e| e.path == path))
        .or_else(|| {
            base.iter()
                .position(|e| is_choice_type_path(&e.path) && matches_choice_type(&e.path, path))
        })
}

struct Node {
    children: Vec<usize>,
    key: Option<(usize, usize)>,
}

/// Reorder a differential to follow base snapshot order
///
/// Builds a parent-linked tree (by id first, then by nearest preceding
/// ancestor path), sorts each sibling group by base position and flattens
/// it again in pre-order. Slices follow their unsliced root; new slices keep
/// their declared order after any slices the base already has.
pub fn sort_differential(
    diff: &[ElementDefinition],
    base: &[ElementDefinition],
    issues: &mut Vec<SnapshotIssue>,
) -> Vec<ElementDefinition> {
    if diff.len() <= 1 {
        return diff.to_vec();
    }

    let diff_root = diff[0].path.split('.').next().unwrap_or_default();
    let base_root = base.first().map(|e| e.path.as_str()).unwrap_or(diff_root);

    let mut nodes: Vec<Node> = Vec::with_capacity(diff.len());
    let mut roots = Vec::new();

    for (i, element) in diff.iter().enumerate() {
        let base_path = rewrite_path(&element.path, diff_root, base_root);
        let key = sort_key(base, &base_path, element);
        if key.is_none() && !has_expandable_ancestor(base, &base_path) {
            issues.push(
                SnapshotIssue::warning(
                    IssueCode::PathNotFound,
                    format!("Differential element '{}' has no counterpart in the base", element.key()),
                )
                .with_path(element.path.clone()),
            );
        }

        match find_parent(diff, i, element) {
            Some(parent) => nodes[parent].children.push(i),
            None => roots.push(i),
        }
        nodes.push(Node {
            children: Vec::new(),
            key,
        });
    }

    for i in 0..nodes.len() {
        let mut children = std::mem::take(&mut nodes[i].children);
        children.sort_by_key(|&c| nodes[c].key.unwrap_or((usize::MAX, usize::MAX)));
        nodes[i].children = children;
    }
    roots.sort_by_key(|&c| nodes[c].key.unwrap_or((usize::MAX, usize::MAX)));

    let mut sorted = Vec::with_capacity(diff.len());
    let mut stack: Vec<usize> = roots.into_iter().rev().collect();
    while let Some(i) = stack.pop() {
        sorted.push(diff[i].clone());
        stack.extend(nodes[i].children.iter().rev());
    }
    sorted
}

/// Position of the unsliced group in the base plus the slice's rank inside it
fn sort_key(base: &[ElementDefinition], path: &str, element: &ElementDefinition) -> Option<(usize, usize)> {
    let group = find_base_index(base, path, None)?;
    let rank = match element.slice_name.as_deref().filter(|s| !s.is_empty()) {
        None => 0,
        Some(name) => base
            .iter()
            .position(|e| e.path == path && e.slice_name.as_deref() == Some(name))
            .unwrap_or(usize::MAX),
    };
    Some((group, rank))
}

/// True when the nearest ancestor present in the base is a leaf there, so the
/// path may still resolve once that element's type is expanded
fn has_expandable_ancestor(base: &[ElementDefinition], path: &str) -> bool {
    let mut current = parent_path(path);
    while let Some(ancestor) = current {
        if let Some(index) = find_base_index(base, ancestor, None) {
            return get_child_scope(base, index).is_none();
        }
        current = parent_path(ancestor);
    }
    false
}

fn find_parent(diff: &[ElementDefinition], index: usize, element: &ElementDefinition) -> Option<usize> {
    let earlier = &diff[..index];

    if let Some(parent_id) = element.id.as_deref().and_then(parent_path) {
        if let Some(found) = earlier
            .iter()
            .rposition(|e| e.id.as_deref() == Some(parent_id))
        {
            return Some(found);
        }
    }

    let mut current = parent_path(&element.path);
    while let Some(ancestor) = current {
        if let Some(found) = earlier.iter().rposition(|e| e.path == ancestor) {
            return Some(found);
        }
        current = parent_path(ancestor);
    }
    None
}

/// Check parent-before-child order; the root is exempt
pub fn validate_element_order(snapshot: &[ElementDefinition], issues: &mut Vec<SnapshotIssue>) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut valid = true;

    for (i, element) in snapshot.iter().enumerate() {
        if i > 0 {
            if let Some(parent) = parent_path(&element.path) {
                if !seen.contains(parent) {
                    issues.push(
                        SnapshotIssue::error(
                            IssueCode::InternalError,
                            format!(
                                "Element '{}' appears before its parent '{}'",
                                element.path, parent
                            ),
                        )
                        .with_path(element.path.clone()),
                    );
                    valid = false;
                }
            }
        }
        seen.insert(&element.path);
    }
    valid
}

/// Fill in missing ids as `path` or `path:sliceName`
///
/// When `resource_type` is given and the root path equals it, the root id is
/// set to the resource type.
pub fn ensure_element_ids(elements: &mut [ElementDefinition], resource_type: Option<&str>) {
    for element in elements.iter_mut() {
        if element.id.is_none() {
            element.id = Some(element.key());
        }
    }

    if let (Some(root), Some(resource_type)) = (elements.first_mut(), resource_type) {
        if root.path == resource_type {
            root.id = Some(resource_type.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(path: &str) -> ElementDefinition {
        ElementDefinition::new(path)
    }

    fn slice(path: &str, name: &str) -> ElementDefinition {
        ElementDefinition {
            slice_name: Some(name.to_string()),
            id: Some(format!("{}:{}", path, name)),
            ..ElementDefinition::new(path)
        }
    }

    fn base() -> Vec<ElementDefinition> {
        vec![
            element("Patient"),
            element("Patient.identifier"),
            element("Patient.name"),
            element("Patient.gender"),
            element("Patient.contact"),
            element("Patient.contact.name"),
            element("Patient.contact.gender"),
        ]
    }

    fn paths(elements: &[ElementDefinition]) -> Vec<String> {
        elements.iter().map(|e| e.key()).collect()
    }

    #[test]
    fn find_base_index_resolution_order() {
        let mut base = base();
        base.insert(2, slice("Patient.identifier", "MRN"));
        base.push(element("Patient.deceased[x]"));

        assert_eq!(find_base_index(&base, "Patient.identifier", Some("MRN")), Some(2));
        assert_eq!(find_base_index(&base, "Patient.identifier", Some("SSN")), Some(1));
        assert_eq!(find_base_index(&base, "Patient.deceasedBoolean", None), Some(8));
        assert_eq!(find_base_index(&base, "Patient.unknown", None), None);
    }

    #[test]
    fn sorts_out_of_order_differential() {
        let diff = vec![
            element("Patient"),
            element("Patient.gender"),
            element("Patient.contact.gender"),
            element("Patient.identifier"),
            element("Patient.contact.name"),
        ];
        let mut issues = Vec::new();
        let sorted = sort_differential(&diff, &base(), &mut issues);

        assert_eq!(
            paths(&sorted),
            vec![
                "Patient",
                "Patient.identifier",
                "Patient.gender",
                "Patient.contact.name",
                "Patient.contact.gender",
            ]
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn slices_follow_root_and_keep_declared_order() {
        let diff = vec![
            slice("Patient.identifier", "SSN"),
            element("Patient.name"),
            slice("Patient.identifier", "MRN"),
            element("Patient.identifier"),
        ];
        let mut issues = Vec::new();
        let sorted = sort_differential(&diff, &base(), &mut issues);

        assert_eq!(
            paths(&sorted),
            vec![
                "Patient.identifier",
                "Patient.identifier:SSN",
                "Patient.identifier:MRN",
                "Patient.name",
            ]
        );
    }

    #[test]
    fn slice_children_stay_under_their_slice() {
        let mut system = element("Patient.identifier.system");
        system.id = Some("Patient.identifier:MRN.system".to_string());
        let diff = vec![
            element("Patient"),
            element("Patient.gender"),
            slice("Patient.identifier", "MRN"),
            system,
        ];
        let mut issues = Vec::new();
        let sorted = sort_differential(&diff, &base(), &mut issues);

        assert_eq!(
            paths(&sorted),
            vec![
                "Patient",
                "Patient.identifier:MRN",
                "Patient.identifier.system",
                "Patient.gender",
            ]
        );
        assert!(issues.is_empty(), "datatype children are not reported: {:?}", issues);
    }

    #[test]
    fn unresolved_paths_sort_last_with_warning() {
        let diff = vec![
            element("Patient"),
            element("Patient.bogus"),
            element("Patient.name"),
        ];
        let mut issues = Vec::new();
        let sorted = sort_differential(&diff, &base(), &mut issues);

        assert_eq!(paths(&sorted), vec!["Patient", "Patient.name", "Patient.bogus"]);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, IssueCode::PathNotFound);
        assert_eq!(issues[0].path.as_deref(), Some("Patient.bogus"));
    }

    #[test]
    fn single_element_is_returned_unchanged() {
        let diff = vec![element("Patient.bogus")];
        let mut issues = Vec::new();
        assert_eq!(sort_differential(&diff, &base(), &mut issues), diff);
        assert!(issues.is_empty());
    }

    #[test]
    fn validates_parent_before_child() {
        let mut issues = Vec::new();
        assert!(validate_element_order(&base(), &mut issues));
        assert!(issues.is_empty());

        let broken = vec![element("Patient"), element("Patient.contact.name")];
        assert!(!validate_element_order(&broken, &mut issues));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());
    }

    #[test]
    fn assigns_missing_ids_without_overwriting() {
        let mut elements = vec![
            element("Patient"),
            ElementDefinition {
                slice_name: Some("MRN".to_string()),
                ..element("Patient.identifier")
            },
            ElementDefinition {
                id: Some("custom".to_string()),
                ..element("Patient.name")
            },
        ];
        ensure_element_ids(&mut elements, Some("Patient"));

        assert_eq!(elements[0].id.as_deref(), Some("Patient"));
        assert_eq!(elements[1].id.as_deref(), Some("Patient.identifier:MRN"));
        assert_eq!(elements[2].id.as_deref(), Some("custom"));
    }
}
