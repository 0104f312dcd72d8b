//! Element path algebra
//!
//! Paths are dotted (`Patient.name.given`) and compared segment by segment:
//! `Patient.nam` is never a parent of `Patient.name`. Slice names live only in
//! element ids (`Patient.identifier:MRN`), never in paths.

use crate::merge::DiffTracker;
use strata_models::ElementDefinition;

const CHOICE_SUFFIX: &str = "[x]";

/// Inclusive index range into an element sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub start: usize,
    pub end: usize,
}

impl Scope {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index <= self.end
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

pub fn path_matches(a: &str, b: &str) -> bool {
    a == b
}

/// Remainder of `candidate` below `parent`, if it is a strict descendant
fn strip_parent<'a>(parent: &str, candidate: &'a str) -> Option<&'a str> {
    candidate
        .strip_prefix(parent)?
        .strip_prefix('.')
        .filter(|rest| !rest.is_empty())
}

pub fn is_direct_child(parent: &str, candidate: &str) -> bool {
    strip_parent(parent, candidate).is_some_and(|rest| !rest.contains('.'))
}

pub fn is_descendant(parent: &str, candidate: &str) -> bool {
    strip_parent(parent, candidate).is_some()
}

/// Number of separators: `Patient` is 0, `Patient.name` is 1
pub fn path_depth(path: &str) -> usize {
    path.matches('.').count()
}

pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('.').map(|pos| &path[..pos])
}

pub fn tail_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

pub fn is_choice_type_path(path: &str) -> bool {
    tail_segment(path).ends_with(CHOICE_SUFFIX)
}

/// Type suffix of a concrete choice path: `value[x]` + `valueQuantity` gives `Quantity`
pub fn extract_choice_type_name<'a>(choice_path: &str, concrete_path: &'a str) -> Option<&'a str> {
    if !is_choice_type_path(choice_path) {
        return None;
    }
    let stem = choice_path.strip_suffix(CHOICE_SUFFIX)?;
    let suffix = concrete_path.strip_prefix(stem)?;
    let first = suffix.chars().next()?;
    if first.is_ascii_uppercase() && !suffix.contains('.') {
        Some(suffix)
    } else {
        None
    }
}

pub fn matches_choice_type(choice_path: &str, concrete_path: &str) -> bool {
    extract_choice_type_name(choice_path, concrete_path).is_some()
}

/// True when a type code is named by a choice suffix (`string` by `String`)
pub fn type_code_matches_choice_name(code: &str, type_name: &str) -> bool {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => {
            type_name.len() == code.len()
                && type_name.starts_with(first.to_ascii_uppercase())
                && type_name[first.len_utf8()..] == *chars.as_str()
        }
        None => false,
    }
}

pub fn has_slice_name(id: &str) -> bool {
    extract_slice_name(id).is_some()
}

/// Slice name carried by the last segment of an element id
pub fn extract_slice_name(id: &str) -> Option<&str> {
    let (_, slice) = tail_segment(id).split_once(':')?;
    (!slice.is_empty()).then_some(slice)
}

/// Innermost sliced prefix of an element id: `A.b:s.c` gives `A.b:s`
pub fn slice_context(id: &str) -> Option<&str> {
    let colon = id.rfind(':')?;
    let end = id[colon..].find('.').map_or(id.len(), |i| colon + i);
    Some(&id[..end])
}

/// Slice context of the element holding `id`; `None` outside any slice
pub fn owner_context(id: &str) -> Option<&str> {
    parent_path(id).and_then(slice_context)
}

/// Children of `elements[index]`: the contiguous run of descendants that follows it
pub fn get_child_scope(elements: &[ElementDefinition], index: usize) -> Option<Scope> {
    let parent = &elements.get(index)?.path;
    let end = elements[index + 1..]
        .iter()
        .take_while(|e| is_descendant(parent, &e.path))
        .count();
    (end > 0).then(|| Scope::new(index + 1, index + end))
}

/// Trackers in `[start, end]` matching `path` exactly or as a concrete choice variant
pub fn get_diff_matches(trackers: &[DiffTracker], path: &str, start: usize, end: usize) -> Vec<usize> {
    let choice = is_choice_type_path(path);
    window(trackers, start, end)
        .filter(|&i| {
            let candidate = &trackers[i].element.path;
            path_matches(path, candidate) || (choice && matches_choice_type(path, candidate))
        })
        .collect()
}

/// True if `candidate` lies strictly below `path`, looking through choice variants
pub fn is_inner_match(path: &str, candidate: &str) -> bool {
    if is_descendant(path, candidate) {
        return true;
    }
    if !is_choice_type_path(path) {
        return false;
    }
    let Some(stem) = parent_path(path) else {
        return false;
    };
    let Some(rest) = strip_parent(stem, candidate) else {
        return false;
    };
    match rest.split_once('.') {
        Some((head, _)) => matches_choice_type(path, &format!("{}.{}", stem, head)),
        None => false,
    }
}

pub fn has_inner_diff_matches(trackers: &[DiffTracker], path: &str, start: usize, end: usize) -> bool {
    window(trackers, start, end).any(|i| is_inner_match(path, &trackers[i].element.path))
}

fn window(trackers: &[DiffTracker], start: usize, end: usize) -> impl Iterator<Item = usize> + '_ {
    let end = end.min(trackers.len().saturating_sub(1));
    (start..=end).filter(move |&i| i < trackers.len() && !trackers[i].consumed)
}

/// Move a path from under `source_prefix` to under `target_prefix`
///
/// `Identifier.system` with `Identifier` -> `Patient.identifier` becomes
/// `Patient.identifier.system`. Paths outside the prefix are returned as is.
pub fn rewrite_path(source_path: &str, source_prefix: &str, target_prefix: &str) -> String {
    if source_path == source_prefix {
        return target_prefix.to_string();
    }
    match source_path
        .strip_prefix(source_prefix)
        .filter(|rest| rest.starts_with('.'))
    {
        Some(rest) => format!("{}{}", target_prefix, rest),
        None => source_path.to_string(),
    }
}

/// Like [`rewrite_path`] but also accepts a `:sliceName` boundary, for ids
pub fn rewrite_id(source_id: &str, source_prefix: &str, target_prefix: &str) -> String {
    if source_id == source_prefix {
        return target_prefix.to_string();
    }
    match source_id
        .strip_prefix(source_prefix)
        .filter(|rest| rest.starts_with('.') || rest.starts_with(':'))
    {
        Some(rest) => format!("{}{}", target_prefix, rest),
        None => source_id.to_string(),
    }
}
