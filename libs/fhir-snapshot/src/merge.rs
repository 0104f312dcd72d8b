//! Lockstep merge of a sorted differential onto a base snapshot
//!
//! The base is walked in order. Each base element is matched against the
//! differential trackers inside the current window, cloned, constrained and
//! pushed onto the result. Children are walked with the window narrowed to
//! the differential elements that sit beneath the emitted element. A leaf
//! whose children the differential reaches into is expanded from its
//! datatype snapshot (or from the element a `contentReference` points at).

use crate::constraints::{merge_constraints, set_base_traceability};
use crate::issue::{IssueCode, SnapshotIssue};
use crate::path::{
    extract_choice_type_name, get_child_scope, get_diff_matches, has_inner_diff_matches,
    is_descendant, is_inner_match, owner_context, parent_path, rewrite_id, rewrite_path,
    slice_context, tail_segment, type_code_matches_choice_name, Scope,
};
use crate::slicing::{
    diffs_constrain_types, get_slice_siblings, handle_existing_slicing, handle_new_slicing,
    reslice_parent, skip_subtree, validate_reslice,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use strata_models::{ElementDefinition, ElementDefinitionSlicing};
use tracing::trace;

const CORE_TYPE_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// A differential element plus whether the merge has applied it
#[derive(Debug, Clone, PartialEq)]
pub struct DiffTracker {
    pub element: ElementDefinition,
    pub consumed: bool,
}

impl DiffTracker {
    pub fn new(element: ElementDefinition) -> Self {
        Self {
            element,
            consumed: false,
        }
    }
}

/// State for merging one profile
pub struct MergeContext {
    pub profile_url: String,
    /// Deepest scope nesting the walk descends into
    pub max_depth: usize,
    /// Differential elements without a base counterpart become new elements
    /// (type specializations)
    pub allow_new_elements: bool,
    pub issues: Vec<SnapshotIssue>,
    datatypes: HashMap<String, Arc<Vec<ElementDefinition>>>,
    missing_types: HashSet<String>,
    pending_types: BTreeSet<String>,
    root_base: Arc<Vec<ElementDefinition>>,
}

pub fn create_merge_context(profile_url: impl Into<String>, max_depth: usize) -> MergeContext {
    MergeContext {
        profile_url: profile_url.into(),
        max_depth,
        allow_new_elements: false,
        issues: Vec::new(),
        datatypes: HashMap::new(),
        missing_types: HashSet::new(),
        pending_types: BTreeSet::new(),
        root_base: Arc::new(Vec::new()),
    }
}

impl MergeContext {
    /// Forget the issues and pending types of a previous merge run
    pub fn reset_run(&mut self) {
        self.issues.clear();
        self.pending_types.clear();
    }

    /// Datatypes a merge run needed but found neither cached nor missing
    pub fn take_pending(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_types).into_iter().collect()
    }

    pub fn cache_datatype(&mut self, url: impl Into<String>, elements: Vec<ElementDefinition>) {
        self.datatypes.insert(url.into(), Arc::new(elements));
    }

    pub fn has_datatype(&self, url: &str) -> bool {
        self.datatypes.contains_key(url)
    }

    pub fn mark_missing(&mut self, url: impl Into<String>) {
        self.missing_types.insert(url.into());
    }

    pub fn is_missing(&self, url: &str) -> bool {
        self.missing_types.contains(url)
    }

    pub fn set_root_base(&mut self, base: Arc<Vec<ElementDefinition>>) {
        self.root_base = base;
    }
}

/// Canonical URL of a type code; absolute codes (logical models) pass through
pub fn type_url(code: &str) -> String {
    if code.contains("://") {
        code.to_string()
    } else {
        format!("{}{}", CORE_TYPE_BASE, code)
    }
}

/// Definition to expand a single-typed element from: its first profile, else its type
pub fn expansion_url(element: &ElementDefinition) -> Option<String> {
    match element.types.as_deref() {
        Some([single]) => Some(
            single
                .profile
                .as_ref()
                .and_then(|p| p.first())
                .cloned()
                .unwrap_or_else(|| type_url(&single.code)),
        ),
        _ => None,
    }
}

/// Maps base paths and ids onto the location they are being merged into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    base_path: String,
    base_id: String,
    target_path: String,
    target_id: String,
}

impl Prefix {
    /// Map the base root onto the profile's root
    pub fn root(base_root: &ElementDefinition, target_root: &str) -> Self {
        Self {
            base_path: base_root.path.clone(),
            base_id: base_root.id.clone().unwrap_or_else(|| base_root.key()),
            target_path: target_root.to_string(),
            target_id: target_root.to_string(),
        }
    }

    /// Map everything below `base` to below `dest`
    pub fn anchored(base: &ElementDefinition, dest: &ElementDefinition) -> Self {
        Self {
            base_path: base.path.clone(),
            base_id: base.id.clone().unwrap_or_else(|| base.key()),
            target_path: dest.path.clone(),
            target_id: dest.id.clone().unwrap_or_else(|| dest.key()),
        }
    }

    pub fn path(&self, path: &str) -> String {
        rewrite_path(path, &self.base_path, &self.target_path)
    }

    pub fn id(&self, element: &ElementDefinition) -> String {
        match element.id.as_deref() {
            Some(id) => rewrite_id(id, &self.base_id, &self.target_id),
            None => rewrite_path(&element.key(), &self.base_path, &self.target_id),
        }
    }
}

/// Clone a base element into place, untouched by any differential
fn inherit(element: &ElementDefinition, prefix: &Prefix) -> ElementDefinition {
    let mut dest = element.clone();
    dest.path = prefix.path(&element.path);
    dest.id = Some(prefix.id(element));
    set_base_traceability(&mut dest, element);
    dest
}

fn is_container(element: &ElementDefinition) -> bool {
    matches!(
        element.type_codes().as_slice(),
        [] | ["BackboneElement"] | ["Element"]
    )
}

/// Merge `trackers` (inside `window`) onto `base[scope]`, appending to `result`
#[allow(clippy::too_many_arguments)]
pub fn process_paths(
    ctx: &mut MergeContext,
    result: &mut Vec<ElementDefinition>,
    base: &[ElementDefinition],
    scope: Scope,
    trackers: &mut [DiffTracker],
    window: Option<Scope>,
    prefix: &Prefix,
    depth: usize,
) {
    let mut merger = Merger {
        ctx,
        trackers,
        result,
    };
    merger.walk(base, scope, window, prefix, depth);
}

/// Merge a whole sorted differential onto a whole base snapshot
///
/// Returns the merged elements and the trackers, whose `consumed` flags tell
/// which differential elements were applied.
pub fn merge_snapshot(
    ctx: &mut MergeContext,
    base: Arc<Vec<ElementDefinition>>,
    differential: &[ElementDefinition],
    target_root: &str,
) -> (Vec<ElementDefinition>, Vec<DiffTracker>) {
    let mut trackers: Vec<DiffTracker> = differential
        .iter()
        .cloned()
        .map(DiffTracker::new)
        .collect();
    let mut result = Vec::with_capacity(base.len() + differential.len());
    ctx.set_root_base(Arc::clone(&base));

    if let Some(root) = base.first() {
        let prefix = Prefix::root(root, target_root);
        let window = (!trackers.is_empty()).then(|| Scope::new(0, trackers.len() - 1));
        process_paths(
            ctx,
            &mut result,
            &base,
            Scope::new(0, base.len() - 1),
            &mut trackers,
            window,
            &prefix,
            0,
        );
    }
    (result, trackers)
}

/// What the new slices of one slicing root share
struct SliceGroup<'g> {
    root: usize,
    slices: &'g [usize],
    root_id: String,
    known: Vec<&'g str>,
    target_path: String,
    window: Option<Scope>,
}

/// `name` is `parent` or one of its re-slices
fn in_family(name: &str, parent: &str) -> bool {
    name == parent || name.strip_prefix(parent).is_some_and(|rest| rest.starts_with('/'))
}

struct Merger<'a> {
    ctx: &'a mut MergeContext,
    trackers: &'a mut [DiffTracker],
    result: &'a mut Vec<ElementDefinition>,
}

impl Merger<'_> {
    fn walk(
        &mut self,
        base: &[ElementDefinition],
        scope: Scope,
        window: Option<Scope>,
        prefix: &Prefix,
        depth: usize,
    ) {
        if depth > self.ctx.max_depth {
            self.ctx.issues.push(
                SnapshotIssue::error(
                    IssueCode::InternalError,
                    format!("maximum merge depth {} exceeded", self.ctx.max_depth),
                )
                .with_path(prefix.target_path.clone()),
            );
            return;
        }

        let mut i = scope.start;
        while i <= scope.end && i < base.len() {
            let element = &base[i];

            if element.is_slice() {
                // slice without its root in this scope
                let dest = inherit(element, prefix);
                self.emit(base, i, dest, None, depth, true);
                i = skip_subtree(base, i);
                continue;
            }

            let slices = get_slice_siblings(base, i);
            let next = skip_subtree(base, slices.last().copied().unwrap_or(i));
            let target_path = prefix.path(&element.path);
            let target_id = prefix.id(element);
            let matches: Vec<usize> = window
                .map(|w| get_diff_matches(self.trackers, &target_path, w.start, w.end))
                .unwrap_or_default()
                .into_iter()
                .filter(|&d| self.owned_by(d, &target_id))
                .collect();

            if matches.is_empty() && slices.is_empty() {
                let dest = inherit(element, prefix);
                let child_window = window.and_then(|w| {
                    self.descendant_window(&target_path, &target_id, w.start, w.end, false)
                });
                self.emit(base, i, dest, child_window, depth, true);
            } else {
                self.merge_group(base, i, &slices, &matches, window, prefix, depth);
            }

            i = next;
        }
    }

    /// A slicing root, its base slices and the differential slices that match it
    #[allow(clippy::too_many_arguments)]
    fn merge_group(
        &mut self,
        base: &[ElementDefinition],
        root: usize,
        slices: &[usize],
        matches: &[usize],
        window: Option<Scope>,
        prefix: &Prefix,
        depth: usize,
    ) {
        let element = &base[root];
        let target_path = prefix.path(&element.path);

        let (unsliced, sliced): (Vec<usize>, Vec<usize>) = matches
            .iter()
            .copied()
            .partition(|&d| !self.trackers[d].element.is_slice());

        let base_names: Vec<&str> = slices
            .iter()
            .filter_map(|&s| base[s].slice_name.as_deref())
            .collect();
        let new_slices: Vec<usize> = sliced
            .iter()
            .copied()
            .filter(|&d| {
                let name = self.trackers[d].element.slice_name.as_deref().unwrap_or_default();
                !base_names.contains(&name)
            })
            .collect();
        let new_names: Vec<String> = new_slices
            .iter()
            .filter_map(|&d| self.trackers[d].element.slice_name.clone())
            .collect();
        let new_name_refs: Vec<&str> = new_names.iter().map(String::as_str).collect();

        let mut root_id = None;
        if unsliced.is_empty() {
            let mut dest = inherit(element, prefix);
            self.apply_slicing(element, &mut dest, None, !sliced.is_empty(), &new_name_refs);
            let id = dest.id.clone().unwrap_or_else(|| dest.key());
            let child_window = window.and_then(|w| {
                let end = sliced.first().map_or(w.end, |&s| s.saturating_sub(1));
                if sliced.first() == Some(&w.start) {
                    None
                } else {
                    self.descendant_window(&target_path, &id, w.start, end, false)
                }
            });
            root_id = Some(id);
            self.emit(base, root, dest, child_window, depth, true);
        } else {
            for (n, &d) in unsliced.iter().enumerate() {
                self.trackers[d].consumed = true;
                let diff = self.trackers[d].element.clone();
                let mut dest = inherit(element, prefix);
                merge_constraints(&mut dest, &diff, &mut self.ctx.issues);
                if element.is_choice_type() && diff.path != target_path {
                    self.narrow_choice(&mut dest, &target_path, &diff);
                }
                if n == 0 {
                    self.apply_slicing(
                        element,
                        &mut dest,
                        diff.slicing.as_ref(),
                        !sliced.is_empty(),
                        &new_name_refs,
                    );
                    root_id = dest.id.clone();
                }
                let child_window = self.run_after(d);
                self.emit(base, root, dest, child_window, depth, true);
            }
        }

        let group = SliceGroup {
            root,
            slices,
            root_id: root_id.unwrap_or_else(|| prefix.id(element)),
            known: base_names
                .iter()
                .copied()
                .chain(new_name_refs.iter().copied())
                .collect(),
            target_path,
            window,
        };
        let mut pending = new_slices;

        for (k, &s) in slices.iter().enumerate() {
            let slice = &base[s];
            let matched = sliced.iter().copied().find(|&d| {
                !self.trackers[d].consumed
                    && self.trackers[d].element.slice_name == slice.slice_name
            });
            let mut dest = inherit(slice, prefix);
            let slice_path = dest.path.clone();
            let slice_id = dest.id.clone().unwrap_or_else(|| dest.key());
            let run = match matched {
                Some(d) => {
                    self.trackers[d].consumed = true;
                    let diff = self.trackers[d].element.clone();
                    merge_constraints(&mut dest, &diff, &mut self.ctx.issues);
                    self.run_after(d)
                }
                None => None,
            };
            let child_window = run.or_else(|| {
                window.and_then(|w| {
                    self.descendant_window(&slice_path, &slice_id, w.start, w.end, true)
                })
            });
            self.emit(base, s, dest, child_window, depth, true);

            // re-slices follow the last base slice of their parent's family
            let name = slice.slice_name.as_deref().unwrap_or_default();
            let next = slices.get(k + 1).and_then(|&n| base[n].slice_name.as_deref());
            let (due, rest): (Vec<usize>, Vec<usize>) = pending.iter().copied().partition(|&d| {
                self.trackers[d]
                    .element
                    .slice_name
                    .as_deref()
                    .and_then(reslice_parent)
                    .is_some_and(|p| in_family(name, p) && !next.is_some_and(|n| in_family(n, p)))
            });
            pending = rest;
            for d in due {
                self.emit_new_slice(base, &group, d, prefix, depth);
            }
        }

        for d in pending {
            self.emit_new_slice(base, &group, d, prefix, depth);
        }
    }

    fn emit_new_slice(
        &mut self,
        base: &[ElementDefinition],
        group: &SliceGroup<'_>,
        d: usize,
        prefix: &Prefix,
        depth: usize,
    ) {
        if self.trackers[d].consumed {
            return;
        }
        self.trackers[d].consumed = true;
        let diff = self.trackers[d].element.clone();
        let name = diff.slice_name.clone().unwrap_or_default();
        validate_reslice(&name, &group.known, &group.target_path, &mut self.ctx.issues);

        let template = reslice_parent(&name)
            .and_then(|parent| {
                group
                    .slices
                    .iter()
                    .copied()
                    .find(|&s| base[s].slice_name.as_deref() == Some(parent))
            })
            .unwrap_or(group.root);
        let mut dest = inherit(&base[template], prefix);
        dest.slicing = None;
        let id = format!("{}:{}", group.root_id, name);
        dest.id = Some(id.clone());
        dest.slice_name = Some(name);
        merge_constraints(&mut dest, &diff, &mut self.ctx.issues);

        let own_type = diffs_constrain_types(&[&diff], &base[template]);
        let child_window = self.run_after(d).or_else(|| {
            group.window.and_then(|w| {
                let path = prefix.path(&base[template].path);
                self.descendant_window(&path, &id, w.start, w.end, true)
            })
        });
        self.emit(base, template, dest, child_window, depth, !own_type);
    }

    fn apply_slicing(
        &mut self,
        element: &ElementDefinition,
        dest: &mut ElementDefinition,
        diff_slicing: Option<&ElementDefinitionSlicing>,
        has_slices: bool,
        new_names: &[&str],
    ) {
        let issues = &mut self.ctx.issues;
        match element.slicing.as_ref() {
            Some(base_slicing) => {
                if diff_slicing.is_some() || !new_names.is_empty() {
                    dest.slicing = Some(handle_existing_slicing(
                        base_slicing,
                        diff_slicing,
                        new_names,
                        &dest.path,
                        issues,
                    ));
                }
            }
            None => {
                if diff_slicing.is_some() || has_slices {
                    dest.slicing = Some(handle_new_slicing(element, &dest.path, diff_slicing, issues));
                }
            }
        }
    }

    /// Rename a choice element to the concrete variant the differential uses
    fn narrow_choice(
        &mut self,
        dest: &mut ElementDefinition,
        choice_path: &str,
        diff: &ElementDefinition,
    ) {
        let type_name = extract_choice_type_name(choice_path, &diff.path);
        dest.path = diff.path.clone();
        dest.id = Some(match dest.id.as_deref().and_then(parent_path) {
            Some(parent) => format!("{}.{}", parent, tail_segment(&diff.path)),
            None => diff.path.clone(),
        });

        if diff.types.is_some() {
            return;
        }
        if let (Some(name), Some(types)) = (type_name, dest.types.as_mut()) {
            types.retain(|t| type_code_matches_choice_name(&t.code, name));
            if types.is_empty() {
                self.ctx.issues.push(
                    SnapshotIssue::error(
                        IssueCode::TypeIncompatible,
                        format!("type {} is not allowed by {}", name, choice_path),
                    )
                    .with_path(diff.path.clone()),
                );
            }
        }
    }

    /// Push `dest` and merge whatever lies beneath it
    ///
    /// Children come from `base[index]`'s child scope when
    /// `use_base_children` is set and the scope exists, otherwise from the
    /// element's datatype if the differential reaches below it.
    fn emit(
        &mut self,
        base: &[ElementDefinition],
        index: usize,
        dest: ElementDefinition,
        window: Option<Scope>,
        depth: usize,
        use_base_children: bool,
    ) {
        let anchor = Prefix::anchored(&base[index], &dest);
        let path = dest.path.clone();
        let id = dest.id.clone().unwrap_or_else(|| dest.key());
        let new_children = self.ctx.allow_new_elements && is_container(&dest);
        self.result.push(dest);
        let pushed = self.result.len() - 1;

        let child_scope = if use_base_children {
            get_child_scope(base, index)
        } else {
            None
        };
        match child_scope {
            Some(scope) => self.walk(base, scope, window, &anchor, depth + 1),
            None => {
                if let Some(w) = window {
                    let inner = self.descendant_window(&path, &id, w.start, w.end, false);
                    if !new_children && inner.is_some() {
                        self.expand_leaf(pushed, w, depth);
                    }
                }
            }
        }

        if new_children {
            if let Some(w) = window {
                self.append_new_children(&path, w);
            }
        }
    }

    /// Walk the children of a leaf from its datatype or content reference
    fn expand_leaf(&mut self, pushed: usize, window: Scope, depth: usize) {
        let dest = &self.result[pushed];
        let path = dest.path.clone();

        if let Some(reference) = dest.content_reference.clone() {
            let target = reference.rsplit_once('#').map_or(reference.as_str(), |(_, t)| t);
            let root_base = Arc::clone(&self.ctx.root_base);
            let found = root_base
                .iter()
                .position(|e| e.id.as_deref() == Some(target))
                .or_else(|| root_base.iter().position(|e| e.path == target))
                .and_then(|i| get_child_scope(&root_base, i).map(|scope| (i, scope)));
            match found {
                Some((i, scope)) => {
                    let prefix = Prefix::anchored(&root_base[i], &self.result[pushed]);
                    self.walk(&root_base, scope, Some(window), &prefix, depth + 1);
                }
                None => self.ctx.issues.push(
                    SnapshotIssue::error(
                        IssueCode::PathNotFound,
                        format!("contentReference {} does not resolve", reference),
                    )
                    .with_path(path),
                ),
            }
            return;
        }

        let Some(url) = expansion_url(dest) else {
            let count = dest.type_codes().len();
            self.ctx.issues.push(
                SnapshotIssue::error(
                    IssueCode::PathNotFound,
                    format!("cannot resolve children of an element with {} types", count),
                )
                .with_path(path),
            );
            return;
        };

        if let Some(elements) = self.ctx.datatypes.get(&url).cloned() {
            if let Some(scope) = get_child_scope(&elements, 0) {
                let prefix = Prefix::anchored(&elements[0], &self.result[pushed]);
                self.walk(&elements, scope, Some(window), &prefix, depth + 1);
            }
        } else if self.ctx.is_missing(&url) {
            self.ctx.issues.push(
                SnapshotIssue::error(
                    IssueCode::PathNotFound,
                    format!("type {} could not be loaded to resolve child elements", url),
                )
                .with_path(path),
            );
        } else {
            trace!(%url, %path, "deferring datatype expansion");
            self.ctx.pending_types.insert(url);
        }
    }

    /// Take differential descendants of `path` as new elements, in order
    fn append_new_children(&mut self, path: &str, window: Scope) {
        let end = window.end.min(self.trackers.len().saturating_sub(1));
        for i in window.start..=end {
            let tracker = &mut self.trackers[i];
            if tracker.consumed || !is_descendant(path, &tracker.element.path) {
                continue;
            }
            tracker.consumed = true;
            let source = tracker.element.clone();
            let mut element = source.clone();
            if element.id.is_none() {
                element.id = Some(element.key());
            }
            set_base_traceability(&mut element, &source);
            self.result.push(element);
        }
    }

    /// Unconsumed trackers in `[start, end]` beneath `path` that belong
    /// under the element `id`, as one window
    ///
    /// With `owned_only`, trackers whose id does not place them inside a
    /// slice are left out.
    fn descendant_window(
        &self,
        path: &str,
        id: &str,
        start: usize,
        end: usize,
        owned_only: bool,
    ) -> Option<Scope> {
        if start > end || !has_inner_diff_matches(&self.trackers, path, start, end) {
            return None;
        }
        let end = end.min(self.trackers.len() - 1);
        let mut inner = (start..=end).filter(|&i| {
            !self.trackers[i].consumed
                && is_inner_match(path, &self.trackers[i].element.path)
                && self.beneath(i, id, owned_only)
        });
        let first = inner.next()?;
        let last = inner.last().unwrap_or(first);
        Some(Scope::new(first, last))
    }

    /// Slice context the id of tracker `d` places it in
    fn tracker_owner(&self, d: usize) -> Option<&str> {
        self.trackers[d].element.id.as_deref().and_then(owner_context)
    }

    /// Tracker `d` may constrain the element identified by `id`
    fn owned_by(&self, d: usize, id: &str) -> bool {
        match self.tracker_owner(d) {
            Some(owner) => owner_context(id) == Some(owner),
            None => true,
        }
    }

    /// Tracker `d` may constrain something below the element identified by `id`
    fn beneath(&self, d: usize, id: &str, owned_only: bool) -> bool {
        match self.tracker_owner(d) {
            Some(owner) => {
                slice_context(id) == Some(owner)
                    || owner.strip_prefix(id).is_some_and(|rest| rest.starts_with('.'))
            }
            None => !owned_only,
        }
    }

    /// The contiguous run of differential descendants following tracker `d`
    fn run_after(&self, d: usize) -> Option<Scope> {
        let path = &self.trackers[d].element.path;
        let count = self.trackers[d + 1..]
            .iter()
            .take_while(|t| is_inner_match(path, &t.element.path))
            .count();
        (count > 0).then(|| Scope::new(d + 1, d + count))
    }
}
