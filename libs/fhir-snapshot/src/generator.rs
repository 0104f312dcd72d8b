//! Snapshot generation for a StructureDefinition
//!
//! Loads the base definition (generating its snapshot first when it has
//! none), sorts the differential into base order, merges it and writes the
//! result back to the loader.

use crate::config::GeneratorConfig;
use crate::constraints::set_base_traceability;
use crate::error::{Error, Result};
use crate::issue::{IssueCode, SnapshotIssue, SnapshotResult};
use crate::merge::{create_merge_context, merge_snapshot, type_url, DiffTracker, MergeContext};
use crate::sorter::{ensure_element_ids, sort_differential, validate_element_order};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use strata_context::StructureDefinitionLoader;
use strata_models::{ElementDefinition, Snapshot, StructureDefinition, TypeDerivationRule};
use tracing::{debug, trace, warn};

/// Type codes that are never expanded from their own definition
const NON_EXPANDABLE_TYPES: &[&str] = &[
    "Resource",
    "DomainResource",
    "Element",
    "BackboneElement",
    "Extension",
    "Narrative",
];

/// Types that start an inheritance hierarchy and carry no baseDefinition
const ROOT_TYPES: &[&str] = &["Base", "Element", "Resource"];

/// Generates snapshots from differentials
///
/// One generator keeps one stack of the definitions it is currently
/// generating, used to detect circular base chains. Overlapping `generate`
/// calls on the same instance are not supported; `&mut self` enforces this.
pub struct SnapshotGenerator {
    loader: Arc<dyn StructureDefinitionLoader>,
    config: GeneratorConfig,
    generation_stack: Vec<String>,
}

impl SnapshotGenerator {
    pub fn new(loader: Arc<dyn StructureDefinitionLoader>) -> Self {
        Self::with_config(loader, GeneratorConfig::default())
    }

    pub fn with_config(loader: Arc<dyn StructureDefinitionLoader>, config: GeneratorConfig) -> Self {
        Self {
            loader,
            config,
            generation_stack: Vec::new(),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn loader(&self) -> &Arc<dyn StructureDefinitionLoader> {
        &self.loader
    }

    /// Generate the snapshot of `sd`
    ///
    /// Recoverable problems are returned as issues on the result. `Err` is
    /// reserved for circular base chains, the recursion bound and, with
    /// `throw_on_error`, the first error-severity issue.
    pub async fn generate(&mut self, mut sd: StructureDefinition) -> Result<SnapshotResult> {
        let issues = self.generate_in_place(&mut sd).await?;
        Ok(SnapshotResult::new(sd, issues))
    }

    /// Like [`generate`](Self::generate), writing the snapshot into `sd`
    ///
    /// On `Err`, `sd.snapshot` is cleared.
    pub async fn generate_in_place(
        &mut self,
        sd: &mut StructureDefinition,
    ) -> Result<Vec<SnapshotIssue>> {
        self.generate_inner(sd, 0).await
    }

    fn generate_inner<'a>(
        &'a mut self,
        sd: &'a mut StructureDefinition,
        depth: usize,
    ) -> BoxFuture<'a, Result<Vec<SnapshotIssue>>> {
        async move {
            if depth > self.config.max_recursion_depth {
                return Err(Error::MaxDepthExceeded {
                    depth,
                    url: sd.url.clone(),
                });
            }

            let mut issues = Vec::new();
            if let Some(issue) = validate_input(sd) {
                if self.config.throw_on_error {
                    return Err(Error::Aborted { issue });
                }
                issues.push(issue);
                return Ok(issues);
            }

            if self.generation_stack.contains(&sd.url) {
                let mut chain = self.generation_stack.clone();
                chain.push(sd.url.clone());
                warn!(chain = %chain.join(" -> "), "circular base definition chain");
                return Err(Error::CircularDependency { chain });
            }

            self.generation_stack.push(sd.url.clone());
            let outcome = self.run(sd, depth, &mut issues).await;
            self.generation_stack.pop();

            match outcome {
                Ok(()) => Ok(issues),
                Err(e) => {
                    sd.snapshot = None;
                    Err(e)
                }
            }
        }
        .boxed()
    }

    async fn run(
        &mut self,
        sd: &mut StructureDefinition,
        depth: usize,
        issues: &mut Vec<SnapshotIssue>,
    ) -> Result<()> {
        debug!(url = %sd.url, depth, "generating snapshot");

        let Some(base_url) = sd.base_definition.clone() else {
            let mut elements = sd.differential_elements().to_vec();
            ensure_element_ids(&mut elements, Some(sd.type_.as_str()));
            for element in elements.iter_mut() {
                let source = element.clone();
                set_base_traceability(element, &source);
            }
            sd.snapshot = Some(Snapshot::new(elements));
            self.commit(sd).await;
            return Ok(());
        };

        let mut base = match self.loader.load_structure_definition(&base_url).await {
            Ok(base) => base,
            Err(source) => {
                warn!(url = %sd.url, base = %base_url, error = %source, "base definition not found");
                if self.config.throw_on_error {
                    return Err(Error::BaseNotFound {
                        url: base_url,
                        source,
                    });
                }
                issues.push(
                    SnapshotIssue::error(
                        IssueCode::BaseNotFound,
                        format!("base definition {} could not be loaded", base_url),
                    )
                    .with_details(source.to_string()),
                );
                return Ok(());
            }
        };

        if !base.has_snapshot() {
            debug!(base = %base_url, "base has no snapshot, generating it first");
            let failure = match self.generate_inner(&mut base, depth + 1).await {
                Ok(_) if base.has_snapshot() => None,
                Ok(base_issues) => Some(
                    base_issues
                        .iter()
                        .find(|i| i.is_error())
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "no snapshot was produced".to_string()),
                ),
                Err(e @ (Error::CircularDependency { .. } | Error::MaxDepthExceeded { .. })) => {
                    return Err(e)
                }
                Err(e) => Some(e.to_string()),
            };
            if let Some(details) = failure {
                let issue = SnapshotIssue::error(
                    IssueCode::BaseMissingSnapshot,
                    format!("snapshot of base definition {} could not be generated", base_url),
                )
                .with_details(details);
                if self.config.throw_on_error {
                    return Err(Error::Aborted { issue });
                }
                issues.push(issue);
                return Ok(());
            }
        }

        let base_elements = Arc::new(base.snapshot_elements().to_vec());
        if sd.differential_elements().is_empty() {
            sd.snapshot = Some(Snapshot::new(base_elements.to_vec()));
            self.commit(sd).await;
            return Ok(());
        }

        let sorted = sort_differential(sd.differential_elements(), &base_elements, issues);
        let target_root = target_root(&sorted, &base_elements);

        let mut ctx = create_merge_context(sd.url.clone(), self.config.max_recursion_depth);
        ctx.allow_new_elements = sd.derivation == Some(TypeDerivationRule::Specialization);
        self.warm_up(&mut ctx, &base_elements, &sorted, depth).await;

        let (mut elements, trackers) = loop {
            ctx.reset_run();
            let (elements, trackers) =
                merge_snapshot(&mut ctx, Arc::clone(&base_elements), &sorted, &target_root);
            let pending = ctx.take_pending();
            if pending.is_empty() {
                break (elements, trackers);
            }
            for url in pending {
                self.load_datatype(&mut ctx, &url, depth).await;
            }
        };
        issues.append(&mut ctx.issues);

        if ctx.allow_new_elements {
            drop_resolved_path_warnings(issues, &trackers);
        }

        ensure_element_ids(&mut elements, Some(target_root.as_str()));
        for slicing in elements.iter_mut().filter_map(|e| e.slicing.as_mut()) {
            slicing.ordered.get_or_insert(false);
        }
        validate_element_order(&elements, issues);

        let unconsumed: Vec<String> = trackers
            .iter()
            .filter(|t| !t.consumed)
            .map(|t| t.element.key())
            .collect();
        for path in &unconsumed {
            issues.push(
                SnapshotIssue::warning(
                    IssueCode::DifferentialNotConsumed,
                    "differential element was not applied to the snapshot",
                )
                .with_path(path.clone()),
            );
        }

        if self.config.throw_on_error {
            if let Some(issue) = issues.iter().find(|i| i.is_error()) {
                return Err(Error::Aborted {
                    issue: issue.clone(),
                });
            }
            if !unconsumed.is_empty() {
                return Err(Error::UnconsumedDifferential { paths: unconsumed });
            }
        }

        sd.snapshot = Some(Snapshot::new(elements));
        self.commit(sd).await;
        Ok(())
    }

    /// Best-effort write back so later lookups see the snapshot
    async fn commit(&self, sd: &StructureDefinition) {
        if let Err(e) = self.loader.register_structure_definition(sd.clone()).await {
            debug!(url = %sd.url, error = %e, "could not register generated snapshot");
        }
        debug!(url = %sd.url, elements = sd.snapshot_elements().len(), "snapshot generated");
    }

    /// Preload the complex datatypes the base and differential refer to
    async fn warm_up(
        &mut self,
        ctx: &mut MergeContext,
        base: &[ElementDefinition],
        differential: &[ElementDefinition],
        depth: usize,
    ) {
        let urls: BTreeSet<String> = base
            .iter()
            .chain(differential)
            .flat_map(|e| e.types.iter().flatten())
            .filter(|t| is_expandable_type(&t.code))
            .map(|t| {
                t.profile
                    .as_ref()
                    .and_then(|p| p.first())
                    .cloned()
                    .unwrap_or_else(|| type_url(&t.code))
            })
            .collect();

        for url in urls {
            if !ctx.has_datatype(&url) && !ctx.is_missing(&url) {
                self.load_datatype(ctx, &url, depth).await;
            }
        }
    }

    /// Cache a datatype snapshot, or record that it cannot be had
    async fn load_datatype(&mut self, ctx: &mut MergeContext, url: &str, depth: usize) {
        let mut sd = match self.loader.load_structure_definition(url).await {
            Ok(sd) => sd,
            Err(e) => {
                trace!(url, error = %e, "datatype unavailable");
                ctx.mark_missing(url);
                return;
            }
        };

        if !sd.has_snapshot() {
            if let Err(e) = self.generate_inner(&mut sd, depth + 1).await {
                trace!(url, error = %e, "datatype snapshot could not be generated");
                ctx.mark_missing(url);
                return;
            }
        }

        if sd.has_snapshot() {
            trace!(url, "datatype cached");
            let elements = sd.snapshot.map(|s| s.element).unwrap_or_default();
            ctx.cache_datatype(url, elements);
        } else {
            ctx.mark_missing(url);
        }
    }
}

fn validate_input(sd: &StructureDefinition) -> Option<SnapshotIssue> {
    if sd.url.is_empty() {
        return Some(SnapshotIssue::error(
            IssueCode::InvalidConstraint,
            "StructureDefinition has no url",
        ));
    }
    if sd.base_definition.is_none() && !ROOT_TYPES.contains(&sd.type_.as_str()) {
        return Some(
            SnapshotIssue::error(
                IssueCode::InvalidConstraint,
                format!("StructureDefinition of type '{}' has no baseDefinition", sd.type_),
            )
            .with_path(sd.type_.clone()),
        );
    }
    None
}

fn is_expandable_type(code: &str) -> bool {
    code.starts_with(|c: char| c.is_ascii_uppercase()) && !NON_EXPANDABLE_TYPES.contains(&code)
}

/// Root path of the generated snapshot: the differential's, else the base's
fn target_root(differential: &[ElementDefinition], base: &[ElementDefinition]) -> String {
    differential
        .first()
        .or_else(|| base.first())
        .and_then(|e| e.path.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// New elements of a specialization are legitimately absent from the base
fn drop_resolved_path_warnings(issues: &mut Vec<SnapshotIssue>, trackers: &[DiffTracker]) {
    let consumed: HashSet<&str> = trackers
        .iter()
        .filter(|t| t.consumed)
        .map(|t| t.element.path.as_str())
        .collect();
    issues.retain(|issue| {
        issue.code != IssueCode::PathNotFound
            || issue.is_error()
            || !issue.path.as_deref().is_some_and(|p| consumed.contains(p))
    });
}
