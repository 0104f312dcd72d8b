//! In-memory StructureDefinition registry
//!
//! Definitions are keyed by canonical URL (without version). Inheritance
//! chains are memoized in an LRU cache that is dropped whenever the registry
//! changes.

use crate::error::{Error, Result};
use crate::loader::{split_versioned_url, StructureDefinitionLoader};
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use strata_models::StructureDefinition;
use tokio::sync::RwLock;
use tracing::{debug, warn};

const DEFAULT_CHAIN_CACHE_CAPACITY: usize = 512;

/// Counters reported by [`InMemoryLoader::statistics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStatistics {
    pub definitions: usize,
    pub with_snapshot: usize,
    pub lookups: u64,
    pub misses: u64,
    pub chain_cache_hits: u64,
}

pub struct InMemoryLoader {
    definitions: RwLock<HashMap<String, Arc<StructureDefinition>>>,
    chain_cache: Mutex<LruCache<String, Arc<Vec<String>>>>,
    lookups: AtomicU64,
    misses: AtomicU64,
    chain_cache_hits: AtomicU64,
}

impl Default for InMemoryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::with_chain_cache_capacity(DEFAULT_CHAIN_CACHE_CAPACITY)
    }

    pub fn with_chain_cache_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            definitions: RwLock::new(HashMap::new()),
            chain_cache: Mutex::new(LruCache::new(capacity)),
            lookups: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            chain_cache_hits: AtomicU64::new(0),
        }
    }

    /// Build a registry that already holds the given definitions
    pub fn from_definitions(definitions: impl IntoIterator<Item = StructureDefinition>) -> Self {
        let loader = Self::new();
        let map = definitions
            .into_iter()
            .map(|sd| (sd.url.clone(), Arc::new(sd)))
            .collect();
        Self {
            definitions: RwLock::new(map),
            ..loader
        }
    }

    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.definitions.read().await.is_empty()
    }

    /// Register every definition in the iterator, returning how many were stored
    pub async fn preload_core_definitions(
        &self,
        definitions: impl IntoIterator<Item = StructureDefinition> + Send,
    ) -> Result<usize> {
        let mut count = 0;
        {
            let mut store = self.definitions.write().await;
            for sd in definitions {
                if sd.url.is_empty() {
                    return Err(Error::InvalidStructureDefinition(format!(
                        "StructureDefinition '{}' has no url",
                        sd.name
                    )));
                }
                store.insert(sd.url.clone(), Arc::new(sd));
                count += 1;
            }
        }
        self.invalidate_chains();
        debug!(count, "preloaded core definitions");
        Ok(count)
    }

    /// Load every `*.json` file in `dir`
    ///
    /// Accepts single StructureDefinitions and Bundles of them; other
    /// resource types are skipped. Returns the number of definitions stored.
    pub async fn load_directory(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut definitions = Vec::new();
        for path in &paths {
            let text = std::fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| Error::Loader(format!("{}: {}", path.display(), e)))?;
            collect_definitions(value, &mut definitions)
                .map_err(|e| Error::Loader(format!("{}: {}", path.display(), e)))?;
        }

        debug!(
            dir = %dir.display(),
            files = paths.len(),
            definitions = definitions.len(),
            "loaded definitions from directory"
        );
        self.preload_core_definitions(definitions).await
    }

    /// Canonical URLs from `url` up to the root, following `baseDefinition`
    ///
    /// A missing ancestor or a cycle ends the chain.
    pub async fn resolve_inheritance_chain(&self, url: &str) -> Result<Vec<String>> {
        let (canonical, _) = split_versioned_url(url);
        {
            let mut cache = self.chain_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(chain) = cache.get(canonical) {
                self.chain_cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(chain.as_ref().clone());
            }
        }

        let store = self.definitions.read().await;
        if !store.contains_key(canonical) {
            return Err(Error::StructureDefinitionNotFound(url.to_string()));
        }

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(canonical.to_string());
        while let Some(next) = current.take() {
            if !seen.insert(next.clone()) {
                warn!(url = %next, "inheritance cycle detected");
                break;
            }
            current = match store.get(&next) {
                Some(sd) => sd
                    .base_definition
                    .as_deref()
                    .map(|base| split_versioned_url(base).0.to_string()),
                None => {
                    debug!(url = %next, "ancestor not registered, chain truncated");
                    None
                }
            };
            chain.push(next);
        }
        drop(store);

        let mut cache = self.chain_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(canonical.to_string(), Arc::new(chain.clone()));
        Ok(chain)
    }

    pub async fn statistics(&self) -> LoaderStatistics {
        let store = self.definitions.read().await;
        LoaderStatistics {
            definitions: store.len(),
            with_snapshot: store.values().filter(|sd| sd.has_snapshot()).count(),
            lookups: self.lookups.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            chain_cache_hits: self.chain_cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Drop every definition, cached chain and counter
    pub async fn dispose(&self) {
        self.definitions.write().await.clear();
        self.invalidate_chains();
        self.lookups.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.chain_cache_hits.store(0, Ordering::Relaxed);
    }

    fn invalidate_chains(&self) {
        let mut cache = self.chain_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }
}

#[async_trait]
impl StructureDefinitionLoader for InMemoryLoader {
    async fn load_structure_definition(&self, url: &str) -> Result<StructureDefinition> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let (canonical, version) = split_versioned_url(url);
        let store = self.definitions.read().await;

        let found = store.get(canonical).filter(|sd| match (version, &sd.version) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        });

        match found {
            Some(sd) => Ok(sd.as_ref().clone()),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(Error::StructureDefinitionNotFound(url.to_string()))
            }
        }
    }

    async fn register_structure_definition(&self, sd: StructureDefinition) -> Result<()> {
        if sd.url.is_empty() {
            return Err(Error::InvalidStructureDefinition(format!(
                "StructureDefinition '{}' has no url",
                sd.name
            )));
        }
        let url = sd.url.clone();
        self.definitions.write().await.insert(url.clone(), Arc::new(sd));
        self.invalidate_chains();
        debug!(url = %url, "registered StructureDefinition");
        Ok(())
    }
}

fn collect_definitions(value: Value, out: &mut Vec<StructureDefinition>) -> Result<()> {
    match value.get("resourceType").and_then(Value::as_str) {
        Some("StructureDefinition") => {
            out.push(StructureDefinition::from_value(&value)?);
        }
        Some("Bundle") => {
            let entries = value
                .get("entry")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for entry in entries {
                if let Some(resource) = entry.get("resource") {
                    collect_definitions(resource.clone(), out)?;
                }
            }
        }
        other => {
            debug!(resource_type = ?other, "skipping non-StructureDefinition resource");
        }
    }
    Ok(())
}
