use crate::error::Result;
use async_trait::async_trait;
use strata_models::StructureDefinition;

/// Source of StructureDefinitions addressed by canonical URL
///
/// URLs may carry a `|version` suffix; how the version is honoured is up to
/// the implementation.
#[async_trait]
pub trait StructureDefinitionLoader: Send + Sync {
    /// Load a definition, failing with `StructureDefinitionNotFound` when no
    /// source resolves the URL.
    async fn load_structure_definition(&self, url: &str) -> Result<StructureDefinition>;

    /// Insert or replace a definition by its URL.
    async fn register_structure_definition(&self, sd: StructureDefinition) -> Result<()>;

    async fn get_structure_definition(&self, url: &str) -> Option<StructureDefinition> {
        self.load_structure_definition(url).await.ok()
    }

    async fn has_structure_definition(&self, url: &str) -> bool {
        self.get_structure_definition(url).await.is_some()
    }
}

/// Split `url|version` into its parts
pub fn split_versioned_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('|') {
        Some((canonical, version)) if !version.is_empty() => (canonical, Some(version)),
        Some((canonical, _)) => (canonical, None),
        None => (url, None),
    }
}
