//! Snapshot generator configuration

use serde::{Deserialize, Serialize};

/// Options recognised by [`crate::SnapshotGenerator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    /// Abort on the first error-severity issue instead of collecting issues
    pub throw_on_error: bool,
    /// Bound on nested base generation and on merge scope depth
    pub max_recursion_depth: usize,
    /// Signals that the caller will build a canonical model from the result
    pub generate_canonical: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            throw_on_error: false,
            max_recursion_depth: 50,
            generate_canonical: false,
        }
    }
}

impl GeneratorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct GeneratorConfigBuilder {
    cfg: Option<GeneratorConfig>,
}

impl GeneratorConfigBuilder {
    pub fn throw_on_error(mut self, throw_on_error: bool) -> Self {
        self.cfg().throw_on_error = throw_on_error;
        self
    }

    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.cfg().max_recursion_depth = depth;
        self
    }

    pub fn generate_canonical(mut self, generate_canonical: bool) -> Self {
        self.cfg().generate_canonical = generate_canonical;
        self
    }

    pub fn build(self) -> GeneratorConfig {
        self.cfg.unwrap_or_default()
    }

    fn cfg(&mut self) -> &mut GeneratorConfig {
        self.cfg.get_or_insert_with(GeneratorConfig::default)
    }
}
