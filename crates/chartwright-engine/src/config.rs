//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::functions::DEFAULT_MAX_INCLUDE_DEPTH;

/// Settings of an [`Engine`](crate::Engine)
///
/// ```yaml
/// strict: true
/// sandbox: false
/// maxIncludeDepth: 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Fail on undefined variables instead of rendering them empty
    pub strict: bool,

    /// Strip environment-dependent functions (`lookup`, `now`, `uuidv4`, `randalphanum`)
    pub sandbox: bool,

    /// Maximum nesting of `include` and `tpl` calls
    pub max_include_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict: true,
            sandbox: false,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }
}
