//! Live resource lookup capability
//!
//! Templates reach cluster state only through [`ResourceLookup`]. The engine
//! ships two implementations: [`NoClusterLookup`] for offline renders and
//! [`StaticLookup`] for fixtures.

use chartwright_core::Capabilities;
use indexmap::IndexMap;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

/// A lookup that could not be answered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct LookupFailure {
    pub message: String,
}

impl LookupFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Query interface to a live resource store
pub trait ResourceLookup: Send + Sync {
    /// Fetch one resource, or a `{"items": [...]}` list when `name` is empty
    ///
    /// `Ok(None)` means nothing was found; templates then see an empty mapping.
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JsonValue>, LookupFailure>;

    /// Capabilities reported by the store, if it can tell
    fn capabilities(&self) -> Option<Capabilities> {
        None
    }
}

/// Lookup used when no cluster is reachable: nothing is ever found
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClusterLookup;

impl ResourceLookup for NoClusterLookup {
    fn lookup(
        &self,
        _api_version: &str,
        _kind: &str,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<JsonValue>, LookupFailure> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResourceKey {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

/// In-memory resource store
#[derive(Debug, Default, Clone)]
pub struct StaticLookup {
    resources: IndexMap<ResourceKey, JsonValue>,
    capabilities: Option<Capabilities>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(
        mut self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
        resource: JsonValue,
    ) -> Self {
        let key = ResourceKey {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.resources.insert(key, resource);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

impl ResourceLookup for StaticLookup {
    fn lookup(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JsonValue>, LookupFailure> {
        if !name.is_empty() {
            let key = ResourceKey {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            };
            return Ok(self.resources.get(&key).cloned());
        }

        // Empty namespace lists across all namespaces
        let items: Vec<JsonValue> = self
            .resources
            .iter()
            .filter(|(key, _)| {
                key.api_version == api_version
                    && key.kind == kind
                    && (namespace.is_empty() || key.namespace == namespace)
            })
            .map(|(_, resource)| resource.clone())
            .collect();

        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(json!({ "items": items })))
        }
    }

    fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.clone()
    }
}
