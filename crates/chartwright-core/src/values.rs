//! Values handling with deep merge support
//!
//! Merge rules, applied key by key:
//! - both sides are mappings: merge recursively
//! - otherwise the overlay replaces the base (sequences are never concatenated)
//! - a null in the overlay deletes the key, even when the base held a mapping
//!
//! [`Values::layer`] is the tombstone-preserving variant used to pre-combine
//! override layers: nulls survive it, so that applying the combined layer with
//! [`Values::merge`] deletes exactly what applying each layer in turn would.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use thiserror::Error;

use crate::chart::{Chart, subchart_path};
use crate::error::{CoreError, Result};

/// Key holding values shared with every chart of the tree
pub const GLOBAL_KEY: &str = "global";

/// Flags a layered mapping that replaces its base wholesale
///
/// Set by [`Values::layer`] when a mapping lands on a null or a non-mapping;
/// [`Values::merge`] honours and strips it.
const REPLACE_MARKER: &str = "\u{0}replace";

/// Name used for the user override document in error messages
pub const USER_VALUES_DOCUMENT: &str = "user-supplied values";

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

/// Failure of a dotted path lookup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("key '{segment}' not found (path '{path}')")]
    NotFound { path: String, segment: String },

    #[error("cannot index into {found} with '{segment}' (path '{path}')")]
    TypeMismatch {
        path: String,
        segment: String,
        found: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullPolicy {
    /// Null in the overlay removes the key
    Delete,
    /// Null in the overlay is kept as a deletion marker
    Keep,
}

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_document(&content, &path.as_ref().display().to_string())
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Parse a values document that must be a mapping
    ///
    /// An empty document yields empty values. `document` names the source in
    /// error messages.
    pub fn from_yaml_document(yaml: &str, document: &str) -> Result<Self> {
        let value: JsonValue =
            serde_yaml::from_str(yaml).map_err(|e| CoreError::ValuesParse {
                document: document.to_string(),
                message: e.to_string(),
            })?;

        match value {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::Object(_) => Ok(Self(value)),
            other => Err(CoreError::ValuesParse {
                document: document.to_string(),
                message: format!("expected a mapping, found {}", kind_name(&other)),
            }),
        }
    }

    /// Deep merge another Values into this one, deleting keys the overlay nulls out
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0, NullPolicy::Delete);
    }

    /// Combine an override layer on top of this one, keeping nulls as deletion markers
    ///
    /// A mapping layered over a null or a non-mapping is flagged as a
    /// replacement, so a later [`merge`](Self::merge) does not resurrect keys
    /// the null deleted.
    pub fn layer(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0, NullPolicy::Keep);
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
        Ok(())
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        self.lookup(path).ok()
    }

    /// Get a value by dotted path, reporting why the path does not resolve
    ///
    /// Numeric segments index into sequences (`ports.0.name`).
    pub fn lookup(&self, path: &str) -> std::result::Result<&JsonValue, PathError> {
        let mut current = &self.0;

        for segment in path.split('.').filter(|s| !s.is_empty()) {
            current = match current {
                JsonValue::Object(map) => map.get(segment).ok_or_else(|| PathError::NotFound {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?,
                JsonValue::Array(items) => {
                    let index: usize = segment.parse().map_err(|_| PathError::TypeMismatch {
                        path: path.to_string(),
                        segment: segment.to_string(),
                        found: "sequence",
                    })?;
                    items.get(index).ok_or_else(|| PathError::NotFound {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    })?
                }
                other => {
                    return Err(PathError::TypeMismatch {
                        path: path.to_string(),
                        segment: segment.to_string(),
                        found: kind_name(other),
                    });
                }
            };
        }

        Ok(current)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Whether the root is a mapping (or null, which counts as an empty one)
    pub fn is_mapping(&self) -> bool {
        matches!(self.0, JsonValue::Object(_) | JsonValue::Null)
    }

    /// Split the `global` entry off, returning `(values without global, global)`
    fn split_global(&self) -> (Map<String, JsonValue>, Option<JsonValue>) {
        let mut map = match &self.0 {
            JsonValue::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let global = map.remove(GLOBAL_KEY);
        (map, global)
    }
}

/// Final values for every enabled node of a chart tree, keyed by chart path
///
/// Iteration order is the traversal order: parent before children, children in
/// declared dependency order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedValues {
    nodes: IndexMap<String, Values>,
}

impl ResolvedValues {
    /// Final values of the node at `chart_path`
    pub fn get(&self, chart_path: &str) -> Option<&Values> {
        self.nodes.get(chart_path)
    }

    /// Whether the node was resolved (i.e. it exists and is enabled)
    pub fn contains(&self, chart_path: &str) -> bool {
        self.nodes.contains_key(chart_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Values)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Merge the defaults of a chart tree with a user override
    ///
    /// For every enabled node:
    /// 1. non-global defaults are merged with the override scoped to the node
    ///    (the root gets the user override, a subchart gets the entry named
    ///    after it in its parent's layered values)
    /// 2. `global` is the merge of every `global` default along the ancestor
    ///    chain, top-down, with the user override's `global` applied last
    ///
    /// Subcharts whose condition is false are skipped together with their
    /// whole subtree.
    pub fn resolve(chart: &Chart, overrides: &Values) -> Result<Self> {
        if !overrides.is_mapping() {
            return Err(CoreError::ValuesParse {
                document: USER_VALUES_DOCUMENT.to_string(),
                message: format!("expected a mapping, found {}", kind_name(&overrides.0)),
            });
        }

        let (user_values, user_global) = overrides.split_global();
        let user_global = expect_mapping(user_global, chart.name(), GLOBAL_KEY)?;

        let mut resolved = Self::default();
        let mut walk = TreeWalk {
            user_global: Values(JsonValue::Object(user_global)),
            resolved: &mut resolved,
        };
        walk.visit(
            chart,
            chart.name().to_string(),
            Values(JsonValue::Object(user_values)),
            &Values::new(),
        )?;

        Ok(resolved)
    }
}

struct TreeWalk<'a> {
    user_global: Values,
    resolved: &'a mut ResolvedValues,
}

impl TreeWalk<'_> {
    fn visit(
        &mut self,
        chart: &Chart,
        path: String,
        incoming: Values,
        ancestor_globals: &Values,
    ) -> Result<()> {
        if !chart.values.is_mapping() {
            return Err(CoreError::ValuesParse {
                document: format!("{}/values.yaml", path),
                message: format!("expected a mapping, found {}", kind_name(&chart.values.0)),
            });
        }

        let (defaults, own_global) = chart.values.split_global();
        let own_global = expect_mapping(own_global, &path, GLOBAL_KEY)?;

        // ancestor defaults, then this chart's defaults
        let mut chain_globals = ancestor_globals.clone();
        chain_globals.merge(&Values(JsonValue::Object(own_global)));

        let mut global = chain_globals.clone();
        global.merge(&self.user_global);

        let defaults = Values(JsonValue::Object(defaults));

        let mut layered = defaults.clone();
        layered.layer(&incoming);

        let mut final_values = defaults;
        final_values.merge(&incoming);
        if let JsonValue::Object(map) = &mut final_values.0 {
            map.insert(GLOBAL_KEY.to_string(), global.into_inner());
        }

        tracing::trace!(chart = %path, "resolved values");

        let enabled: Vec<_> = chart
            .dependencies
            .iter()
            .filter(|dep| {
                let enabled = dep.is_enabled(&final_values.0);
                if !enabled {
                    tracing::debug!(
                        chart = %path,
                        subchart = dep.effective_name(),
                        condition = dep.condition.as_deref().unwrap_or_default(),
                        "subchart disabled by condition"
                    );
                }
                enabled
            })
            .collect();

        self.resolved.nodes.insert(path.clone(), final_values);

        for dep in enabled {
            let name = dep.effective_name();
            let child_path = subchart_path(&path, name);

            let scoped = layered
                .0
                .as_object()
                .and_then(|map| map.get(name))
                .cloned();
            let mut scoped = expect_mapping(scoped, &child_path, name)?;
            // a null subchart entry means "no override", never "drop the defaults"
            scoped.remove(REPLACE_MARKER);
            if scoped.remove(GLOBAL_KEY).is_some() {
                tracing::warn!(
                    chart = %child_path,
                    "ignoring 'global' nested under subchart values; set it at the top level"
                );
            }

            self.visit(
                &dep.chart,
                child_path,
                Values(JsonValue::Object(scoped)),
                &chain_globals,
            )?;
        }

        Ok(())
    }
}

/// Accept a mapping, treat absent/null as empty, reject anything else
fn expect_mapping(
    value: Option<JsonValue>,
    chart: &str,
    key: &str,
) -> Result<Map<String, JsonValue>> {
    match value {
        None | Some(JsonValue::Null) => Ok(Map::new()),
        Some(JsonValue::Object(map)) => Ok(map),
        Some(other) => Err(CoreError::ValuesMerge {
            chart: chart.to_string(),
            key: key.to_string(),
            message: format!("expected a mapping, found {}", kind_name(&other)),
        }),
    }
}

/// Human-readable name of a value's type
pub fn kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "sequence",
        JsonValue::Object(_) => "mapping",
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue, nulls: NullPolicy) {
    if is_replacement(overlay) {
        *base = prepare(overlay, nulls);
        return;
    }

    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() && nulls == NullPolicy::Delete {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value, nulls),
                    None => {
                        base_map.insert(key.clone(), prepare(overlay_value, nulls));
                    }
                }
            }
        }
        // mapping over a tombstone or non-mapping: replace on apply
        (base, JsonValue::Object(overlay_map)) if nulls == NullPolicy::Keep => {
            let mut replacement = overlay_map.clone();
            replacement.insert(REPLACE_MARKER.to_string(), JsonValue::Bool(true));
            *base = JsonValue::Object(replacement);
        }
        (base, overlay) => {
            *base = prepare(overlay, nulls);
        }
    }
}

/// Whether a layered mapping must replace its base instead of merging into it
fn is_replacement(value: &JsonValue) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.contains_key(REPLACE_MARKER))
}

/// Copy an overlay subtree, dropping deletion and replacement markers when
/// they are applied
fn prepare(value: &JsonValue, nulls: NullPolicy) -> JsonValue {
    match (value, nulls) {
        (JsonValue::Object(map), NullPolicy::Delete) => JsonValue::Object(
            map.iter()
                .filter(|(k, v)| !v.is_null() && k.as_str() != REPLACE_MARKER)
                .map(|(k, v)| (k.clone(), prepare(v, nulls)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Set a nested value by path
fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(Map::new());
    }

    if let JsonValue::Object(map) = value {
        if remaining.is_empty() {
            map.insert(key.to_string(), new_value);
        } else {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            set_nested(entry, remaining, new_value);
        }
    }
}

/// Parse `key=value` override arguments
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| CoreError::ValuesParse {
            document: format!("override '{}'", arg),
            message: "expected key=value".to_string(),
        })?;

        // Try to parse as JSON, fallback to string
        let json_value = if val == "true" {
            JsonValue::Bool(true)
        } else if val == "false" {
            JsonValue::Bool(false)
        } else if val == "null" {
            JsonValue::Null
        } else if let Ok(num) = val.parse::<i64>() {
            JsonValue::Number(num.into())
        } else if let Ok(num) = val.parse::<f64>() {
            serde_json::Number::from_f64(num)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(val.to_string()))
        } else if val.starts_with('[') || val.starts_with('{') {
            serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
        } else {
            JsonValue::String(val.to_string())
        };

        values.set(key, json_value)?;
    }

    Ok(values)
}
