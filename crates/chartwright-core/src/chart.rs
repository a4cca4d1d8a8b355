//! Chart definition
//!
//! A [`Chart`] is an already-assembled, in-memory tree: the caller (a loader,
//! a fetcher, a test) builds it before handing it to the engine. Nothing in
//! here touches the filesystem.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, Result};
use crate::values::Values;

/// Directory that holds template files inside a chart
pub const TEMPLATES_DIR: &str = "templates";

/// Directory segment inserted between a parent and its subcharts in chart paths
pub const CHARTS_DIR: &str = "charts";

/// The one template rendered as release notes instead of a manifest
pub const NOTES_PATH: &str = "templates/NOTES.txt";

/// A chart: metadata, templates, default values, subcharts and static files
#[derive(Debug, Clone)]
pub struct Chart {
    /// Chart metadata
    pub metadata: ChartMetadata,

    /// Template files, in declared order
    pub templates: Vec<TemplateFile>,

    /// Default values (`values.yaml`)
    pub values: Values,

    /// Subcharts, in declared order
    pub dependencies: Vec<Dependency>,

    /// Non-template static files
    pub files: Vec<ChartFile>,
}

/// Chart metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// API version of the chart format
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    /// Application version
    #[serde(default)]
    pub app_version: Option<String>,

    /// Description
    #[serde(default)]
    pub description: Option<String>,
}

fn default_api_version() -> String {
    "v2".to_string()
}

impl ChartMetadata {
    /// Create metadata from a name and a SemVer string
    pub fn new(name: impl Into<String>, version: &str) -> Result<Self> {
        Ok(Self {
            api_version: default_api_version(),
            name: name.into(),
            version: Version::parse(version)?,
            app_version: None,
            description: None,
        })
    }

    /// Parse metadata from a `Chart.yaml` document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
        self.app_version = Some(app_version.into());
        self
    }
}

/// A template file, path relative to the chart root (e.g. `templates/service.yaml`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub path: String,
    pub content: String,
}

impl TemplateFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// File name without directory
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Partials (`_helpers.tpl` and friends) only hold named templates
    pub fn is_partial(&self) -> bool {
        self.file_name().starts_with('_')
    }

    /// Post-install notes, only ever at the top of `templates/`
    pub fn is_notes(&self) -> bool {
        self.path == NOTES_PATH
    }
}

/// A static (non-template) file shipped with the chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFile {
    pub path: String,
    pub data: Vec<u8>,
}

impl ChartFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// A subchart entry
#[derive(Debug, Clone)]
pub struct Dependency {
    /// The subchart itself
    pub chart: Chart,

    /// Alias name (overrides the chart name for value scoping and output paths)
    pub alias: Option<String>,

    /// Runtime condition, a dot path evaluated against the parent's values
    ///
    /// Example: `redis.enabled` checks `values.redis.enabled`.
    pub condition: Option<String>,
}

impl Dependency {
    pub fn new(chart: Chart) -> Self {
        Self {
            chart,
            alias: None,
            condition: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Get the effective name (alias if set, otherwise chart name)
    #[inline]
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.chart.metadata.name)
    }

    /// Check whether this subchart is enabled given the parent's merged values
    ///
    /// No condition means always enabled.
    pub fn is_enabled(&self, parent_values: &serde_json::Value) -> bool {
        match &self.condition {
            Some(condition) => evaluate_condition(condition, parent_values),
            None => true,
        }
    }
}

impl Chart {
    /// Create an empty chart
    pub fn new(metadata: ChartMetadata) -> Self {
        Self {
            metadata,
            templates: Vec::new(),
            values: Values::new(),
            dependencies: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn with_template(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.templates.push(TemplateFile::new(path, content));
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Set default values from a `values.yaml` document
    pub fn with_values_yaml(mut self, yaml: &str) -> Result<Self> {
        let document = format!("{}/values.yaml", self.metadata.name);
        self.values = Values::from_yaml_document(yaml, &document)?;
        Ok(self)
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Shorthand for an unconditional, unaliased subchart
    pub fn with_subchart(self, chart: Chart) -> Self {
        self.with_dependency(Dependency::new(chart))
    }

    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.push(ChartFile::new(path, data));
        self
    }

    /// Number of template files in this chart and all of its subcharts
    pub fn total_templates(&self) -> usize {
        self.templates.len()
            + self
                .dependencies
                .iter()
                .map(|d| d.chart.total_templates())
                .sum::<usize>()
    }

    /// Check structural invariants of the whole tree
    ///
    /// Names must be non-empty, template paths unique within a chart and
    /// subchart effective names unique within their parent.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart name must not be empty".to_string(),
            });
        }

        let mut paths = HashSet::new();
        for template in &self.templates {
            if !paths.insert(template.path.as_str()) {
                return Err(CoreError::InvalidChart {
                    message: format!(
                        "duplicate template path '{}' in chart '{}'",
                        template.path, self.metadata.name
                    ),
                });
            }
        }

        let mut names = HashSet::new();
        for dep in &self.dependencies {
            if !names.insert(dep.effective_name()) {
                return Err(CoreError::InvalidChart {
                    message: format!(
                        "duplicate subchart '{}' in chart '{}'",
                        dep.effective_name(),
                        self.metadata.name
                    ),
                });
            }
            dep.chart.validate()?;
        }

        Ok(())
    }
}

/// Path of a subchart below its parent: `<parent>/charts/<name>`
pub fn subchart_path(parent_path: &str, name: &str) -> String {
    format!("{}/{}/{}", parent_path, CHARTS_DIR, name)
}

/// Evaluate a simple dot-path condition against values
///
/// Returns `true` if the path exists and is truthy.
pub fn evaluate_condition(condition: &str, values: &serde_json::Value) -> bool {
    let mut current = values;
    for part in condition.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return false,
        }
    }

    match current {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
