//! Template rendering context
//!
//! One [`RenderContext`] is built per enabled chart node and reused for every
//! template of that node; only [`TemplateInfo`] changes between templates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::chart::{ChartMetadata, TEMPLATES_DIR};
use crate::files::Files;
use crate::release::ReleaseInfo;
use crate::values::Values;

/// Names bound at the root of every template context
///
/// Top-level value keys are exposed at the root as well, but never shadow these.
pub const RESERVED_NAMES: &[&str] = &["values", "chart", "release", "capabilities", "template", "files"];

/// Per-chart context available to templates
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Path of the chart node (`app`, `app/charts/db`)
    pub chart_path: String,

    /// Final merged values of this node
    pub values: Values,

    /// This node's own metadata
    pub chart: ChartInfo,

    /// Release information, identical for every node
    pub release: ReleaseInfo,

    /// Cluster capabilities
    pub capabilities: Capabilities,

    /// Currently executing template
    pub template: TemplateInfo,

    /// Static files of this chart
    pub files: Files,
}

/// Chart information for templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub api_version: String,
    pub app_version: Option<String>,
    pub description: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            api_version: meta.api_version.clone(),
            app_version: meta.app_version.clone(),
            description: meta.description.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Kubernetes version
    pub kube_version: KubeVersion,

    /// Available API versions
    pub api_versions: Vec<String>,
}

impl Capabilities {
    pub fn new(kube_version: KubeVersion) -> Self {
        Self {
            kube_version,
            api_versions: Vec::new(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_versions.push(api_version.into());
        self
    }

    pub fn has_api_version(&self, api_version: &str) -> bool {
        self.api_versions.iter().any(|v| v == api_version)
    }
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        // Offline renders assume a recent stable release
        Self {
            version: "v1.28.0".to_string(),
            major: "1".to_string(),
            minor: "28".to_string(),
        }
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let parts: Vec<&str> = version.split('.').collect();

        Self {
            version: format!("v{}", version),
            major: parts.first().unwrap_or(&"1").to_string(),
            minor: parts.get(1).unwrap_or(&"28").to_string(),
        }
    }
}

/// Current template information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateInfo {
    /// Output key of the template (`app/templates/service.yaml`)
    pub name: String,

    /// Templates directory of the owning chart (`app/templates`)
    pub base_path: String,
}

impl RenderContext {
    /// Build the context of one chart node
    pub fn new(
        chart_path: impl Into<String>,
        metadata: &ChartMetadata,
        values: Values,
        release: ReleaseInfo,
    ) -> Self {
        let chart_path = chart_path.into();
        let template = TemplateInfo {
            name: String::new(),
            base_path: format!("{}/{}", chart_path, TEMPLATES_DIR),
        };

        Self {
            chart_path,
            values,
            chart: ChartInfo::from(metadata),
            release,
            capabilities: Capabilities::default(),
            template,
            files: Files::empty(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_files(mut self, files: Files) -> Self {
        self.files = files;
        self
    }

    /// Same context, pointed at another template of this chart
    pub fn for_template(&self, relative_path: &str) -> Self {
        let mut ctx = self.clone();
        ctx.template.name = self.output_key(relative_path);
        ctx
    }

    /// Output key of a template of this chart
    pub fn output_key(&self, relative_path: &str) -> String {
        format!("{}/{}", self.chart_path, relative_path)
    }

    /// Root entries of the template context, `files` excepted
    ///
    /// Top-level value keys come first, then the reserved names overwrite any
    /// value key they collide with.
    pub fn root_entries(&self) -> Map<String, JsonValue> {
        let mut root = match self.values.inner() {
            JsonValue::Object(map) => map.clone(),
            _ => Map::new(),
        };

        root.insert("values".to_string(), self.values.inner().clone());
        root.insert("chart".to_string(), to_json(&self.chart));
        root.insert("release".to_string(), to_json(&self.release));
        root.insert("capabilities".to_string(), to_json(&self.capabilities));
        root.insert("template".to_string(), to_json(&self.template));
        root.remove("files");
        root
    }
}

fn to_json<T: Serialize>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or(JsonValue::Null)
}
