//! Plugin declaration schema
//!
//! A plugin manifest carries a type tag and a type-specific config mapping.
//! Decoding is strict: unknown fields and unknown type tags are rejected.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Typed plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "lowercase")]
pub enum PluginConfig {
    Cli(CliConfig),
    Download(DownloadConfig),
    Postrender(PostrenderConfig),
}

/// Config of a plugin that adds a subcommand
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CliConfig {
    /// Single-line usage text shown in help
    pub usage: String,
    /// Short description shown in the command list
    pub short_help: String,
    /// Long message shown in the command's own help
    pub long_help: String,
    /// Do not forward global flags to the plugin
    pub ignore_flags: bool,
}

/// Config of a plugin that fetches charts over extra protocols
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DownloadConfig {
    pub downloaders: Vec<Downloader>,
}

/// One downloader command and the URL schemes it handles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Downloader {
    pub command: String,
    pub protocols: Vec<String>,
}

/// Config of a plugin that post-processes rendered manifests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PostrenderConfig {
    pub postrender_args: Vec<String>,
}

impl PluginConfig {
    /// Decode the config mapping of a plugin of type `type_tag`
    ///
    /// A null config decodes to the variant's defaults.
    pub fn from_value(type_tag: &str, config: serde_yaml::Value) -> Result<Self> {
        let config = match config {
            serde_yaml::Value::Null => serde_yaml::Value::Mapping(Default::default()),
            other => other,
        };

        match type_tag {
            "cli" => decode(type_tag, config).map(Self::Cli),
            "download" => decode(type_tag, config).map(Self::Download),
            "postrender" => decode(type_tag, config).map(Self::Postrender),
            other => Err(CoreError::PluginConfig {
                plugin_type: other.to_string(),
                message: "unknown plugin type (expected cli, download or postrender)"
                    .to_string(),
            }),
        }
    }

    /// Decode a config mapping given as YAML text
    pub fn from_yaml(type_tag: &str, yaml: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(type_tag, value)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Cli(_) => "cli",
            Self::Download(_) => "download",
            Self::Postrender(_) => "postrender",
        }
    }

    pub fn validate(&self) -> Result<()> {
        let outcome = match self {
            Self::Cli(_) | Self::Postrender(_) => Ok(()),
            Self::Download(config) => config.validate(),
        };

        outcome.map_err(|message| CoreError::PluginConfig {
            plugin_type: self.type_name().to_string(),
            message,
        })
    }
}

impl DownloadConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        for (i, downloader) in self.downloaders.iter().enumerate() {
            if downloader.command.is_empty() {
                return Err(format!("downloader {} has empty command", i));
            }
            if downloader.protocols.is_empty() {
                return Err(format!("downloader {} has no protocols", i));
            }
            if let Some(j) = downloader.protocols.iter().position(String::is_empty) {
                return Err(format!("downloader {} has empty protocol at index {}", i, j));
            }
        }
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(type_tag: &str, config: serde_yaml::Value) -> Result<T> {
    serde_yaml::from_value(config).map_err(|e| CoreError::PluginConfig {
        plugin_type: type_tag.to_string(),
        message: e.to_string(),
    })
}
