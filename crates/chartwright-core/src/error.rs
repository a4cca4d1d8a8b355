//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid chart: {message}")]
    InvalidChart { message: String },

    #[error("Failed to parse {document}: {message}")]
    ValuesParse { document: String, message: String },

    #[error("Values merge error in chart '{chart}' at key '{key}': {message}")]
    ValuesMerge {
        chart: String,
        key: String,
        message: String,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("File access error for '{path}': {message}")]
    FileAccess { path: String, message: String },

    #[error("Invalid glob pattern: {message}")]
    GlobPattern { message: String },

    #[error("Invalid {plugin_type} plugin config: {message}")]
    PluginConfig {
        plugin_type: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
