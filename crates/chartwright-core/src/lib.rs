//! Chartwright Core - data model for chart rendering
//!
//! This crate provides the foundational types used by the engine:
//! - `Chart`: an assembled chart tree (templates, default values, subcharts, files)
//! - `Values`: configuration values with deep merge support
//! - `ResolvedValues`: final values of every chart node of a tree
//! - `RenderContext`: per-chart template rendering context
//! - `PluginConfig`: plugin declaration schema

pub mod chart;
pub mod context;
pub mod error;
pub mod files;
pub mod plugin;
pub mod release;
pub mod values;

pub use chart::{Chart, ChartFile, ChartMetadata, Dependency, TemplateFile, subchart_path};
pub use context::{Capabilities, ChartInfo, KubeVersion, RenderContext, TemplateInfo};
pub use error::{CoreError, Result};
pub use files::{ChartFiles, FileEntry, FileProvider, Files};
pub use plugin::{CliConfig, DownloadConfig, Downloader, PluginConfig, PostrenderConfig};
pub use release::ReleaseInfo;
pub use values::{GLOBAL_KEY, PathError, ResolvedValues, Values, parse_set_values};
