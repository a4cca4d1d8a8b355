//! Chartwright Engine - Jinja2 templating for chart trees
//!
//! This crate renders a whole chart tree in one pass:
//! - per-chart values scoping with global propagation (via `chartwright-core`)
//! - named templates shared across every chart of the tree
//! - Helm-compatible filters and functions, `include` and `tpl`
//! - human-readable error messages with suggestions

pub mod config;
pub mod engine;
pub mod error;
pub mod files_object;
pub mod filters;
pub mod functions;
pub mod lookup;
pub mod registry;
pub mod renderer;
pub mod suggestions;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, ErrorCategory, TemplateError, TemplateErrorKind};
pub use lookup::{LookupFailure, NoClusterLookup, ResourceLookup, StaticLookup};
pub use renderer::{CancellationToken, RenderOutput, RenderPhase};
pub use suggestions::{AVAILABLE_FILTERS, AVAILABLE_FUNCTIONS};
