//! Chart tree renderer
//!
//! Drives one render through its phases:
//! Initialize → BuildContexts → Execute → Collect → Finalize.
//! Rendering is all-or-nothing: the first failure discards every document
//! already produced.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chartwright_core::{Chart, Files, ReleaseInfo, RenderContext, ResolvedValues, Values};
use indexmap::IndexMap;
use minijinja::{Environment, Value, context};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::files_object::FilesObject;
use crate::functions::IncludeScope;
use crate::registry::{ConcreteTemplate, TemplateRegistry, enabled_nodes};

/// Phase of a render, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderPhase {
    /// Reject empty trees, merge values
    Initialize,
    /// One context per enabled chart, template registry, environment
    BuildContexts,
    /// Evaluate concrete templates in registry order
    Execute,
    /// Key outputs, drop empty documents
    Collect,
    /// Hand the output over
    Finalize,
}

/// Cooperative cancellation flag, checked between template evaluations
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Rendered documents of a whole chart tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOutput {
    /// Output key (`app/charts/db/templates/svc.yaml`) → document, in render order
    pub manifests: IndexMap<String, String>,

    /// Root chart `templates/NOTES.txt`, when present and not empty
    pub notes: Option<String>,
}

impl RenderOutput {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.manifests.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    /// All manifests as one YAML stream, each headed by its source
    pub fn to_multi_document(&self) -> String {
        let mut out = String::new();
        for (key, manifest) in &self.manifests {
            out.push_str("---\n# Source: ");
            out.push_str(key);
            out.push('\n');
            out.push_str(manifest.trim_end());
            out.push('\n');
        }
        out
    }
}

/// Root context of a template: reserved names, top-level value keys, `files`
pub(crate) fn template_context(ctx: &RenderContext) -> Value {
    context! {
        files => Value::from_object(FilesObject::new(ctx.files.clone())),
        ..Value::from_serialize(ctx.root_entries())
    }
}

/// Whether a rendered document carries anything
fn is_blank(rendered: &str) -> bool {
    let trimmed = rendered.trim();
    trimmed.is_empty() || trimmed == "---"
}

/// Everything Execute needs, produced by BuildContexts
struct Prepared {
    contexts: HashMap<String, RenderContext>,
    registry: TemplateRegistry,
    env: Environment<'static>,
}

pub(crate) struct Renderer<'a> {
    engine: &'a Engine,
    chart: &'a Chart,
    release: &'a ReleaseInfo,
    token: &'a CancellationToken,
    phase: RenderPhase,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        chart: &'a Chart,
        release: &'a ReleaseInfo,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            engine,
            chart,
            release,
            token,
            phase: RenderPhase::Initialize,
        }
    }

    pub(crate) fn run(mut self, overrides: &Values) -> Result<RenderOutput> {
        let result = self.run_phases(overrides);
        if let Err(err) = &result {
            tracing::debug!(
                chart = %self.chart.name(),
                phase = ?self.phase,
                category = ?err.category(),
                "render failed"
            );
        }
        result
    }

    fn run_phases(&mut self, overrides: &Values) -> Result<RenderOutput> {
        let resolved = self.initialize(overrides)?;
        let prepared = self.build_contexts(&resolved)?;
        let rendered = self.execute(&prepared)?;
        let output = self.collect(rendered);
        Ok(self.finalize(output))
    }

    fn enter(&mut self, phase: RenderPhase) {
        self.phase = phase;
        tracing::debug!(chart = %self.chart.name(), phase = ?phase, "render phase");
    }

    fn initialize(&mut self, overrides: &Values) -> Result<ResolvedValues> {
        self.enter(RenderPhase::Initialize);

        if self.chart.name().trim().is_empty() {
            return Err(EngineError::InvalidChart {
                reason: "root chart has an empty name".to_string(),
            });
        }
        if self.chart.total_templates() == 0 {
            return Err(EngineError::InvalidChart {
                reason: format!("chart tree '{}' has no template files", self.chart.name()),
            });
        }
        self.chart.validate()?;

        Ok(ResolvedValues::resolve(self.chart, overrides)?)
    }

    fn build_contexts(&mut self, resolved: &ResolvedValues) -> Result<Prepared> {
        self.enter(RenderPhase::BuildContexts);

        let nodes = enabled_nodes(self.chart, resolved);
        let capabilities = self.engine.capabilities();

        let mut contexts = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            let values = resolved.get(&node.path).cloned().unwrap_or_default();
            let ctx = RenderContext::new(
                node.path.clone(),
                &node.chart.metadata,
                values,
                self.release.clone(),
            )
            .with_capabilities(capabilities.clone())
            .with_files(Files::for_chart(&node.chart.files));
            contexts.insert(node.path.clone(), ctx);
        }

        let registry = TemplateRegistry::build(&nodes)?;
        let scope = IncludeScope::new(
            registry.include_targets(),
            self.engine.config().max_include_depth,
        );
        let mut env = self.engine.create_environment(scope);
        registry.load_into(&mut env)?;

        Ok(Prepared {
            contexts,
            registry,
            env,
        })
    }

    fn execute<'p>(&mut self, prepared: &'p Prepared) -> Result<Vec<(&'p ConcreteTemplate, String)>> {
        self.enter(RenderPhase::Execute);

        let mut rendered = Vec::with_capacity(prepared.registry.concrete().len());
        for template in prepared.registry.concrete() {
            if self.token.is_cancelled() {
                tracing::debug!(template = %template.key, "render cancelled");
                return Err(EngineError::Cancelled);
            }

            let Some(chart_ctx) = prepared.contexts.get(&template.chart) else {
                return Err(EngineError::InvalidChart {
                    reason: format!("no context for chart '{}'", template.chart),
                });
            };
            let ctx = chart_ctx.for_template(&template.path);

            tracing::trace!(template = %template.key, "evaluating template");
            let output = prepared
                .env
                .get_template(&template.key)
                .and_then(|tmpl| tmpl.render(template_context(&ctx)))
                .map_err(|err| {
                    prepared
                        .registry
                        .error_at(&err, &template.key, Some(ctx.values.inner()))
                })?;

            rendered.push((template, output));
        }

        Ok(rendered)
    }

    fn collect(&mut self, rendered: Vec<(&ConcreteTemplate, String)>) -> RenderOutput {
        self.enter(RenderPhase::Collect);

        let mut output = RenderOutput::default();
        for (template, document) in rendered {
            if is_blank(&document) {
                tracing::trace!(template = %template.key, "empty output omitted");
                continue;
            }
            if template.is_notes {
                output.notes = Some(document);
            } else {
                output.manifests.insert(template.key.clone(), document);
            }
        }
        output
    }

    fn finalize(&mut self, output: RenderOutput) -> RenderOutput {
        self.enter(RenderPhase::Finalize);
        tracing::debug!(
            chart = %self.chart.name(),
            manifests = output.manifests.len(),
            notes = output.notes.is_some(),
            "render complete"
        );
        output
    }
}
