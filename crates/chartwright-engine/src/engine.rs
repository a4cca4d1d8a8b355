//! Template engine based on MiniJinja

use std::sync::Arc;

use chartwright_core::{Capabilities, Chart, ReleaseInfo, RenderContext, Values};
use minijinja::{Environment, State, UndefinedBehavior, Value};

use crate::config::EngineConfig;
use crate::error::{Result, TemplateError};
use crate::filters;
use crate::functions::{self, IncludeScope};
use crate::lookup::{NoClusterLookup, ResourceLookup};
use crate::renderer::{CancellationToken, RenderOutput, Renderer, template_context};

/// Template engine builder
pub struct EngineBuilder {
    config: EngineConfig,
    capabilities: Option<Capabilities>,
    lookup: Arc<dyn ResourceLookup>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            capabilities: None,
            lookup: Arc::new(NoClusterLookup),
        }
    }

    /// Start from a loaded configuration
    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Strip environment-dependent functions
    pub fn sandbox(mut self, sandbox: bool) -> Self {
        self.config.sandbox = sandbox;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.config.max_include_depth = depth;
        self
    }

    /// Capabilities exposed to templates, ahead of whatever the lookup reports
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn lookup(mut self, lookup: impl ResourceLookup + 'static) -> Self {
        self.lookup = Arc::new(lookup);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            config: self.config,
            capabilities: self.capabilities,
            lookup: self.lookup,
        }
    }
}

/// The template engine
///
/// Holds configuration only; every render builds its own registry and
/// environment, so one engine can serve concurrent renders.
pub struct Engine {
    config: EngineConfig,
    capabilities: Option<Capabilities>,
    lookup: Arc<dyn ResourceLookup>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder::from_config(config).build()
    }

    /// Engine failing on undefined variables
    pub fn strict() -> Self {
        Self::builder().strict(true).build()
    }

    /// Engine rendering undefined variables as empty
    pub fn lenient() -> Self {
        Self::builder().strict(false).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Capabilities seen by templates
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
            .clone()
            .or_else(|| self.lookup.capabilities())
            .unwrap_or_default()
    }

    /// Render a whole chart tree
    ///
    /// All or nothing: the first failure discards every rendered document.
    pub fn render(
        &self,
        chart: &Chart,
        overrides: &Values,
        release: &ReleaseInfo,
    ) -> Result<RenderOutput> {
        self.render_with_cancellation(chart, overrides, release, &CancellationToken::new())
    }

    /// Render a whole chart tree, giving up as soon as `token` is cancelled
    pub fn render_with_cancellation(
        &self,
        chart: &Chart,
        overrides: &Values,
        release: &ReleaseInfo,
        token: &CancellationToken,
    ) -> Result<RenderOutput> {
        Renderer::new(self, chart, release, token).run(overrides)
    }

    /// Render a single template string against one chart context
    ///
    /// No named templates are available to `include`.
    pub fn render_string(
        &self,
        template: &str,
        context: &RenderContext,
        template_name: &str,
    ) -> Result<String> {
        let scope = IncludeScope::new(Default::default(), self.config.max_include_depth);
        let mut env = self.create_environment(scope);

        let to_error = |e: minijinja::Error| {
            TemplateError::from_minijinja(
                &e,
                &context.chart_path,
                template_name,
                template,
                Some(context.values.inner()),
            )
        };

        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(to_error)?;
        let ctx = context.for_template(template_name);

        Ok(env
            .get_template(template_name)
            .and_then(|tmpl| tmpl.render(template_context(&ctx)))
            .map_err(to_error)?)
    }

    /// Create a configured MiniJinja environment for one render
    pub(crate) fn create_environment(&self, scope: Arc<IncludeScope>) -> Environment<'static> {
        let mut env = Environment::new();

        env.set_undefined_behavior(if self.config.strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });

        // Filters
        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("tojson_pretty", filters::tojson_pretty);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("haskey", filters::haskey);
        env.add_filter("keys", filters::keys);
        env.add_filter("merge", filters::merge);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("sha1", filters::sha1sum);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("snakecase", filters::snakecase);
        env.add_filter("kebabcase", filters::kebabcase);
        env.add_filter("tostrings", filters::tostrings);
        env.add_filter("semver_match", filters::semver_match);
        env.add_filter("date_format", filters::date_format);
        env.add_filter("int", filters::int);
        env.add_filter("float", filters::float);

        // Deterministic functions
        env.add_function("fail", functions::fail);
        env.add_function("required", functions::required);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("get", functions::get);
        env.add_function("set", functions::set);
        env.add_function("unset", functions::unset);
        env.add_function("dig", functions::dig);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tostring", functions::tostring);
        env.add_function("toint", functions::toint);
        env.add_function("tofloat", functions::tofloat);
        env.add_function("printf", functions::printf);

        // Named templates and double evaluation share one depth counter
        let s = scope.clone();
        env.add_function("include", move |state: &State, name: String, ctx: Value| {
            s.include(state, &name, ctx)
        });
        let s = scope.clone();
        env.add_function("include_ctx", move |state: &State, name: String| {
            s.include(state, &name, functions::current_context(state))
        });
        let s = scope.clone();
        env.add_function("tpl", move |state: &State, text: String, ctx: Value| {
            s.tpl(state, text, ctx)
        });
        env.add_function("tpl_ctx", move |state: &State, text: String| {
            scope.tpl(state, text, functions::current_context(state))
        });

        if self.config.sandbox {
            return env;
        }

        // Environment-dependent functions
        let lookup = self.lookup.clone();
        env.add_function(
            "lookup",
            move |api_version: String, kind: String, namespace: String, name: String| {
                functions::lookup_with(lookup.as_ref(), &api_version, &kind, &namespace, &name)
            },
        );
        env.add_function("now", functions::now);
        env.add_function("uuidv4", functions::uuidv4);
        env.add_function("randalphanum", functions::randalphanum);

        env
    }
}
