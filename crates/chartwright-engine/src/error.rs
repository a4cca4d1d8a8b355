//! Render errors, with chart/template/line locations and miette diagnostics

use chartwright_core::CoreError;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::suggestions::{failing_expression, failing_filter, hint_for};

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Template(Box<TemplateError>),

    #[error("Invalid chart: {reason}")]
    InvalidChart { reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Render cancelled")]
    Cancelled,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<TemplateError> for EngineError {
    fn from(err: TemplateError) -> Self {
        Self::Template(Box::new(err))
    }
}

/// Coarse classification of a failed render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed values document or template syntax
    Parse,
    /// An override is not a mapping where one is required
    Merge,
    /// Template evaluation failed
    Evaluation,
    /// `include`/`tpl` nesting exceeded the configured depth
    RecursionLimit,
    /// An enabled live lookup failed
    Lookup,
    /// The chart tree was rejected before rendering
    InvalidChart,
    /// The render was cancelled by the caller
    Cancelled,
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Template(err) => err.kind.category(),
            Self::InvalidChart { .. } => ErrorCategory::InvalidChart,
            Self::Core(err) => match err {
                CoreError::ValuesParse { .. }
                | CoreError::YamlParse(_)
                | CoreError::JsonParse(_) => ErrorCategory::Parse,
                CoreError::ValuesMerge { .. } => ErrorCategory::Merge,
                CoreError::InvalidChart { .. } | CoreError::InvalidVersion(_) => {
                    ErrorCategory::InvalidChart
                }
                _ => ErrorCategory::Evaluation,
            },
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Yaml(_) => ErrorCategory::Parse,
        }
    }

    /// The template error, if this failure came from a template
    pub fn as_template(&self) -> Option<&TemplateError> {
        match self {
            Self::Template(err) => Some(err),
            _ => None,
        }
    }
}

/// Typed reasons for aborting a render from inside a template
///
/// Attached as the source of a `minijinja::Error` so the renderer can classify
/// the failure after it has bubbled up through nested includes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Abort {
    #[error("{message}")]
    Required { message: String },

    #[error("{message}")]
    Failed { message: String },

    #[error("nesting too deep while evaluating '{name}': depth {depth} exceeds the maximum of {max}")]
    RecursionLimit {
        name: String,
        depth: usize,
        max: usize,
    },

    #[error("lookup of {kind} '{target}' failed: {reason}")]
    Lookup {
        kind: String,
        target: String,
        reason: String,
    },

    #[error("cannot read '{path}': {reason}")]
    FileAccess { path: String, reason: String },
}

impl Abort {
    pub fn into_error(self) -> minijinja::Error {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, self.to_string())
            .with_source(self)
    }

    /// Find an abort reason in the source chain of an error
    pub fn find(err: &minijinja::Error) -> Option<&Abort> {
        let mut current = std::error::Error::source(err);
        while let Some(source) = current {
            if let Some(abort) = source.downcast_ref::<Abort>() {
                return Some(abort);
            }
            current = source.source();
        }
        None
    }
}

/// What went wrong in a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    UnknownTemplate,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Required,
    Failed,
    RecursionLimit,
    Lookup,
    FileAccess,
    Other,
}

impl TemplateErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SyntaxError => ErrorCategory::Parse,
            Self::RecursionLimit => ErrorCategory::RecursionLimit,
            Self::Lookup => ErrorCategory::Lookup,
            _ => ErrorCategory::Evaluation,
        }
    }
}

impl From<&Abort> for TemplateErrorKind {
    fn from(abort: &Abort) -> Self {
        match abort {
            Abort::Required { .. } => Self::Required,
            Abort::Failed { .. } => Self::Failed,
            Abort::RecursionLimit { .. } => Self::RecursionLimit,
            Abort::Lookup { .. } => Self::Lookup,
            Abort::FileAccess { .. } => Self::FileAccess,
        }
    }
}

impl From<minijinja::ErrorKind> for TemplateErrorKind {
    fn from(kind: minijinja::ErrorKind) -> Self {
        use minijinja::ErrorKind;

        match kind {
            ErrorKind::UndefinedError => Self::UndefinedVariable,
            ErrorKind::UnknownFilter => Self::UnknownFilter,
            ErrorKind::UnknownFunction | ErrorKind::UnknownMethod => Self::UnknownFunction,
            ErrorKind::TemplateNotFound => Self::UnknownTemplate,
            ErrorKind::SyntaxError => Self::SyntaxError,
            ErrorKind::InvalidOperation => Self::InvalidOperation,
            ErrorKind::NonPrimitive | ErrorKind::NonKey => Self::TypeError,
            _ => Self::Other,
        }
    }
}

/// A failed template, located in its chart
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{}", describe(.chart, .template, .line, .message))]
#[diagnostic(code(chartwright::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Path of the chart that owns the failing template (`app/charts/db`)
    pub chart: String,

    /// Template path relative to that chart (`templates/service.yaml`)
    pub template: String,

    /// 1-based line number, when known
    pub line: Option<usize>,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

fn describe(chart: &str, template: &str, line: &Option<usize>, message: &str) -> String {
    match (template.is_empty(), line) {
        (true, _) => message.to_string(),
        (false, Some(line)) => format!("{}/{}:{}: {}", chart, template, line, message),
        (false, None) => format!("{}/{}: {}", chart, template, message),
    }
}

impl TemplateError {
    /// Locate a minijinja error in `template_source` and attach a hint
    ///
    /// `values` feeds the "did you mean" hints for undefined keys.
    pub fn from_minijinja(
        err: &minijinja::Error,
        chart: &str,
        template: &str,
        template_source: &str,
        values: Option<&serde_json::Value>,
    ) -> Self {
        let (kind, message) = describe_minijinja(err);
        let line = err.line();

        Self {
            message,
            kind,
            chart: chart.to_string(),
            template: template.to_string(),
            line,
            src: NamedSource::new(format!("{}/{}", chart, template), template_source.to_string()),
            span: line.and_then(|line| line_span(template_source, line)),
            suggestion: hint_for(kind, err, values),
        }
    }

    /// A malformed define block
    pub fn parse(
        chart: &str,
        template: &str,
        template_source: &str,
        line: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::SyntaxError,
            chart: chart.to_string(),
            template: template.to_string(),
            line: Some(line),
            src: NamedSource::new(format!("{}/{}", chart, template), template_source.to_string()),
            span: line_span(template_source, line),
            suggestion: Some(
                "Named templates are declared as `{% define \"name\" %}...{% enddefine %}` and cannot be nested"
                    .to_string(),
            ),
        }
    }
}

/// Kind and one-line message of a minijinja error
fn describe_minijinja(err: &minijinja::Error) -> (TemplateErrorKind, String) {
    if let Some(abort) = Abort::find(err) {
        return (TemplateErrorKind::from(abort), abort.to_string());
    }

    let mut kind = TemplateErrorKind::from(err.kind());
    let raw = match err.detail() {
        Some(detail) => format!("{}: {}", err.kind(), detail),
        None => err.kind().to_string(),
    };

    if kind == TemplateErrorKind::Other && raw.to_lowercase().contains("undefined") {
        kind = TemplateErrorKind::UndefinedVariable;
    }

    let display = format!("{:#}", err);
    let message = match kind {
        TemplateErrorKind::UndefinedVariable => match failing_expression(&display) {
            Some(expr) => format!("undefined variable `{}`", expr),
            None => raw.replace("undefined value", "undefined variable"),
        },
        TemplateErrorKind::UnknownFilter => match failing_filter(&display) {
            Some(filter) => format!("unknown filter `{}`", filter),
            None => raw,
        },
        _ => raw
            .replace("invalid operation: ", "")
            .replace("syntax error: ", ""),
    };

    (kind, message)
}

/// Byte span of a 1-based line
fn line_span(source: &str, line: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (index, text) in source.lines().enumerate() {
        if index + 1 == line {
            return Some(SourceSpan::new(offset.into(), text.len()));
        }
        offset += text.len() + 1;
    }
    None
}

pub type Result<T> = std::result::Result<T, EngineError>;
