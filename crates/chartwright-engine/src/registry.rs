//! Template registry
//!
//! Flattens the template files of a whole chart tree into:
//! - concrete templates, each rendered once into an output document
//! - one shared namespace of named templates (`{% define "name" %}` blocks)
//!
//! Traversal order is fixed: parent before children, children in declared
//! order, files in declared order, defines in source order. When two blocks
//! share a name the later one in that order wins.

use std::collections::HashMap;

use chartwright_core::{Chart, ResolvedValues, subchart_path};
use indexmap::IndexMap;
use minijinja::Environment;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TemplateError;

/// `{% define "name" %}` / `{% enddefine %}`, with optional whitespace control
static DEFINE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\{%(-?)\s*(?:define\s+(?:"([^"]*)"|'([^']*)')|(enddefine))\s*(-?)%\}"#,
    )
    .expect("define tag pattern is valid")
});

/// An enabled chart of the tree, with its path
#[derive(Debug, Clone)]
pub struct ChartNode<'a> {
    /// `app`, `app/charts/db`, ...
    pub path: String,
    pub chart: &'a Chart,
    pub is_root: bool,
}

/// Enabled charts of a tree in traversal order
///
/// A chart is enabled when the values merger resolved it; disabled subcharts
/// take their whole subtree with them.
pub fn enabled_nodes<'a>(root: &'a Chart, resolved: &ResolvedValues) -> Vec<ChartNode<'a>> {
    fn walk<'a>(
        chart: &'a Chart,
        path: String,
        resolved: &ResolvedValues,
        out: &mut Vec<ChartNode<'a>>,
    ) {
        let is_root = out.is_empty();
        out.push(ChartNode {
            path: path.clone(),
            chart,
            is_root,
        });

        for dep in &chart.dependencies {
            let child_path = subchart_path(&path, dep.effective_name());
            if resolved.contains(&child_path) {
                walk(&dep.chart, child_path, resolved, out);
            }
        }
    }

    let mut nodes = Vec::new();
    if resolved.contains(root.name()) {
        walk(root, root.name().to_string(), resolved, &mut nodes);
    }
    nodes
}

/// Original file a registered template comes from
#[derive(Debug, Clone)]
pub struct TemplateSource {
    /// Chart path
    pub chart: String,
    /// Path relative to the chart
    pub template: String,
    /// Unmodified file content
    pub content: String,
}

/// A named template (`define` block)
#[derive(Debug, Clone)]
pub struct NamedTemplate {
    pub name: String,
    /// Key of the compiled body in the environment
    pub key: String,
    /// Body, padded so that line numbers match the declaring file
    body: String,
}

/// A template file rendered into an output document
#[derive(Debug, Clone)]
pub struct ConcreteTemplate {
    /// Output key, also its key in the environment (`app/templates/svc.yaml`)
    pub key: String,
    /// Chart path
    pub chart: String,
    /// Path relative to the chart
    pub path: String,
    /// Root chart notes, rendered apart from the manifests
    pub is_notes: bool,
    /// Content with define blocks blanked out
    body: String,
}

/// All templates of one render
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    sources: HashMap<String, TemplateSource>,
    named: IndexMap<String, NamedTemplate>,
    concrete: Vec<ConcreteTemplate>,
}

impl TemplateRegistry {
    /// Scan every template file of the enabled charts
    pub fn build(nodes: &[ChartNode<'_>]) -> Result<Self, TemplateError> {
        let mut registry = Self::default();

        for node in nodes {
            for file in &node.chart.templates {
                let parsed = split_defines(&file.content).map_err(|(line, message)| {
                    TemplateError::parse(&node.path, &file.path, &file.content, line, message)
                })?;

                let source = TemplateSource {
                    chart: node.path.clone(),
                    template: file.path.clone(),
                    content: file.content.clone(),
                };

                for block in parsed.defines {
                    let key = format!("{}/{}#{}", node.path, file.path, block.name);
                    registry.sources.insert(key.clone(), source.clone());

                    let named = NamedTemplate {
                        name: block.name.clone(),
                        key,
                        body: block.body,
                    };
                    if let Some(previous) = registry.named.insert(block.name.clone(), named) {
                        tracing::debug!(
                            name = %block.name,
                            previous = %previous.key,
                            winner = %format!("{}/{}", node.path, file.path),
                            "named template overridden"
                        );
                    }
                }

                if file.is_partial() || (file.is_notes() && !node.is_root) {
                    continue;
                }

                let key = format!("{}/{}", node.path, file.path);
                registry.sources.insert(key.clone(), source);
                registry.concrete.push(ConcreteTemplate {
                    key,
                    chart: node.path.clone(),
                    path: file.path.clone(),
                    is_notes: file.is_notes(),
                    body: parsed.stripped,
                });
            }
        }

        tracing::debug!(
            concrete = registry.concrete.len(),
            named = registry.named.len(),
            "template registry built"
        );

        Ok(registry)
    }

    /// Compile every registered template into `env`
    pub fn load_into(&self, env: &mut Environment<'static>) -> Result<(), TemplateError> {
        let bodies = self
            .concrete
            .iter()
            .map(|t| (&t.key, &t.body))
            .chain(self.named.values().map(|t| (&t.key, &t.body)));

        for (key, body) in bodies {
            env.add_template_owned(key.clone(), body.clone())
                .map_err(|err| self.error_at(&err, key, None))?;
        }
        Ok(())
    }

    /// Concrete templates in render order
    pub fn concrete(&self) -> &[ConcreteTemplate] {
        &self.concrete
    }

    pub fn named(&self, name: &str) -> Option<&NamedTemplate> {
        self.named.get(name)
    }

    /// Named template name → environment key, for `include`
    pub fn include_targets(&self) -> HashMap<String, String> {
        self.named
            .iter()
            .map(|(name, t)| (name.clone(), t.key.clone()))
            .collect()
    }

    /// Attribute a MiniJinja error to the file it happened in
    ///
    /// Errors inside `tpl` strings carry no template of ours; they are charged
    /// to `fallback_key`, the template being rendered.
    pub fn error_at(
        &self,
        err: &minijinja::Error,
        fallback_key: &str,
        values: Option<&serde_json::Value>,
    ) -> TemplateError {
        let source = err
            .name()
            .and_then(|name| self.sources.get(name))
            .or_else(|| self.sources.get(fallback_key));

        match source {
            Some(src) => {
                TemplateError::from_minijinja(err, &src.chart, &src.template, &src.content, values)
            }
            None => TemplateError::from_minijinja(err, "", fallback_key, "", values),
        }
    }
}

/// A template file split into its own output and its define blocks
#[derive(Debug, Default)]
struct ParsedFile {
    stripped: String,
    defines: Vec<DefineBlock>,
}

#[derive(Debug)]
struct DefineBlock {
    name: String,
    body: String,
}

struct OpenDefine {
    name: String,
    start: usize,
    end: usize,
    trim_before: bool,
    trim_after: bool,
    line: usize,
}

/// Extract define blocks, keeping line numbers stable
///
/// Each block is replaced in the file by a comment spanning the same number of
/// lines; each body is prefixed by a comment covering the lines above it.
/// Errors carry a 1-based line number.
fn split_defines(content: &str) -> Result<ParsedFile, (usize, String)> {
    let mut parsed = ParsedFile::default();
    let mut cursor = 0;
    let mut open: Option<OpenDefine> = None;

    for caps in DEFINE_TAG.captures_iter(content) {
        let Some(tag) = caps.get(0) else {
            continue;
        };
        let trim_before = caps.get(1).is_some_and(|m| m.as_str() == "-");
        let trim_after = caps.get(5).is_some_and(|m| m.as_str() == "-");
        let line = line_of(content, tag.start());

        if caps.get(4).is_some() {
            let Some(block) = open.take() else {
                return Err((line, "enddefine without a matching define".to_string()));
            };

            let mut body_start = block.end;
            let mut body = &content[block.end..tag.start()];
            if block.trim_after {
                let trimmed = body.trim_start();
                body_start += body.len() - trimmed.len();
                body = trimmed;
            }
            if trim_before {
                body = body.trim_end();
            }

            let padding = content[..body_start].matches('\n').count();
            let mut padded = String::with_capacity(body.len() + padding + 8);
            if padding > 0 {
                padded.push_str(&blank_comment(false, padding, false));
            }
            padded.push_str(body);

            parsed.defines.push(DefineBlock {
                name: block.name,
                body: padded,
            });

            let spanned = content[block.start..tag.end()].matches('\n').count();
            parsed
                .stripped
                .push_str(&blank_comment(block.trim_before, spanned, trim_after));
            cursor = tag.end();
            continue;
        }

        let name = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        if let Some(outer) = &open {
            return Err((
                line,
                format!(
                    "define \"{}\" is nested inside define \"{}\" (opened on line {})",
                    name, outer.name, outer.line
                ),
            ));
        }
        if name.trim().is_empty() {
            return Err((line, "define block needs a non-empty name".to_string()));
        }

        parsed.stripped.push_str(&content[cursor..tag.start()]);
        open = Some(OpenDefine {
            name,
            start: tag.start(),
            end: tag.end(),
            trim_before,
            trim_after,
            line,
        });
    }

    if let Some(block) = open {
        return Err((
            block.line,
            format!("unterminated define block \"{}\"", block.name),
        ));
    }

    parsed.stripped.push_str(&content[cursor..]);
    Ok(parsed)
}

/// A comment producing no output and spanning `newlines` line breaks
fn blank_comment(trim_before: bool, newlines: usize, trim_after: bool) -> String {
    format!(
        "{{#{} {} {}#}}",
        if trim_before { "-" } else { "" },
        "\n".repeat(newlines),
        if trim_after { "-" } else { "" }
    )
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartwright_core::{ChartMetadata, Dependency, Values};

    fn chart(name: &str) -> Chart {
        Chart::new(ChartMetadata::new(name, "1.0.0").unwrap())
    }

    fn nodes_of(root: &Chart) -> Vec<ChartNode<'_>> {
        let resolved = ResolvedValues::resolve(root, &Values::new()).unwrap();
        enabled_nodes(root, &resolved)
    }

    fn render(env: &Environment<'static>, key: &str) -> String {
        env.get_template(key).unwrap().render(()).unwrap()
    }

    #[test]
    fn test_split_defines_basic() {
        let parsed = split_defines(
            "before\n{% define \"greeting\" %}hello{% enddefine %}\nafter",
        )
        .unwrap();

        assert_eq!(parsed.defines.len(), 1);
        assert_eq!(parsed.defines[0].name, "greeting");
        assert!(parsed.defines[0].body.ends_with("hello"));
        assert!(!parsed.stripped.contains("define"));
    }

    #[test]
    fn test_split_defines_single_quotes_and_dashes() {
        let parsed = split_defines("{%- define 'x' -%}\n  body\n{%- enddefine -%}").unwrap();
        assert_eq!(parsed.defines[0].name, "x");
        assert!(parsed.defines[0].body.ends_with("body"));
    }

    #[test]
    fn test_split_defines_errors() {
        let (line, message) =
            split_defines("a\n{% define \"x\" %}\n{% define \"y\" %}{% enddefine %}").unwrap_err();
        assert_eq!(line, 3);
        assert!(message.contains("nested"));

        let (line, message) = split_defines("a\nb\n{% define \"x\" %}oops").unwrap_err();
        assert_eq!(line, 3);
        assert!(message.contains("unterminated"));

        let (line, _) = split_defines("{% enddefine %}").unwrap_err();
        assert_eq!(line, 1);

        assert!(split_defines("{% define \"\" %}{% enddefine %}").is_err());
    }

    #[test]
    fn test_stripped_output_and_line_numbers() {
        let content = "line1\n{% define \"x\" %}\nA\nB\n{% enddefine %}\n{{ broken";
        let parsed = split_defines(content).unwrap();

        let mut env = Environment::new();
        let err = env
            .add_template_owned("t".to_string(), parsed.stripped.clone())
            .unwrap_err();
        assert_eq!(err.line(), Some(6));

        let parsed = split_defines("a\n{% define \"x\" %}\nA\n{% enddefine %}\nb").unwrap();
        let mut env = Environment::new();
        env.add_template_owned("t".to_string(), parsed.stripped)
            .unwrap();
        assert_eq!(render(&env, "t"), "a\n\nb");
    }

    #[test]
    fn test_named_body_line_numbers() {
        let content = "x\ny\n{% define \"broken\" %}\nok\n{{ nope( }}\n{% enddefine %}";
        let parsed = split_defines(content).unwrap();

        let mut env = Environment::new();
        let err = env
            .add_template_owned("n".to_string(), parsed.defines[0].body.clone())
            .unwrap_err();
        assert_eq!(err.line(), Some(5));
    }

    #[test]
    fn test_partials_and_notes_are_not_concrete() {
        let root = chart("app")
            .with_template("templates/_helpers.tpl", "{% define \"a\" %}A{% enddefine %}")
            .with_template("templates/svc.yaml", "kind: Service")
            .with_template("templates/NOTES.txt", "installed")
            .with_subchart(chart("db").with_template("templates/NOTES.txt", "db notes"));

        let registry = TemplateRegistry::build(&nodes_of(&root)).unwrap();
        let keys: Vec<_> = registry.concrete().iter().map(|t| t.key.as_str()).collect();

        assert_eq!(keys, vec!["app/templates/svc.yaml", "app/templates/NOTES.txt"]);
        assert!(registry.concrete()[1].is_notes);
        assert!(registry.named("a").is_some());
    }

    #[test]
    fn test_traversal_order() {
        let root = chart("app")
            .with_template("templates/a.yaml", "a")
            .with_subchart(
                chart("b")
                    .with_template("templates/b.yaml", "b")
                    .with_subchart(chart("c").with_template("templates/c.yaml", "c")),
            )
            .with_subchart(chart("d").with_template("templates/d.yaml", "d"));

        let registry = TemplateRegistry::build(&nodes_of(&root)).unwrap();
        let keys: Vec<_> = registry.concrete().iter().map(|t| t.key.as_str()).collect();

        assert_eq!(
            keys,
            vec![
                "app/templates/a.yaml",
                "app/charts/b/templates/b.yaml",
                "app/charts/b/charts/c/templates/c.yaml",
                "app/charts/d/templates/d.yaml",
            ]
        );
    }

    #[test]
    fn test_later_definition_wins() {
        let root = chart("app")
            .with_template(
                "templates/_helpers.tpl",
                "{% define \"labels.common\" %}parent{% enddefine %}",
            )
            .with_subchart(chart("first").with_template(
                "templates/_helpers.tpl",
                "{% define \"labels.common\" %}first{% enddefine %}",
            ))
            .with_subchart(chart("second").with_template(
                "templates/_helpers.tpl",
                "{% define \"labels.common\" %}second{% enddefine %}{% define \"labels.common\" %}second-again{% enddefine %}",
            ));

        let registry = TemplateRegistry::build(&nodes_of(&root)).unwrap();
        let mut env = Environment::new();
        registry.load_into(&mut env).unwrap();

        let winner = registry.named("labels.common").unwrap();
        assert_eq!(winner.key, "app/charts/second/templates/_helpers.tpl#labels.common");
        assert_eq!(render(&env, &winner.key), "second-again");
    }

    #[test]
    fn test_disabled_subchart_contributes_nothing() {
        let root = chart("app")
            .with_values(Values::from_yaml("cache: {enabled: false}").unwrap())
            .with_template("templates/a.yaml", "a")
            .with_dependency(
                Dependency::new(
                    chart("cache")
                        .with_template("templates/c.yaml", "c")
                        .with_template(
                            "templates/_helpers.tpl",
                            "{% define \"cache.name\" %}cache{% enddefine %}",
                        ),
                )
                .with_condition("cache.enabled"),
            );

        let registry = TemplateRegistry::build(&nodes_of(&root)).unwrap();
        assert_eq!(registry.concrete().len(), 1);
        assert!(registry.named("cache.name").is_none());
    }

    #[test]
    fn test_define_error_names_file_and_line() {
        let root = chart("app").with_subchart(
            chart("db").with_template("templates/_helpers.tpl", "\n\n{% define \"x\" %}"),
        );

        let err = TemplateRegistry::build(&nodes_of(&root)).unwrap_err();
        assert_eq!(err.chart, "app/charts/db");
        assert_eq!(err.template, "templates/_helpers.tpl");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn test_syntax_error_attributed_to_declaring_file() {
        let root = chart("app").with_template(
            "templates/_helpers.tpl",
            "{% define \"x\" %}\n{% if %}\n{% enddefine %}",
        );

        let registry = TemplateRegistry::build(&nodes_of(&root)).unwrap();
        let mut env = Environment::new();
        let err = registry.load_into(&mut env).unwrap_err();

        assert_eq!(err.template, "templates/_helpers.tpl");
        assert_eq!(err.line, Some(2));
    }
}
