//! "Did you mean" hints for failed renders
//!
//! Candidates are ranked by Damerau-Levenshtein distance (`strsim`), so a
//! swapped pair of letters (`lables`) counts as a single edit.

use chartwright_core::context::RESERVED_NAMES;
use serde_json::Value as JsonValue;

use crate::error::TemplateErrorKind;

/// Candidates further away than this are never offered
const MAX_DISTANCE: usize = 3;

/// At most this many candidates per hint
const MAX_CANDIDATES: usize = 3;

/// Filters registered by the engine, then minijinja builtins
pub const AVAILABLE_FILTERS: &[&str] = &[
    "toyaml",
    "tojson",
    "tojson_pretty",
    "b64encode",
    "b64decode",
    "quote",
    "squote",
    "nindent",
    "indent",
    "required",
    "empty",
    "haskey",
    "keys",
    "merge",
    "sha256",
    "sha1",
    "trunc",
    "trimprefix",
    "trimsuffix",
    "snakecase",
    "kebabcase",
    "tostrings",
    "semver_match",
    "date_format",
    "int",
    "float",
    // minijinja
    "default",
    "upper",
    "lower",
    "title",
    "capitalize",
    "replace",
    "trim",
    "join",
    "first",
    "last",
    "length",
    "reverse",
    "sort",
    "unique",
    "map",
    "select",
    "reject",
    "selectattr",
    "rejectattr",
    "batch",
    "slice",
    "dictsort",
    "items",
    "attr",
    "abs",
    "round",
    "string",
    "list",
    "bool",
    "safe",
    "escape",
    "e",
    "urlencode",
];

/// Global functions registered by the engine, then minijinja builtins
pub const AVAILABLE_FUNCTIONS: &[&str] = &[
    "include",
    "include_ctx",
    "tpl",
    "tpl_ctx",
    "required",
    "fail",
    "dict",
    "list",
    "get",
    "set",
    "unset",
    "dig",
    "coalesce",
    "ternary",
    "tostring",
    "toint",
    "tofloat",
    "printf",
    // absent from sandboxed engines
    "lookup",
    "now",
    "uuidv4",
    "randalphanum",
    // minijinja
    "range",
    "lipsum",
    "cycler",
    "joiner",
    "namespace",
];

/// Candidates close to `input`, nearest first; exact matches are skipped
pub fn closest<'a>(input: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .map(|candidate| (strsim::damerau_levenshtein(input, candidate), candidate))
        .filter(|(distance, _)| (1..=MAX_DISTANCE).contains(distance))
        .collect();

    scored.sort_by_key(|(distance, _)| *distance);
    scored
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(|(_, candidate)| candidate)
        .collect()
}

fn did_you_mean(names: &[&str], prefix: &str) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let quoted: Vec<String> = names
        .iter()
        .map(|name| format!("`{}{}`", prefix, name))
        .collect();
    Some(format!("Did you mean {}?", quoted.join(" or ")))
}

/// Hint for an `include` of a name nobody declared
pub fn named_template_hint(name: &str, declared: &[&str]) -> Option<String> {
    did_you_mean(&closest(name, declared.iter().copied()), "")
}

/// Hint for a failed render, chosen by error kind
///
/// `values` are the values of the chart being rendered; they feed the
/// suggestions for undefined keys.
pub(crate) fn hint_for(
    kind: TemplateErrorKind,
    err: &minijinja::Error,
    values: Option<&JsonValue>,
) -> Option<String> {
    let message = err.to_string();
    let display = format!("{:#}", err);

    match kind {
        TemplateErrorKind::UndefinedVariable => {
            let Some(expr) = failing_expression(&display).or_else(|| quoted_name(&message))
            else {
                return Some(
                    "Variable is not defined. Check spelling or use the `default` filter."
                        .to_string(),
                );
            };
            Some(undefined_hint(&expr, values))
        }

        TemplateErrorKind::UnknownFilter => {
            let Some(name) = failing_filter(&display).or_else(|| quoted_name(&message)) else {
                return Some(format!(
                    "Unknown filter. Available: {}",
                    AVAILABLE_FILTERS.join(", ")
                ));
            };
            Some(
                match did_you_mean(&closest(&name, AVAILABLE_FILTERS.iter().copied()), "") {
                    Some(hint) => hint,
                    None => format!(
                        "Unknown filter `{}`. Common filters: toyaml, tojson, quote, nindent, default",
                        name
                    ),
                },
            )
        }

        TemplateErrorKind::UnknownFunction => {
            let name = quoted_name(&message)?;
            Some(
                match did_you_mean(&closest(&name, AVAILABLE_FUNCTIONS.iter().copied()), "") {
                    Some(hint) => hint,
                    None => format!(
                        "Unknown function `{}`. Available: {}",
                        name,
                        AVAILABLE_FUNCTIONS.join(", ")
                    ),
                },
            )
        }

        TemplateErrorKind::SyntaxError if message.contains('}') || message.contains('%') => Some(
            "Expressions use `{{ }}`, statements `{% %}` and comments `{# #}`; check that each is closed"
                .to_string(),
        ),
        TemplateErrorKind::SyntaxError if message.contains("expected") => {
            Some("Check for a missing closing tag such as `{% endif %}` or `{% endfor %}`".to_string())
        }

        TemplateErrorKind::TypeError => {
            let lower = message.to_lowercase();
            if lower.contains("not iterable") {
                Some(iteration_hint("map"))
            } else if lower.contains("not callable") {
                Some("Call functions with parentheses (`now()`), print variables without".to_string())
            } else {
                None
            }
        }

        TemplateErrorKind::RecursionLimit => Some(
            "A named template or tpl string ends up rendering itself; look for an include cycle"
                .to_string(),
        ),

        _ => None,
    }
}

fn undefined_hint(expr: &str, values: Option<&JsonValue>) -> String {
    if expr == "value" || expr.starts_with("value.") {
        return format!(
            "Did you mean `{}`? The values object is `values`, plural.",
            expr.replacen("value", "values", 1)
        );
    }

    if let (Some(path), Some(values)) = (expr.strip_prefix("values."), values)
        && let Some(hint) = missing_key_hint(path, values)
    {
        return hint;
    }

    let root = expr.split('.').next().unwrap_or(expr);
    let reserved = closest(root, RESERVED_NAMES.iter().copied());
    let value_keys: Vec<&str> = values
        .and_then(JsonValue::as_object)
        .map(|map| map.keys().map(String::as_str).collect())
        .unwrap_or_default();

    did_you_mean(&reserved[..reserved.len().min(1)], "")
        .or_else(|| did_you_mean(&closest(root, value_keys), ""))
        .unwrap_or_else(|| {
            format!(
                "`{}` is not defined. Check spelling or add `| default(\"fallback\")`.",
                expr
            )
        })
}

/// Walk `path` through `values` and describe where it stops resolving
fn missing_key_hint(path: &str, values: &JsonValue) -> Option<String> {
    let mut current = values;
    let mut walked = String::from("values");

    for part in path.split('.') {
        if let Some(next) = current.get(part) {
            current = next;
            walked.push('.');
            walked.push_str(part);
            continue;
        }

        let keys: Vec<&str> = current.as_object()?.keys().map(String::as_str).collect();
        let prefix = format!("{}.", walked);
        return Some(
            match did_you_mean(&closest(part, keys.iter().copied()), &prefix) {
                Some(hint) => format!(
                    "Key `{}` not found. {} Available: {}",
                    part,
                    hint,
                    keys.join(", ")
                ),
                None => format!(
                    "Key `{}` not found in `{}`. Available keys: {}",
                    part,
                    walked,
                    keys.join(", ")
                ),
            },
        );
    }

    None
}

fn iteration_hint(type_name: &str) -> String {
    match type_name {
        "map" => "Iterate a mapping with `| dictsort`: `{% for key, value in obj | dictsort %}`"
            .to_string(),
        "none" => "The value is none; guard it or use `| default([])`".to_string(),
        other => format!("A `{}` is not iterable; use a list or a mapping", other),
    }
}

/// Whether minijinja's debug display marks this line as the failing one
fn is_marked(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("> ") || trimmed.contains(" > ")
}

/// Inside of the first `{{ ... }}` of a line, without whitespace control dashes
fn expression_body(line: &str) -> Option<&str> {
    let start = line.find("{{")? + 2;
    let len = line[start..].find("}}")?;
    Some(line[start..start + len].trim().trim_matches('-').trim())
}

/// The failing expression, filters removed, from minijinja's debug display:
///
/// ```text
///    8 >   typo: {{ value.app.name }}
///      i            ^^^^^^^^^ undefined value
/// ```
pub(crate) fn failing_expression(display: &str) -> Option<String> {
    let lines: Vec<&str> = display.lines().collect();

    lines.iter().enumerate().find_map(|(i, line)| {
        let marked = if is_marked(line) {
            *line
        } else if i > 0 && line.contains("^^^") {
            lines[i - 1]
        } else {
            return None;
        };

        let head = expression_body(marked)?.split('|').next()?.trim();
        (!head.is_empty()).then(|| head.to_string())
    })
}

/// Name of the last filter applied on the failing line
pub(crate) fn failing_filter(display: &str) -> Option<String> {
    display
        .lines()
        .filter(|line| is_marked(line))
        .filter_map(expression_body)
        .find_map(|body| {
            let (_, tail) = body.rsplit_once('|')?;
            let name = tail.split_whitespace().next()?.split('(').next()?;
            (!name.is_empty()).then(|| name.to_string())
        })
}

/// First name quoted with backticks, single or double quotes
fn quoted_name(message: &str) -> Option<String> {
    ['`', '\'', '"'].iter().find_map(|&quote| {
        let rest = &message[message.find(quote)? + 1..];
        let end = rest.find(quote)?;
        Some(rest[..end].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_closest_ranks_by_distance() {
        assert_eq!(closest("toyml", AVAILABLE_FILTERS.iter().copied())[0], "toyaml");
        assert_eq!(closest("lables", ["labels", "tables", "zzz"])[0], "labels");
        assert!(closest("quote", ["quote"]).is_empty());
        assert!(closest("x", Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_named_template_hint() {
        let declared = ["app.labels", "app.fullname"];
        let hint = named_template_hint("app.lables", &declared).unwrap();
        assert!(hint.contains("`app.labels`"));
        assert!(named_template_hint("something.else.entirely", &declared).is_none());
    }

    #[test]
    fn test_undefined_hint() {
        assert!(undefined_hint("value.image", None).contains("`values.image`"));
        assert!(undefined_hint("relase.name", None).contains("`release`"));

        let values = json!({"replicaCount": 1});
        assert!(undefined_hint("replicaCont", Some(&values)).contains("`replicaCount`"));
        assert!(undefined_hint("zzzzzzzz", Some(&values)).contains("default"));
    }

    #[test]
    fn test_missing_key_hint() {
        let values = json!({"image": {"repository": "nginx", "tag": "1.0"}});

        let hint = missing_key_hint("image.tga", &values).unwrap();
        assert!(hint.contains("`values.image.tag`"));

        let hint = missing_key_hint("image.digest", &values).unwrap();
        assert!(hint.contains("not found in `values.image`"));

        assert!(missing_key_hint("image.tag", &values).is_none());
    }

    #[test]
    fn test_failing_expression() {
        let display = "\n   8 >   typo: {{ value.app.name }}\n     i            ^^^^^^^^^ undefined value\n";
        assert_eq!(failing_expression(display), Some("value.app.name".to_string()));

        let display = "\n   3 >   data: {{- values.app.name | upper }}\n";
        assert_eq!(failing_expression(display), Some("values.app.name".to_string()));

        assert_eq!(failing_expression("no markers here"), None);
    }

    #[test]
    fn test_failing_filter() {
        let display = "\n   8 >   data: {{ values.name | toyml(2) }}\n     i          ^^^^^ unknown filter\n";
        assert_eq!(failing_filter(display), Some("toyml".to_string()));
    }

    #[test]
    fn test_quoted_name() {
        assert_eq!(quoted_name("unknown function `incldue`"), Some("incldue".to_string()));
        assert_eq!(quoted_name("variable 'bar' is undefined"), Some("bar".to_string()));
        assert_eq!(quoted_name("nothing quoted"), None);
    }

    #[test]
    fn test_hint_for_unknown_filter() {
        let env = minijinja::Environment::new();
        let err = env.render_str("{{ 1 | toyml }}", ()).unwrap_err();

        let hint = hint_for(TemplateErrorKind::UnknownFilter, &err, None).unwrap();
        assert!(hint.contains("toyaml"), "{}", hint);
    }
}
