//! Chart template filters
//!
//! Helm-compatible string, encoding and collection filters on top of the
//! MiniJinja builtins.

use std::fmt::Write as _;

use base64::Engine as _;
use chartwright_core::Values;
use chrono::format::{Item, StrftimeItems};
use minijinja::{Error, ErrorKind, Value, value::ValueKind};
use semver::{Version, VersionReq};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::functions;

fn to_json(value: &Value) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Convert a value to YAML format
///
/// Usage: {{ values.config | toyaml }}
pub fn toyaml(value: Value) -> Result<String, Error> {
    let yaml = serde_yaml::to_string(&to_json(&value)?)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;

    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

/// Usage: {{ values.config | tojson }}
pub fn tojson(value: Value) -> Result<String, Error> {
    serde_json::to_string(&to_json(&value)?)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

pub fn tojson_pretty(value: Value) -> Result<String, Error> {
    serde_json::to_string_pretty(&to_json(&value)?)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// Base64 encode a string or raw bytes
///
/// Usage: {{ secret | b64encode }}
pub fn b64encode(value: Value) -> Result<String, Error> {
    let bytes = value.as_bytes().ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("b64encode expects a string or bytes, got {}", value.kind()),
        )
    })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

pub fn b64decode(value: String) -> Result<String, Error> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value.trim().as_bytes())
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("base64 decode error: {}", e)))?;

    String::from_utf8(decoded)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("UTF-8 decode error: {}", e)))
}

/// Usage: {{ name | quote }}
#[must_use]
pub fn quote(value: Value) -> String {
    let s = functions::tostring(value);
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Single-quoted, YAML style: embedded quotes are doubled
#[must_use]
pub fn squote(value: Value) -> String {
    let s = functions::tostring(value);
    format!("'{}'", s.replace('\'', "''"))
}

fn indent_lines(value: &str, spaces: usize, out: &mut String) {
    let pad = " ".repeat(spaces);
    for (i, line) in value.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if !line.is_empty() {
            out.push_str(&pad);
        }
        out.push_str(line);
    }
}

/// Indent text with a newline prefix (like Helm's nindent)
///
/// Usage: {{ content | nindent(4) }}
#[must_use]
pub fn nindent(value: String, spaces: usize) -> String {
    let mut result = String::with_capacity(1 + value.len() + spaces * value.lines().count());
    result.push('\n');
    indent_lines(&value, spaces, &mut result);
    result
}

#[must_use]
pub fn indent(value: String, spaces: usize) -> String {
    let mut result = String::with_capacity(value.len() + spaces * value.lines().count());
    indent_lines(&value, spaces, &mut result);
    result
}

/// Abort the render if the value is undefined, none or empty
///
/// Usage: {{ values.image.tag | required("image.tag is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    functions::require(value, message)
}

/// Usage: {% if values.list | empty %}
pub fn empty(value: Value) -> bool {
    if value.is_undefined() || value.is_none() {
        return true;
    }
    match value.as_str() {
        Some(s) => s.is_empty(),
        None => value.len() == Some(0),
    }
}

/// Usage: {% if values | haskey("foo") %}
pub fn haskey(value: Value, key: String) -> bool {
    value.get_attr(&key).is_ok_and(|v| !v.is_undefined())
}

/// Usage: {{ values | keys }}
pub fn keys(value: Value) -> Result<Vec<String>, Error> {
    if value.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot get keys from {}", value.kind()),
        ));
    }
    Ok(value
        .try_iter()?
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

/// Deep merge two dicts, with the same semantics as values overrides
///
/// Usage: {{ defaults | merge(overrides) }}
pub fn merge(base: Value, overlay: Value) -> Result<Value, Error> {
    let mut merged = Values(to_json(&base)?);
    merged.merge(&Values(to_json(&overlay)?));
    Ok(Value::from_serialize(merged.into_inner()))
}

/// Usage: {{ value | sha256 }}
pub fn sha256sum(value: String) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

pub fn sha1sum(value: String) -> String {
    format!("{:x}", Sha1::digest(value.as_bytes()))
}

/// Truncate a string to a maximum number of characters
///
/// Usage: {{ name | trunc(63) }}
pub fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

pub fn trimprefix(value: String, prefix: String) -> String {
    value.strip_prefix(&prefix).unwrap_or(&value).to_string()
}

pub fn trimsuffix(value: String, suffix: String) -> String {
    value.strip_suffix(&suffix).unwrap_or(&value).to_string()
}

/// Usage: {{ name | snakecase }}
pub fn snakecase(value: String) -> String {
    let mut result = String::with_capacity(value.len() + value.len() / 4);
    let mut prev_upper = false;

    for (i, c) in value.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !prev_upper {
                result.push('_');
            }
            result.extend(c.to_lowercase());
            prev_upper = true;
        } else if c == '-' || c == ' ' {
            result.push('_');
            prev_upper = false;
        } else {
            result.push(c);
            prev_upper = false;
        }
    }

    result
}

pub fn kebabcase(value: String) -> String {
    snakecase(value).replace('_', "-")
}

/// Convert a list of values to a list of strings
///
/// Usage: {{ list(1, 2, 3) | tostrings }}
///
/// Optional kwargs: `prefix`, `suffix`, `skip_empty` (drops null and empty
/// entries).
pub fn tostrings(value: Value, kwargs: minijinja::value::Kwargs) -> Result<Vec<String>, Error> {
    let prefix: String = kwargs.get::<Option<String>>("prefix")?.unwrap_or_default();
    let suffix: String = kwargs.get::<Option<String>>("suffix")?.unwrap_or_default();
    let skip_empty: bool = kwargs.get::<Option<bool>>("skip_empty")?.unwrap_or(false);
    kwargs.assert_all_used()?;

    let convert = |v: Value| -> Option<String> {
        let s = if v.is_undefined() || v.is_none() {
            String::new()
        } else {
            functions::tostring(v)
        };
        if skip_empty && s.is_empty() {
            return None;
        }
        Some(format!("{}{}{}", prefix, s, suffix))
    };

    match value.kind() {
        ValueKind::Seq | ValueKind::Iterable => Ok(value.try_iter()?.filter_map(convert).collect()),
        _ => Ok(convert(value).into_iter().collect()),
    }
}

fn parse_loose_version(raw: &str) -> Option<Version> {
    let clean = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(clean) {
        return Some(version);
    }

    // Kubernetes-style versions such as "1.31" or "1.31.0-eks-1"
    let base = clean.split(['-', '+']).next().unwrap_or(clean);
    let mut parts = base.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// Compare a version against a semver constraint (Helm's semverCompare)
///
/// Usage: {{ capabilities.kubeVersion.version | semver_match(">=1.21.0") }}
pub fn semver_match(version: Value, constraint: String) -> Result<bool, Error> {
    let raw = version
        .as_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "version must be a string"))?;

    let parsed = parse_loose_version(raw).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid version format: {}", raw),
        )
    })?;

    let constraint_clean = constraint.trim();
    let req = VersionReq::parse(constraint_clean)
        .or_else(|_| VersionReq::parse(constraint_clean.trim_end_matches("-0")))
        .map_err(|e| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid constraint '{}': {}", constraint, e),
            )
        })?;

    Ok(req.matches(&parsed))
}

/// Reformat an RFC 3339 timestamp with a strftime pattern
///
/// Usage: {{ now() | date_format("%Y-%m-%d") }}
pub fn date_format(value: String, format: String) -> Result<String, Error> {
    let timestamp = chrono::DateTime::parse_from_rfc3339(value.trim()).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("'{}' is not an RFC 3339 timestamp: {}", value, e),
        )
    })?;

    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid date format '{}'", format),
        ));
    }

    let mut out = String::new();
    write!(out, "{}", timestamp.format_with_items(items.into_iter())).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot format date with '{}'", format),
        )
    })?;
    Ok(out)
}

/// Usage: {{ values.port | int }}
pub fn int(value: Value) -> Result<i64, Error> {
    match value.kind() {
        ValueKind::Bool => Ok(i64::from(value.is_true())),
        ValueKind::String => {
            let s = value.as_str().unwrap_or_default().trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .map_err(|_| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        format!("cannot parse '{}' as int", s),
                    )
                })
        }
        _ => functions::toint(value),
    }
}

/// Usage: {{ values.ratio | float }}
pub fn float(value: Value) -> Result<f64, Error> {
    match value.kind() {
        ValueKind::Bool => Ok(if value.is_true() { 1.0 } else { 0.0 }),
        _ => functions::tofloat(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::Environment;

    #[test]
    fn test_toyaml() {
        let value = Value::from_serialize(serde_json::json!({
            "name": "test",
            "port": 8080
        }));
        let yaml = toyaml(value).unwrap();
        assert!(yaml.contains("name: test"));
        assert!(yaml.contains("port: 8080"));
        assert!(!yaml.ends_with('\n'));
    }

    #[test]
    fn test_b64encode_decode() {
        let encoded = b64encode(Value::from("hello world")).unwrap();
        assert_eq!(encoded, "aGVsbG8gd29ybGQ=");
        assert_eq!(b64decode(encoded).unwrap(), "hello world");

        let bytes = b64encode(Value::from_bytes(vec![0xff, 0x00])).unwrap();
        assert_eq!(bytes, "/wA=");

        assert!(b64encode(Value::from(3)).is_err());
        assert!(b64decode("%%%".to_string()).is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote(Value::from("test")), "\"test\"");
        assert_eq!(quote(Value::from("say \"hi\"")), "\"say \\\"hi\\\"\"");
        assert_eq!(quote(Value::from(8080)), "\"8080\"");
        assert_eq!(squote(Value::from("it's")), "'it''s'");
    }

    #[test]
    fn test_nindent_and_indent() {
        assert_eq!(nindent("line1\nline2".to_string(), 4), "\n    line1\n    line2");
        assert_eq!(indent("a\n\nb".to_string(), 2), "  a\n\n  b");
    }

    #[test]
    fn test_required_filter_aborts() {
        let mut env = Environment::new();
        env.add_filter("required", required);

        assert_eq!(
            env.render_str("{{ 'x' | required('needed') }}", ()).unwrap(),
            "x"
        );

        let err = env
            .render_str("{{ missing | required('missing is required') }}", ())
            .unwrap_err();
        assert!(matches!(
            crate::error::Abort::find(&err),
            Some(crate::error::Abort::Required { message }) if message == "missing is required"
        ));
    }

    #[test]
    fn test_empty() {
        assert!(empty(Value::UNDEFINED));
        assert!(empty(Value::from("")));
        assert!(empty(Value::from_serialize(Vec::<i32>::new())));
        assert!(!empty(Value::from("test")));
        assert!(!empty(Value::from(0)));
    }

    #[test]
    fn test_keys_and_haskey() {
        let value = Value::from_serialize(serde_json::json!({"a": 1, "b": null}));
        assert_eq!(keys(value.clone()).unwrap(), vec!["a", "b"]);
        assert!(haskey(value.clone(), "a".to_string()));
        assert!(!haskey(value, "c".to_string()));
        assert!(keys(Value::from("str")).is_err());
    }

    #[test]
    fn test_merge_deletes_on_null() {
        let base = Value::from_serialize(serde_json::json!({"a": {"x": 1, "y": 2}, "b": 1}));
        let overlay = Value::from_serialize(serde_json::json!({"a": {"y": null}, "c": 3}));

        let merged = to_json(&merge(base, overlay).unwrap()).unwrap();
        assert_eq!(merged, serde_json::json!({"a": {"x": 1}, "b": 1, "c": 3}));
    }

    #[test]
    fn test_hashes() {
        assert_eq!(
            sha256sum("abc".to_string()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            sha1sum("abc".to_string()),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_trunc_counts_chars() {
        assert_eq!(trunc("hello".to_string(), 3), "hel");
        assert_eq!(trunc("hi".to_string(), 10), "hi");
        assert_eq!(trunc("héllo".to_string(), 2), "hé");
    }

    #[test]
    fn test_case_conversions() {
        assert_eq!(snakecase("camelCase".to_string()), "camel_case");
        assert_eq!(snakecase("PascalCase".to_string()), "pascal_case");
        assert_eq!(kebabcase("myApp name".to_string()), "my-app-name");
    }

    #[test]
    fn test_tostrings() {
        let mut env = Environment::new();
        env.add_filter("tostrings", tostrings);

        let render = |t: &str| env.render_str(t, ()).unwrap();
        assert_eq!(render(r#"{{ [1, 2, 3] | tostrings | join(",") }}"#), "1,2,3");
        assert_eq!(
            render(r#"{{ [80, 443] | tostrings(prefix="port-") | join(",") }}"#),
            "port-80,port-443"
        );
        assert_eq!(
            render(r#"{{ ["a", "", none, "c"] | tostrings(skip_empty=true) | join(",") }}"#),
            "a,c"
        );
        assert_eq!(render(r#"{{ 5 | tostrings(suffix="/TCP") | join(",") }}"#), "5/TCP");
    }

    #[test]
    fn test_semver_match() {
        assert!(semver_match(Value::from("v1.28.3"), ">=1.21.0".to_string()).unwrap());
        assert!(!semver_match(Value::from("1.20"), ">=1.21.0".to_string()).unwrap());
        assert!(semver_match(Value::from("1.31.0-eks-1"), ">=1.31.0-0".to_string()).unwrap());
        assert!(semver_match(Value::from("garbage"), ">=1".to_string()).is_err());
    }

    #[test]
    fn test_date_format() {
        assert_eq!(
            date_format("2024-03-05T10:20:30Z".to_string(), "%Y-%m-%d".to_string()).unwrap(),
            "2024-03-05"
        );
        assert_eq!(
            date_format("2024-03-05T10:20:30+02:00".to_string(), "%H:%M".to_string()).unwrap(),
            "10:20"
        );
        assert!(date_format("yesterday".to_string(), "%Y".to_string()).is_err());
        assert!(date_format("2024-03-05T10:20:30Z".to_string(), "%Q".to_string()).is_err());
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(int(Value::from("42")).unwrap(), 42);
        assert_eq!(int(Value::from("4.7")).unwrap(), 4);
        assert_eq!(int(Value::from(true)).unwrap(), 1);
        assert_eq!(float(Value::from(2.5)).unwrap(), 2.5);
        assert_eq!(float(Value::from("0.25")).unwrap(), 0.25);
        assert!(float(Value::from_serialize(serde_json::json!([1]))).is_err());
    }
}
