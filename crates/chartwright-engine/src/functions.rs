//! Template functions (global functions available in templates)

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chartwright_core::context::RESERVED_NAMES;
use indexmap::IndexMap;
use minijinja::value::{Rest, ValueKind};
use minijinja::{Error, ErrorKind, State, Value};
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::Abort;
use crate::lookup::ResourceLookup;
use crate::suggestions::named_template_hint;

/// Default maximum nesting of `include` and `tpl` calls
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 16;

/// Fail with a custom error message
///
/// Usage: {{ fail("Something went wrong") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(Abort::Failed { message }.into_error())
}

/// Abort the render unless `value` is set
///
/// Undefined, none and the empty string count as unset.
pub fn require(value: Value, message: Option<String>) -> Result<Value, Error> {
    let unset = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(|s| s.is_empty());

    if unset {
        let message = message.unwrap_or_else(|| "required value is missing".to_string());
        return Err(Abort::Required { message }.into_error());
    }
    Ok(value)
}

/// Usage: {{ required(values.image.tag, "image.tag is required") }}
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    require(value, message)
}

/// Create a dict from key-value pairs
///
/// Usage: {{ dict("key1", value1, "key2", value2) }}
pub fn dict(args: Vec<Value>) -> Result<Value, Error> {
    if !args.len().is_multiple_of(2) {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict requires an even number of arguments (key-value pairs)",
        ));
    }

    let mut map = IndexMap::new();
    for chunk in args.chunks(2) {
        let key = chunk[0]
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, "dict keys must be strings"))?;
        map.insert(key.to_string(), chunk[1].clone());
    }

    Ok(Value::from_iter(map))
}

/// Usage: {{ list("a", "b", "c") }}
pub fn list(args: Vec<Value>) -> Value {
    Value::from(args)
}

/// Get a value with a default if undefined
///
/// Usage: {{ get(values, "key", "default") }}
pub fn get(obj: Value, key: String, default: Option<Value>) -> Value {
    match obj.get_attr(&key) {
        Ok(v) if !v.is_undefined() => v,
        _ => default.unwrap_or(Value::UNDEFINED),
    }
}

/// Entries of a map value, in iteration order
fn map_entries(dict: &Value, caller: &str) -> Result<IndexMap<String, Value>, Error> {
    if dict.kind() != ValueKind::Map {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("{} requires a dict, got {}", caller, dict.kind()),
        ));
    }

    let mut entries = IndexMap::new();
    for key in dict.try_iter()? {
        if let Some(name) = key.as_str() {
            entries.insert(name.to_string(), dict.get_item(&key)?);
        }
    }
    Ok(entries)
}

/// Set a key in a dict (returns new dict, original unchanged)
///
/// Usage: {{ set(mydict, "newkey", "newvalue") }}
pub fn set(dict: Value, key: String, val: Value) -> Result<Value, Error> {
    let mut entries = map_entries(&dict, "set")?;
    entries.insert(key, val);
    Ok(Value::from_iter(entries))
}

/// Remove a key from a dict (returns new dict, original unchanged)
///
/// Usage: {{ unset(mydict, "keytoremove") }}
pub fn unset(dict: Value, key: String) -> Result<Value, Error> {
    let mut entries = map_entries(&dict, "unset")?;
    entries.shift_remove(&key);
    Ok(Value::from_iter(entries))
}

/// Deep get with path and default value
///
/// Usage: {{ dig(mydict, "a", "b", "c", "default") }}
pub fn dig(dict: Value, keys_and_default: Rest<Value>) -> Result<Value, Error> {
    let args: &[Value] = &keys_and_default;

    let Some((default, keys)) = args.split_last() else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "dig requires at least one key and a default value",
        ));
    };

    let mut current = dict;
    for key in keys {
        let next = match (key.as_str(), key.as_i64()) {
            (Some(name), _) => current.get_attr(name),
            (None, Some(index)) => current.get_item(&Value::from(index)),
            _ => return Ok(default.clone()),
        };
        match next {
            Ok(v) if !v.is_undefined() && !v.is_none() => current = v,
            _ => return Ok(default.clone()),
        }
    }

    Ok(current)
}

/// Return first non-empty value
///
/// Usage: {{ coalesce(a, b, c) }}
pub fn coalesce(args: Vec<Value>) -> Value {
    args.into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && arg.as_str().is_none_or(|s| !s.is_empty())
        })
        .unwrap_or(Value::UNDEFINED)
}

/// Usage: {{ ternary(true_value, false_value, condition) }}
pub fn ternary(true_val: Value, false_val: Value, condition: Value) -> Value {
    if condition.is_true() {
        true_val
    } else {
        false_val
    }
}

/// Usage: {{ tostring(value) }}
pub fn tostring(value: Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

/// Usage: {{ toint(value) }}
pub fn toint(value: Value) -> Result<i64, Error> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        return s.trim().parse::<i64>().map_err(|_| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert '{}' to int", s),
            )
        });
    }
    match f64::try_from(value.clone()) {
        Ok(f) => Ok(f.trunc() as i64),
        Err(_) => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot convert {} to int", value.kind()),
        )),
    }
}

/// Usage: {{ tofloat(value) }}
pub fn tofloat(value: Value) -> Result<f64, Error> {
    if let Some(s) = value.as_str() {
        return s.trim().parse::<f64>().map_err(|_| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert '{}' to float", s),
            )
        });
    }
    f64::try_from(value.clone()).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot convert {} to float", value.kind()),
        )
    })
}

/// Printf-style formatting
///
/// Usage: {{ printf("%s-%d", name, count) }}
///
/// Supports format specifiers: %s, %d, %f, %v, %q, %%
pub fn printf(format: String, args: Rest<Value>) -> Result<String, Error> {
    let mut result = String::with_capacity(format.len() + args.len() * 10);
    let mut chars = format.chars();
    let mut remaining = args.iter();

    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }

        let Some(spec) = chars.next() else {
            result.push('%');
            break;
        };
        if spec == '%' {
            result.push('%');
            continue;
        }

        let arg = remaining.next().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                "not enough arguments for format string",
            )
        })?;

        match spec {
            'd' => match arg.as_i64() {
                Some(n) => result.push_str(&n.to_string()),
                None => result.push_str(&arg.to_string()),
            },
            'f' => match f64::try_from(arg.clone()) {
                Ok(n) => result.push_str(&format!("{:.6}", n)),
                Err(_) => result.push_str(&arg.to_string()),
            },
            'q' => result.push_str(&format!("{:?}", tostring(arg.clone()))),
            _ => result.push_str(&tostring(arg.clone())),
        }
    }

    Ok(result)
}

/// Usage: {{ now() }}
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Random version 4 UUID
///
/// Usage: {{ uuidv4() }}
pub fn uuidv4() -> String {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Usage: {{ randalphanum(16) }}
pub fn randalphanum(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Resource lookup against the injected store
///
/// Usage: {{ lookup("v1", "Secret", "default", "my-secret") }}
///
/// Returns `{}` when nothing is found, a `{"items": [...]}` mapping when
/// `name` is empty.
pub fn lookup_with(
    store: &dyn ResourceLookup,
    api_version: &str,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<Value, Error> {
    match store.lookup(api_version, kind, namespace, name) {
        Ok(Some(resource)) => Ok(Value::from_serialize(resource)),
        Ok(None) => Ok(Value::from_iter(IndexMap::<String, Value>::new())),
        Err(failure) => Err(Abort::Lookup {
            kind: kind.to_string(),
            target: if namespace.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", namespace, name)
            },
            reason: failure.message,
        }
        .into_error()),
    }
}

/// Named templates reachable through `include`, and the nesting counter
/// shared by `include` and `tpl` for one render
#[derive(Debug)]
pub struct IncludeScope {
    /// Named template → environment key
    targets: HashMap<String, String>,
    depth: AtomicUsize,
    max_depth: usize,
}

/// Releases one level of nesting when dropped
struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl IncludeScope {
    pub fn new(targets: HashMap<String, String>, max_depth: usize) -> Arc<Self> {
        Arc::new(Self {
            targets,
            depth: AtomicUsize::new(0),
            max_depth,
        })
    }

    fn enter(&self, name: &str) -> Result<DepthGuard<'_>, Error> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = DepthGuard(&self.depth);

        if depth > self.max_depth {
            return Err(Abort::RecursionLimit {
                name: name.to_string(),
                depth,
                max: self.max_depth,
            }
            .into_error());
        }
        Ok(guard)
    }

    fn resolve(&self, name: &str) -> Result<&str, Error> {
        if let Some(key) = self.targets.get(name) {
            return Ok(key.as_str());
        }

        let declared: Vec<&str> = self.targets.keys().map(|k| k.as_str()).collect();
        let mut message = format!("named template '{}' is not defined", name);
        if let Some(hint) = named_template_hint(name, &declared) {
            message.push_str(". ");
            message.push_str(&hint);
        }
        Err(Error::new(ErrorKind::TemplateNotFound, message))
    }

    /// Render the named template `name` against exactly `ctx`
    ///
    /// Usage: {{ include("app.labels", {"values": values, "release": release}) }}
    pub fn include(&self, state: &State, name: &str, ctx: Value) -> Result<String, Error> {
        let key = self.resolve(name)?;

        if ctx.kind() != ValueKind::Map {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!(
                    "include context for '{}' must be a mapping, got {}",
                    name,
                    ctx.kind()
                ),
            ));
        }

        let _guard = self.enter(name)?;
        state.env().get_template(key)?.render(ctx)
    }

    /// Render a string as a template (double evaluation)
    ///
    /// Usage: {{ tpl(values.host, {"release": release}) }}
    pub fn tpl(&self, state: &State, text: String, ctx: Value) -> Result<String, Error> {
        if !text.contains("{{") && !text.contains("{%") {
            return Ok(text);
        }

        let _guard = self.enter("tpl")?;
        state.env().render_str(&text, ctx)
    }
}

/// Rebuild the context visible to the caller
///
/// Value keys first, then the reserved names, mirroring how root contexts
/// are assembled.
pub fn current_context(state: &State) -> Value {
    let mut ctx: IndexMap<String, Value> = IndexMap::new();

    if let Some(values) = state.lookup("values")
        && let Ok(keys) = values.try_iter()
    {
        for key in keys {
            if let Some(name) = key.as_str()
                && let Ok(v) = values.get_item(&key)
            {
                ctx.insert(name.to_string(), v);
            }
        }
    }

    for name in RESERVED_NAMES {
        if let Some(v) = state.lookup(name)
            && !v.is_undefined()
        {
            ctx.insert(name.to_string(), v);
        }
    }

    Value::from_iter(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupFailure, StaticLookup};
    use minijinja::{Environment, context};
    use serde_json::json;

    fn env_with_scope(named: &[(&str, &str)], max_depth: usize) -> Environment<'static> {
        let mut env = Environment::new();
        let mut targets = HashMap::new();
        for (name, body) in named {
            let key = format!("t#{}", name);
            env.add_template_owned(key.clone(), body.to_string()).unwrap();
            targets.insert(name.to_string(), key);
        }

        let scope = IncludeScope::new(targets, max_depth);
        let s = scope.clone();
        env.add_function("include", move |state: &State, name: String, ctx: Value| {
            s.include(state, &name, ctx)
        });
        let s = scope.clone();
        env.add_function("include_ctx", move |state: &State, name: String| {
            s.include(state, &name, current_context(state))
        });
        let s = scope.clone();
        env.add_function("tpl", move |state: &State, text: String, ctx: Value| {
            s.tpl(state, text, ctx)
        });
        env.add_function("tpl_ctx", move |state: &State, text: String| {
            scope.tpl(state, text, current_context(state))
        });
        env
    }

    #[test]
    fn test_dict() {
        let result = dict(vec![
            Value::from("key1"),
            Value::from("value1"),
            Value::from("key2"),
            Value::from(42),
        ])
        .unwrap();

        assert_eq!(result.get_attr("key1").unwrap().as_str(), Some("value1"));
        assert!(dict(vec![Value::from("odd")]).is_err());
    }

    #[test]
    fn test_list() {
        let result = list(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
        assert_eq!(result.len(), Some(3));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(
            ternary(Value::from("yes"), Value::from("no"), Value::from(true)).as_str(),
            Some("yes")
        );
        assert_eq!(
            ternary(Value::from("yes"), Value::from("no"), Value::from(false)).as_str(),
            Some("no")
        );
    }

    #[test]
    fn test_printf() {
        let mut env = Environment::new();
        env.add_function("printf", printf);

        let result = env
            .render_str(r#"{{ printf("Hello %s, you have %d messages", "Alice", 5) }}"#, ())
            .unwrap();
        assert_eq!(result, "Hello Alice, you have 5 messages");

        let result = env.render_str(r#"{{ printf("%q at 100%%", "x") }}"#, ()).unwrap();
        assert_eq!(result, "\"x\" at 100%");

        assert!(env.render_str(r#"{{ printf("%s %s", "one") }}"#, ()).is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(toint(Value::from("42")).unwrap(), 42);
        assert_eq!(toint(Value::from(3.9)).unwrap(), 3);
        assert!(toint(Value::from("nope")).is_err());
        assert_eq!(tofloat(Value::from("1.5")).unwrap(), 1.5);
        assert_eq!(tofloat(Value::from(2)).unwrap(), 2.0);
        assert_eq!(tostring(Value::from(7)), "7");
    }

    #[test]
    fn test_coalesce() {
        let first = coalesce(vec![Value::UNDEFINED, Value::from(""), Value::from("x")]);
        assert_eq!(first.as_str(), Some("x"));
        assert!(coalesce(vec![Value::from(())]).is_undefined());
    }

    #[test]
    fn test_set_and_unset() {
        let mut env = Environment::new();
        env.add_function("set", set);
        env.add_function("unset", unset);

        let result = env
            .render_str(r#"{% set d = {"a": 1} %}{% set e = set(d, "b", 2) %}{{ e.a }}{{ e.b }}{{ d.b is defined }}"#, ())
            .unwrap();
        assert_eq!(result, "12false");

        let result = env
            .render_str(r#"{% set d = {"a": 1, "b": 2} %}{{ unset(d, "a") | length }}{{ unset(d, "a").b }}"#, ())
            .unwrap();
        assert_eq!(result, "12");

        assert!(env.render_str(r#"{{ set([1], "a", 2) }}"#, ()).is_err());
    }

    #[test]
    fn test_dig() {
        let mut env = Environment::new();
        env.add_function("dig", dig);

        let template =
            r#"{% set d = {"a": {"b": [{"c": "found"}]}} %}{{ dig(d, "a", "b", 0, "c", "default") }}"#;
        assert_eq!(env.render_str(template, ()).unwrap(), "found");

        let template = r#"{% set d = {"a": {"b": {}}} %}{{ dig(d, "a", "b", "c", "default") }}"#;
        assert_eq!(env.render_str(template, ()).unwrap(), "default");
    }

    #[test]
    fn test_required_and_fail_abort() {
        let err = required(Value::from(""), Some("name is required".to_string())).unwrap_err();
        assert_eq!(
            Abort::find(&err),
            Some(&Abort::Required {
                message: "name is required".to_string()
            })
        );
        assert!(required(Value::from(()), None).is_err());
        assert!(required(Value::UNDEFINED, None).is_err());
        assert_eq!(required(Value::from(0), None).unwrap(), Value::from(0));

        let err = fail("nope".to_string()).unwrap_err();
        assert!(matches!(Abort::find(&err), Some(Abort::Failed { .. })));
    }

    #[test]
    fn test_environment_helpers() {
        let id = uuidv4();
        assert_eq!(id.len(), 36);
        assert_eq!(&id[14..15], "4");
        assert_ne!(uuidv4(), id);

        let token = randalphanum(24);
        assert_eq!(token.len(), 24);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        assert!(chrono::DateTime::parse_from_rfc3339(&now()).is_ok());
    }

    #[test]
    fn test_lookup_with() {
        let store = StaticLookup::new().with_resource(
            "v1",
            "Secret",
            "default",
            "db",
            json!({"data": {"password": "cw=="}}),
        );

        let found = lookup_with(&store, "v1", "Secret", "default", "db").unwrap();
        assert_eq!(
            found.get_attr("data").unwrap().get_attr("password").unwrap().as_str(),
            Some("cw==")
        );

        let missing = lookup_with(&store, "v1", "Secret", "default", "api").unwrap();
        assert_eq!(missing.len(), Some(0));
    }

    #[test]
    fn test_lookup_failure_aborts() {
        struct Unreachable;
        impl ResourceLookup for Unreachable {
            fn lookup(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<Option<serde_json::Value>, LookupFailure> {
                Err(LookupFailure::new("connection refused"))
            }
        }

        let err = lookup_with(&Unreachable, "v1", "Secret", "default", "db").unwrap_err();
        assert_eq!(
            Abort::find(&err),
            Some(&Abort::Lookup {
                kind: "Secret".to_string(),
                target: "default/db".to_string(),
                reason: "connection refused".to_string(),
            })
        );
    }

    #[test]
    fn test_include_uses_exact_context() {
        let env = env_with_scope(&[("greet", "{{ name }}:{{ values is defined }}")], 16);
        let result = env
            .render_str(
                r#"{{ include("greet", {"name": "explicit"}) }}"#,
                context! { name => "caller", values => context! {} },
            )
            .unwrap();
        assert_eq!(result, "explicit:false");
    }

    #[test]
    fn test_include_rejects_non_mapping_context() {
        let env = env_with_scope(&[("greet", "hi")], 16);
        let err = env.render_str(r#"{{ include("greet", [1]) }}"#, ()).unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));
    }

    #[test]
    fn test_include_unknown_suggests() {
        let env = env_with_scope(&[("app.labels", "x")], 16);
        let err = env
            .render_str(r#"{{ include("app.lables", {}) }}"#, ())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
        assert!(err.to_string().contains("`app.labels`"));
    }

    #[test]
    fn test_include_ctx_passes_caller_context() {
        let env = env_with_scope(&[("show", "{{ replicas }}/{{ release.name }}")], 16);
        let result = env
            .render_str(
                r#"{{ include_ctx("show") }}"#,
                context! {
                    values => context! { replicas => 3 },
                    replicas => 3,
                    release => context! { name => "r1" },
                },
            )
            .unwrap();
        assert_eq!(result, "3/r1");
    }

    #[test]
    fn test_self_include_hits_recursion_limit() {
        let env = env_with_scope(&[("loop", r#"{{ include("loop", {}) }}"#)], 4);
        let err = env.render_str(r#"{{ include("loop", {}) }}"#, ()).unwrap_err();

        match Abort::find(&err) {
            Some(Abort::RecursionLimit { name, depth, max }) => {
                assert_eq!(name, "loop");
                assert_eq!(*depth, 5);
                assert_eq!(*max, 4);
            }
            other => panic!("expected recursion limit, got {:?}", other),
        }
    }

    #[test]
    fn test_depth_is_released_between_siblings() {
        let env = env_with_scope(&[("leaf", "x")], 1);
        let result = env
            .render_str(r#"{{ include("leaf", {}) }}{{ include("leaf", {}) }}"#, ())
            .unwrap();
        assert_eq!(result, "xx");
    }

    #[test]
    fn test_tpl() {
        let env = env_with_scope(&[], 16);

        let result = env
            .render_str(r#"{{ tpl("Hello {{ name }}!", {"name": "World"}) }}"#, ())
            .unwrap();
        assert_eq!(result, "Hello World!");

        let result = env.render_str(r#"{{ tpl("plain text", {}) }}"#, ()).unwrap();
        assert_eq!(result, "plain text");

        let result = env
            .render_str(
                r#"{{ tpl_ctx(values.host) }}"#,
                context! {
                    values => context! { host => "{{ release.name }}.example.com" },
                    release => context! { name => "web" },
                },
            )
            .unwrap();
        assert_eq!(result, "web.example.com");
    }

    #[test]
    fn test_tpl_recursion_shares_counter() {
        let env = env_with_scope(&[], 3);
        let err = env
            .render_str(
                r#"{{ tpl_ctx(values.again) }}"#,
                context! { values => context! { again => "{{ tpl_ctx(values.again) }}" } },
            )
            .unwrap_err();
        assert!(matches!(
            Abort::find(&err),
            Some(Abort::RecursionLimit { .. })
        ));
    }
}
