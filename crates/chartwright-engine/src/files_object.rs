//! MiniJinja integration for the Files API
//!
//! Exposes the files of the current chart as `files` in every template.
//!
//! # Usage in Templates
//!
//! ```jinja2
//! {{ files.get("config/nginx.conf") or "" }}
//!
//! {% if files.exists("config/custom.yaml") %}
//!   {{ files.get("config/custom.yaml") }}
//! {% endif %}
//!
//! {% for file in files.glob("config/*.yaml") %}
//!   {{ file.name }}: {{ file.content | b64encode }}
//! {% endfor %}
//! ```
//!
//! A missing file reads as `none`. A failing read aborts the render.

use std::sync::Arc;

use chartwright_core::{CoreError, FileEntry, Files};
use minijinja::value::{Enumerator, Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind, State};

use crate::error::Abort;

/// Template-side view of a chart's [`Files`]
#[derive(Debug)]
pub struct FilesObject {
    files: Files,
}

impl FilesObject {
    pub fn new(files: Files) -> Self {
        Self { files }
    }
}

fn access_error(path: &str, err: CoreError) -> Error {
    let reason = match err {
        CoreError::FileAccess { message, .. } => message,
        other => other.to_string(),
    };
    Abort::FileAccess {
        path: path.to_string(),
        reason,
    }
    .into_error()
}

fn or_none<T: Into<Value>>(found: Option<T>) -> Value {
    found.map(Into::into).unwrap_or_else(|| Value::from(()))
}

impl Object for FilesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        method: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        let path = path_arg(args, method)?;

        match method {
            "get" => self
                .files
                .get(&path)
                .map(or_none)
                .map_err(|e| access_error(&path, e)),

            "get_bytes" => self
                .files
                .get_bytes(&path)
                .map(|bytes| or_none(bytes.map(Value::from_bytes)))
                .map_err(|e| access_error(&path, e)),

            "lines" => self
                .files
                .lines(&path)
                .map(or_none)
                .map_err(|e| access_error(&path, e)),

            "exists" => Ok(Value::from(self.files.exists(&path))),

            "glob" => {
                let entries = self
                    .files
                    .glob(&path)
                    .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
                Ok(entries
                    .into_iter()
                    .map(|entry| Value::from_object(FileEntryObject(entry)))
                    .collect())
            }

            _ => Err(Error::new(
                ErrorKind::UnknownMethod,
                format!(
                    "files object has no method '{}'. Available methods: get, get_bytes, exists, glob, lines",
                    method
                ),
            )),
        }
    }
}

fn path_arg(args: &[Value], method: &str) -> Result<String, Error> {
    args.first()
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("files.{}() requires a path string argument", method),
            )
        })
}

/// A glob match, exposed as a read-only mapping
#[derive(Debug)]
struct FileEntryObject(FileEntry);

impl Object for FileEntryObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        match key.as_str()? {
            "path" => Some(Value::from(self.0.path.clone())),
            "name" => Some(Value::from(self.0.name.clone())),
            "content" => Some(Value::from(self.0.content.clone())),
            "size" => Some(Value::from(self.0.size)),
            _ => None,
        }
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Str(&["path", "name", "content", "size"])
    }
}
