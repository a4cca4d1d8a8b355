//! Files API for accessing chart files from templates
//!
//! Every chart node gets its own accessor, resolving paths relative to that
//! chart only. A missing file is reported as `None`, never as an error; errors
//! are reserved for actual read failures.
//!
//! # Example
//!
//! ```jinja2
//! data:
//!   nginx.conf: {{ files.get("config/nginx.conf") | b64encode }}
//!
//! {% if files.exists("config/custom.yaml") %}
//!   custom: {{ files.get("config/custom.yaml") }}
//! {% endif %}
//!
//! {% for file in files.glob("scripts/*.sh") %}
//!   {{ file.name }}: {{ file.content | b64encode }}
//! {% endfor %}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chart::ChartFile;
use crate::error::{CoreError, Result};

/// Source of chart files
///
/// `get` distinguishes "not found" (`Ok(None)`) from a read failure (`Err`).
pub trait FileProvider: Send + Sync {
    /// Read the contents of a file as bytes
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Check if a file exists
    fn exists(&self, path: &str) -> bool;

    /// List files matching a glob pattern, sorted by path
    fn glob(&self, pattern: &str) -> Result<Vec<FileEntry>>;

    /// Read a file as lines
    fn lines(&self, path: &str) -> Result<Option<Vec<String>>> {
        Ok(self
            .get_string(path)?
            .map(|content| content.lines().map(String::from).collect()))
    }

    /// Read the contents of a file as a string (UTF-8)
    fn get_string(&self, path: &str) -> Result<Option<String>> {
        let Some(bytes) = self.get(path)? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| CoreError::FileAccess {
                path: path.to_string(),
                message: format!("file is not valid UTF-8: {}", e),
            })
    }
}

/// A file entry returned by glob operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the chart root
    pub path: String,
    /// File name (without directory)
    pub name: String,
    /// File content as string (UTF-8 lossy)
    pub content: String,
    /// File size in bytes
    pub size: usize,
}

impl FileEntry {
    fn new(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            content: String::from_utf8_lossy(data).to_string(),
            size: data.len(),
        }
    }
}

/// In-memory files of one chart
#[derive(Debug, Default, Clone)]
pub struct ChartFiles {
    files: BTreeMap<String, Vec<u8>>,
}

impl ChartFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the static files shipped with a chart
    pub fn from_chart_files(files: &[ChartFile]) -> Self {
        Self {
            files: files
                .iter()
                .map(|f| (normalize(&f.path).to_string(), f.data.clone()))
                .collect(),
        }
    }

    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(normalize(path).to_string(), content.into());
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Strip a leading `./`; paths are otherwise matched exactly
fn normalize(path: &str) -> &str {
    path.strip_prefix("./").unwrap_or(path)
}

impl FileProvider for ChartFiles {
    fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.get(normalize(path)).cloned())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(normalize(path))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        let glob_pattern = glob::Pattern::new(pattern).map_err(|e| CoreError::GlobPattern {
            message: format!("invalid glob pattern '{}': {}", pattern, e),
        })?;

        // BTreeMap iteration is already sorted by path
        Ok(self
            .files
            .iter()
            .filter(|(path, _)| glob_pattern.matches(path))
            .map(|(path, data)| FileEntry::new(path, data))
            .collect())
    }
}

/// A wrapper that provides the Files API to templates
///
/// Cheap to clone; this is what gets injected into a render context as `files`.
#[derive(Clone)]
pub struct Files {
    provider: Arc<dyn FileProvider>,
}

impl Files {
    pub fn new(provider: impl FileProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// Files of a chart
    pub fn for_chart(files: &[ChartFile]) -> Self {
        Self::new(ChartFiles::from_chart_files(files))
    }

    /// An accessor with no files at all
    pub fn empty() -> Self {
        Self::new(ChartFiles::new())
    }

    /// Get file contents as string
    pub fn get(&self, path: &str) -> Result<Option<String>> {
        self.provider.get_string(path)
    }

    /// Get file contents as bytes
    pub fn get_bytes(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.provider.get(path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.provider.exists(path)
    }

    pub fn glob(&self, pattern: &str) -> Result<Vec<FileEntry>> {
        self.provider.glob(pattern)
    }

    pub fn lines(&self, path: &str) -> Result<Option<Vec<String>>> {
        self.provider.lines(path)
    }
}

impl Default for Files {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Files {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Files").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenDisk;

    impl FileProvider for BrokenDisk {
        fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
            Err(CoreError::FileAccess {
                path: path.to_string(),
                message: "device not ready".to_string(),
            })
        }

        fn exists(&self, _path: &str) -> bool {
            true
        }

        fn glob(&self, _pattern: &str) -> Result<Vec<FileEntry>> {
            Ok(Vec::new())
        }
    }

    fn sample() -> ChartFiles {
        ChartFiles::new()
            .with_file("config/app.yaml", "key: value")
            .with_file("config/db.yaml", "host: localhost")
            .with_file("scripts/init.sh", "#!/bin/bash\necho hello")
    }

    #[test]
    fn test_get_existing_and_missing() {
        let files = sample();

        assert_eq!(
            files.get_string("config/app.yaml").unwrap().as_deref(),
            Some("key: value")
        );
        assert_eq!(files.get("nope.txt").unwrap(), None);
        assert!(files.exists("./config/db.yaml"));
        assert!(!files.exists("config"));
    }

    #[test]
    fn test_lines() {
        let lines = sample().lines("scripts/init.sh").unwrap().unwrap();
        assert_eq!(lines, vec!["#!/bin/bash", "echo hello"]);
        assert!(sample().lines("missing").unwrap().is_none());
    }

    #[test]
    fn test_glob_deterministic_order() {
        let files = ChartFiles::new()
            .with_file("z.yaml", "z")
            .with_file("a.yaml", "a")
            .with_file("m.yaml", "m")
            .with_file("other/c.yaml", "c");

        let entries = files.glob("*.yaml").unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();

        assert_eq!(paths, vec!["a.yaml", "m.yaml", "z.yaml"]);
        assert_eq!(entries[0].name, "a.yaml");
        assert_eq!(entries[0].size, 1);
    }

    #[test]
    fn test_glob_pattern_validation() {
        let err = ChartFiles::new().glob("[invalid").unwrap_err();
        assert!(err.to_string().contains("invalid glob pattern"));
    }

    #[test]
    fn test_binary_file_handling() {
        let data = vec![0u8, 1, 2, 255, 254, 253];
        let files = ChartFiles::new().with_file("binary.bin", data.clone());

        assert_eq!(files.get("binary.bin").unwrap(), Some(data));
        assert!(files.get_string("binary.bin").is_err());
    }

    #[test]
    fn test_read_failure_is_not_a_miss() {
        let files = Files::new(BrokenDisk);
        let err = files.get("config.yaml").unwrap_err();
        assert!(err.to_string().contains("device not ready"));
    }

    #[test]
    fn test_files_wrapper() {
        let files = Files::for_chart(&[ChartFile::new("test.txt", "hello world")]);

        assert!(files.exists("test.txt"));
        assert_eq!(files.get("test.txt").unwrap().as_deref(), Some("hello world"));
        assert!(Files::empty().get("test.txt").unwrap().is_none());
    }
}
