//! Query registry: SQL templates addressed by dotted codes.
//!
//! Every `.sql` file below the query root becomes one named query. Its code is
//! the path relative to the root with the extension stripped and separators
//! replaced by dots, so `queries/users/get_by_id.sql` is `users.get_by_id`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FaylError, FaylResult};

/// File extension of query templates.
pub const QUERY_EXTENSION: &str = "sql";

/// Read-only mapping from query code to raw template text.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    queries: BTreeMap<String, String>,
}

impl Registry {
    /// Walk `root` recursively and load every `.sql` file.
    pub fn load(root: impl AsRef<Path>) -> FaylResult<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(FaylError::Registry(format!(
                "query location does not exist: {}",
                root.display()
            )));
        }

        let mut queries = BTreeMap::new();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| {
                FaylError::Registry(format!("error reading {}: {}", dir.display(), e))
            })?;

            for entry in entries {
                let path = entry
                    .map_err(|e| FaylError::Registry(format!("error walking {}: {}", dir.display(), e)))?
                    .path();

                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !is_query_file(&path) {
                    continue;
                }

                let content = fs::read_to_string(&path).map_err(|e| {
                    FaylError::Registry(format!("error reading file {}: {}", path.display(), e))
                })?;
                queries.insert(code_for(root, &path)?, content);
            }
        }

        Ok(Self { queries })
    }

    /// Look up the template registered under `code`.
    pub fn get(&self, code: &str) -> FaylResult<&str> {
        self.queries
            .get(code)
            .map(String::as_str)
            .ok_or_else(|| FaylError::UnknownQuery(code.to_string()))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.queries.contains_key(code)
    }

    /// All registered codes, sorted.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Registry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            queries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn is_query_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(QUERY_EXTENSION))
}

fn code_for(root: &Path, path: &Path) -> FaylResult<String> {
    let relative = path.strip_prefix(root).map_err(|e| {
        FaylError::Registry(format!("error getting relative path of {}: {}", path.display(), e))
    })?;

    let parts: Vec<String> = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    Ok(parts.join("."))
}
