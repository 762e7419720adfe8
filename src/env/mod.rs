//! Environment model
//!
//! An ordered key/value map with PATH helpers and shell-style expansion.
//! Insertion order is preserved through clone and merge so the environment
//! handed to child processes is deterministic.

pub mod dotenv;
mod expand;

pub use expand::{expand, ExpandOptions};

use crate::error::ExpandResult;
use indexmap::IndexMap;
use std::path::Path;

/// Platform-specific separator between PATH entries
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Name of the PATH variable on the current platform
#[cfg(windows)]
pub const PATH_KEY: &str = "Path";
#[cfg(not(windows))]
pub const PATH_KEY: &str = "PATH";

/// Ordered environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: IndexMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Env {
            vars: IndexMap::new(),
        }
    }

    /// Snapshot of the current process environment
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    /// Get a variable
    ///
    /// On Windows variable names are case-insensitive, so a miss on the exact
    /// key falls back to a case-insensitive match.
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.vars.get(key) {
            return Some(v.as_str());
        }

        if cfg!(windows) {
            return self
                .vars
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str());
        }

        None
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Union with right-hand precedence
    ///
    /// Keys already present keep their position; new keys are appended.
    pub fn merge(&mut self, other: &Env) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    /// Copy of the underlying map
    pub fn to_map(&self) -> IndexMap<String, String> {
        self.vars.clone()
    }

    /// Current PATH value, or an empty string
    pub fn path(&self) -> &str {
        self.get(PATH_KEY).unwrap_or("")
    }

    pub fn set_path(&mut self, value: impl Into<String>) {
        self.set(PATH_KEY, value);
    }

    /// PATH split into its non-empty entries
    pub fn split_path(&self) -> Vec<String> {
        self.path()
            .split(PATH_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Whether PATH already contains `dir`
    pub fn has_path(&self, dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        self.split_path().iter().any(|p| Path::new(p) == dir)
    }

    /// Put `dir` at the front of PATH
    ///
    /// No-op when it is already the first entry.
    pub fn prepend_path(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref().to_string_lossy().to_string();
        let current = self.path().to_string();

        if current.is_empty() {
            self.set_path(dir);
            return;
        }

        if current.split(PATH_SEPARATOR).next() == Some(dir.as_str()) {
            return;
        }

        self.set_path(format!("{}{}{}", dir, PATH_SEPARATOR, current));
    }

    /// Put `dir` at the end of PATH unless it is already present
    pub fn append_path(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        if self.has_path(dir) {
            return;
        }

        let dir = dir.to_string_lossy().to_string();
        let current = self.path().to_string();
        if current.is_empty() {
            self.set_path(dir);
        } else {
            self.set_path(format!("{}{}{}", current, PATH_SEPARATOR, dir));
        }
    }

    /// Expand `$VAR`, `${VAR}` and friends against this environment
    ///
    /// `${VAR:=default}` assigns into the environment, which is why this
    /// takes `&mut self`.
    pub fn expand(&mut self, input: &str, options: &ExpandOptions) -> ExpandResult<String> {
        expand(input, self, options)
    }
}

impl FromIterator<(String, String)> for Env {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Env {
            vars: iter.into_iter().collect(),
        }
    }
}

impl From<IndexMap<String, String>> for Env {
    fn from(vars: IndexMap<String, String>) -> Self {
        Env { vars }
    }
}

impl<'a> IntoIterator for &'a Env {
    type Item = (&'a String, &'a String);
    type IntoIter = indexmap::map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}
