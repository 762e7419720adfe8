//! Tagged values used for `with` parameters, task outputs and expression scopes
//!
//! Values are addressed with dotted paths such as `build.artifacts.0.name`.
//! Mapping segments are keys, sequence segments are integer indexes.

use crate::error::{PathError, PathResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered string-keyed mapping of values
pub type Mapping = IndexMap<String, Value>;

/// A loosely-typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(Mapping),
}

impl Value {
    /// Create an empty mapping value
    pub fn mapping() -> Self {
        Value::Mapping(Mapping::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by predicates
    ///
    /// Only `true` and the strings `"true"`/`"1"` are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::String(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            _ => false,
        }
    }

    /// Short name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Get a nested value by dotted path
    pub fn get_path(&self, path: &str) -> PathResult<&Value> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Value::Mapping(map) => map
                    .get(segment)
                    .ok_or_else(|| PathError::KeyNotFound(segment.to_string()))?,
                Value::Sequence(seq) => {
                    let index = parse_index(segment)?;
                    seq.get(index).ok_or(PathError::IndexOutOfRange {
                        index,
                        len: seq.len(),
                    })?
                }
                _ => return Err(PathError::NotLastSegment(segment.to_string())),
            };
        }

        Ok(current)
    }

    /// Set a nested value by dotted path, creating intermediate mappings
    pub fn set_path(&mut self, path: &str, value: Value) -> PathResult<()> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }

        let segments: Vec<&str> = path.split('.').collect();
        let last = segments.len() - 1;
        let mut current = self;

        for (i, segment) in segments.iter().enumerate() {
            let is_last = i == last;
            current = match current {
                Value::Mapping(map) => {
                    if is_last {
                        map.insert(segment.to_string(), value);
                        return Ok(());
                    }
                    map.entry(segment.to_string()).or_insert_with(Value::mapping)
                }
                Value::Sequence(seq) => {
                    let index = parse_index(segment)?;
                    let len = seq.len();
                    let slot = seq
                        .get_mut(index)
                        .ok_or(PathError::IndexOutOfRange { index, len })?;
                    if is_last {
                        *slot = value;
                        return Ok(());
                    }
                    slot
                }
                _ => return Err(PathError::NotLastSegment(segment.to_string())),
            };
        }

        Ok(())
    }
}

fn parse_index(segment: &str) -> PathResult<usize> {
    segment
        .parse::<usize>()
        .map_err(|_| PathError::InvalidIndex(segment.to_string()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => f.write_str(s),
            Value::Sequence(_) | Value::Mapping(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::Sequence(items.into_iter().map(Value::String).collect())
    }
}

impl From<Mapping> for Value {
    fn from(map: Mapping) -> Self {
        Value::Mapping(map)
    }
}

impl From<&IndexMap<String, String>> for Value {
    fn from(map: &IndexMap<String, String>) -> Self {
        Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// Per-run task outputs keyed by task id
///
/// Each task that reports outputs contributes a nested mapping under its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Outputs {
    root: Value,
}

impl Default for Outputs {
    fn default() -> Self {
        Self::new()
    }
}

impl Outputs {
    pub fn new() -> Self {
        Outputs {
            root: Value::mapping(),
        }
    }

    /// Get a value by dotted path (`task.key`, `task.list.0`)
    pub fn get(&self, path: &str) -> PathResult<&Value> {
        self.root.get_path(path)
    }

    /// Set a value by dotted path, creating intermediate mappings
    pub fn set(&mut self, path: &str, value: Value) -> PathResult<()> {
        self.root.set_path(path, value)
    }

    /// Set a top-level entry without splitting the key on dots
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Value::Mapping(map) = &mut self.root {
            map.insert(key.into(), value);
        }
    }

    /// Union with right-hand precedence at the top level
    pub fn merge(&mut self, other: &Outputs) {
        if let (Value::Mapping(dest), Value::Mapping(src)) = (&mut self.root, &other.root) {
            for (k, v) in src {
                dest.insert(k.clone(), v.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_mapping().map(|m| m.is_empty()).unwrap_or(true)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Iterate top-level entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.root.as_mapping().into_iter().flat_map(|m| m.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let yaml = r#"
build:
  artifacts:
    - name: app
      size: 10
    - name: lib
  version: "1.2.0"
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_get_path_into_maps_and_sequences() {
        let v = sample();
        assert_eq!(
            v.get_path("build.artifacts.1.name").unwrap(),
            &Value::String("lib".to_string())
        );
        assert_eq!(v.get_path("build.artifacts.0.size").unwrap(), &Value::Number(10.0));
    }

    #[test]
    fn test_get_path_errors_are_typed() {
        let v = sample();
        assert_eq!(
            v.get_path("build.missing"),
            Err(PathError::KeyNotFound("missing".to_string()))
        );
        assert_eq!(
            v.get_path("build.artifacts.5"),
            Err(PathError::IndexOutOfRange { index: 5, len: 2 })
        );
        assert_eq!(
            v.get_path("build.artifacts.x"),
            Err(PathError::InvalidIndex("x".to_string()))
        );
        assert_eq!(
            v.get_path("build.version.major"),
            Err(PathError::NotLastSegment("major".to_string()))
        );
    }

    #[test]
    fn test_set_path_creates_intermediate_maps() {
        let mut v = Value::mapping();
        v.set_path("a.b.c", Value::from("deep")).unwrap();
        assert_eq!(v.get_path("a.b.c").unwrap(), &Value::from("deep"));
    }

    #[test]
    fn test_set_path_into_sequence() {
        let mut v = sample();
        v.set_path("build.artifacts.0.name", Value::from("bin")).unwrap();
        assert_eq!(v.get_path("build.artifacts.0.name").unwrap(), &Value::from("bin"));

        let err = v.set_path("build.artifacts.9.name", Value::Null).unwrap_err();
        assert_eq!(err, PathError::IndexOutOfRange { index: 9, len: 2 });
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut v = sample();
        let err = v.set_path("build.version.major", Value::from("1")).unwrap_err();
        assert_eq!(err, PathError::NotLastSegment("major".to_string()));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::from("true").is_truthy());
        assert!(Value::from("1").is_truthy());
        assert!(!Value::from("yes please").is_truthy());
        assert!(!Value::Number(1.0).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_display_numbers_without_fraction() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_outputs_merge_right_precedence() {
        let mut left = Outputs::new();
        left.set("build.version", Value::from("1")).unwrap();
        let mut right = Outputs::new();
        right.set("build.version", Value::from("2")).unwrap();
        right.set("test.passed", Value::from("true")).unwrap();

        left.merge(&right);
        assert_eq!(left.get("build.version").unwrap(), &Value::from("2"));
        assert_eq!(left.get("test.passed").unwrap(), &Value::from("true"));
    }
}
