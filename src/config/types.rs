//! Castfile schema
//!
//! These types mirror the YAML layout one to one. Resolution into runtime
//! tasks and jobs happens in [`crate::project`].

use crate::value::Mapping;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

/// Top-level castfile
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project id (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Project name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Project description (optional)
    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Remote module sources allowed without prompting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_sources: Vec<String>,

    /// Runner settings
    #[serde(default)]
    pub config: Settings,

    /// Project-level environment variables, in declaration order
    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub env: IndexMap<String, String>,

    /// Dotenv files loaded into the project environment
    #[serde(
        default,
        alias = "envfile",
        alias = "env-file",
        deserialize_with = "deserialize_dotenv_files"
    )]
    pub dotenv: Vec<DotEnvFile>,

    /// Directories prepended to PATH
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub paths: Vec<String>,

    /// Free-form metadata exposed to expressions as `cast.meta`
    #[serde(default)]
    pub meta: Mapping,

    /// Remote hosts used by ssh/scp tasks
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// Tasks, in declaration order
    #[serde(default, deserialize_with = "deserialize_tasks")]
    pub tasks: IndexMap<String, TaskConfig>,

    /// Jobs, in declaration order
    #[serde(default)]
    pub jobs: IndexMap<String, JobConfig>,
}

/// Runner settings under `config:`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Enable `$(command)` substitution during env expansion (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substitution: Option<bool>,

    /// Default context when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Settings {
    pub fn substitution(&self) -> bool {
        self.substitution.unwrap_or(true)
    }
}

/// A dotenv file reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DotEnvFile {
    pub path: String,

    /// Only load on this OS (`linux`, `darwin`/`macos`, `windows`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,

    /// Only load in these contexts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<String>,
}

impl DotEnvFile {
    pub fn new(path: impl Into<String>) -> Self {
        DotEnvFile {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Whether this file applies in `context`
    ///
    /// Files without contexts only apply to the default context.
    pub fn has_context(&self, context: &str) -> bool {
        if self.contexts.is_empty() {
            return context.is_empty() || context == "default" || context == "*";
        }
        self.contexts.iter().any(|c| c == context || c == "*")
    }

    /// Whether this file applies on the current OS
    pub fn matches_os(&self) -> bool {
        match self.os.as_deref() {
            None | Some("") => true,
            Some(os) => {
                let os = os.to_ascii_lowercase();
                let current = std::env::consts::OS;
                os == current || (os == "darwin" && current == "macos")
            }
        }
    }
}

/// The `inventory:` section
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryConfig {
    /// Named host defaults; hosts without `defaults:` use `default`
    #[serde(default)]
    pub defaults: IndexMap<String, HostDefaults>,

    /// Hosts keyed by alias
    #[serde(default)]
    pub hosts: IndexMap<String, HostConfig>,
}

/// Connection settings shared by several hosts
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, alias = "tags", deserialize_with = "deserialize_string_list")]
    pub groups: Vec<String>,
}

/// A single inventory host
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Host name or address; defaults to the alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, alias = "tags", deserialize_with = "deserialize_string_list")]
    pub groups: Vec<String>,

    /// Name of the defaults block to inherit from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<String>,
}

/// A task definition
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Explicit id; defaults to the normalized key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Display name; defaults to the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,

    /// Handler key (`shell`, `bash`, `docker`, `ssh`, a remote URI, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,

    /// Body handed to the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub env: IndexMap<String, String>,

    #[serde(
        default,
        alias = "envfile",
        alias = "env-file",
        deserialize_with = "deserialize_string_list"
    )]
    pub dotenv: Vec<String>,

    /// Handler parameters
    #[serde(default, alias = "input", alias = "inputs")]
    pub with: Mapping,

    #[serde(
        default,
        alias = "deps",
        alias = "dependencies",
        deserialize_with = "deserialize_needs"
    )]
    pub needs: Vec<NeedConfig>,

    #[serde(default, deserialize_with = "deserialize_hooks")]
    pub hooks: Option<HooksConfig>,

    /// Inventory aliases, host names or groups
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub hosts: Vec<String>,

    #[serde(
        default,
        rename = "if",
        alias = "predicate",
        deserialize_with = "deserialize_opt_scalar"
    )]
    pub if_: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_scalar")]
    pub force: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, deserialize_with = "deserialize_opt_scalar")]
    pub timeout: Option<String>,

    /// Task to inherit unset fields from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Extra arguments appended to the handler's command line
    #[serde(default, deserialize_with = "deserialize_args")]
    pub args: Vec<String>,
}

impl TaskConfig {
    /// A task whose whole definition is a run body
    pub fn from_run(run: impl Into<String>) -> Self {
        TaskConfig {
            run: Some(run.into()),
            ..Default::default()
        }
    }
}

/// A dependency on another task
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NeedConfig {
    #[serde(alias = "name", alias = "task")]
    pub id: String,

    /// Parsed for compatibility; needs always run sequentially
    #[serde(default)]
    pub parallel: bool,
}

/// Before/after hook suffixes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HooksConfig {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// A job definition
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, alias = "description", skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Jobs that must run before this one
    #[serde(
        default,
        alias = "deps",
        alias = "dependencies",
        deserialize_with = "deserialize_string_list"
    )]
    pub needs: Vec<String>,

    #[serde(
        default,
        rename = "if",
        alias = "predicate",
        deserialize_with = "deserialize_opt_scalar"
    )]
    pub if_: Option<String>,

    /// Task names run in order
    #[serde(default, deserialize_with = "deserialize_steps")]
    pub steps: Vec<String>,
}

/// Convert a scalar YAML value into a string
fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Deserialize a map whose values may be any scalar
fn deserialize_string_map<'de, D>(deserializer: D) -> Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(IndexMap::new()),
        Value::Mapping(map) => {
            let mut out = IndexMap::new();
            for (k, v) in map {
                let key = scalar_to_string(&k)
                    .ok_or_else(|| D::Error::custom("env keys must be strings"))?;
                let val = match v {
                    Value::Null => String::new(),
                    other => scalar_to_string(&other).ok_or_else(|| {
                        D::Error::custom(format!("env value for {} must be a scalar", key))
                    })?,
                };
                out.insert(key, val);
            }
            Ok(out)
        }
        _ => Err(D::Error::custom("env must be a mapping")),
    }
}

/// Deserialize a single string or a list of strings
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(seq) => seq
            .iter()
            .map(|item| {
                scalar_to_string(item).ok_or_else(|| D::Error::custom("expected a list of strings"))
            })
            .collect(),
        other => scalar_to_string(&other)
            .map(|s| vec![s])
            .ok_or_else(|| D::Error::custom("expected a string or a list of strings")),
    }
}

/// Deserialize a bool, number or string into an optional string
fn deserialize_opt_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(None),
        other => scalar_to_string(&other)
            .map(Some)
            .ok_or_else(|| D::Error::custom("expected a scalar value")),
    }
}

/// Deserialize args as a list or a shell-quoted string
fn deserialize_args<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::String(s) => shlex::split(&s)
            .ok_or_else(|| D::Error::custom(format!("invalid quoting in args: {}", s))),
        other => deserialize_string_list(other).map_err(D::Error::custom),
    }
}

/// Deserialize dotenv entries given as paths or `{path, os, contexts}`
fn deserialize_dotenv_files<'de, D>(deserializer: D) -> Result<Vec<DotEnvFile>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    let parse_one = |item: Value| -> Result<DotEnvFile, D::Error> {
        match item {
            Value::String(s) => Ok(DotEnvFile::new(s)),
            Value::Mapping(_) => DotEnvFile::deserialize(item).map_err(D::Error::custom),
            _ => Err(D::Error::custom("dotenv entries must be strings or mappings")),
        }
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(seq) => seq.into_iter().map(parse_one).collect(),
        other => Ok(vec![parse_one(other)?]),
    }
}

/// Deserialize needs given as ids or `{id, parallel}` mappings
fn deserialize_needs<'de, D>(deserializer: D) -> Result<Vec<NeedConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    let parse_one = |item: Value| -> Result<NeedConfig, D::Error> {
        match item {
            Value::String(id) => Ok(NeedConfig {
                id,
                parallel: false,
            }),
            Value::Mapping(_) => NeedConfig::deserialize(item).map_err(D::Error::custom),
            _ => Err(D::Error::custom("needs entries must be strings or mappings")),
        }
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(seq) => seq.into_iter().map(parse_one).collect(),
        other => Ok(vec![parse_one(other)?]),
    }
}

/// Deserialize `hooks: true` or `hooks: {before: .., after: ..}`
fn deserialize_hooks<'de, D>(deserializer: D) -> Result<Option<HooksConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some(HooksConfig {
            before: vec!["before".to_string()],
            after: vec!["after".to_string()],
        })),
        Value::Mapping(map) => {
            let mut hooks = HooksConfig::default();
            for (k, v) in map {
                let key = k.as_str().unwrap_or_default().to_string();
                let list = deserialize_string_list(v).map_err(D::Error::custom)?;
                match key.as_str() {
                    "before" => hooks.before = list,
                    "after" => hooks.after = list,
                    other => {
                        return Err(D::Error::custom(format!("unknown hooks key '{}'", other)))
                    }
                }
            }
            Ok(Some(hooks))
        }
        _ => Err(D::Error::custom("hooks must be a bool or a mapping")),
    }
}

/// Deserialize job steps given as task names or `{task: name}`
fn deserialize_steps<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    let parse_one = |item: Value| -> Result<String, D::Error> {
        match &item {
            Value::String(s) => Ok(s.clone()),
            Value::Mapping(map) => map
                .get("task")
                .or_else(|| map.get("id"))
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| D::Error::custom("job steps must name a task")),
            _ => Err(D::Error::custom("job steps must be strings or mappings")),
        }
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(seq) => seq.into_iter().map(parse_one).collect(),
        other => Ok(vec![parse_one(other)?]),
    }
}

/// Deserialize tasks, treating a scalar task as its run body
fn deserialize_tasks<'de, D>(deserializer: D) -> Result<IndexMap<String, TaskConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::Null => Ok(IndexMap::new()),
        Value::Mapping(map) => {
            let mut tasks = IndexMap::new();
            for (k, v) in map {
                let name = scalar_to_string(&k)
                    .ok_or_else(|| D::Error::custom("task names must be strings"))?;
                let task = match v {
                    Value::String(run) => TaskConfig::from_run(run),
                    Value::Null => TaskConfig::default(),
                    other => TaskConfig::deserialize(other)
                        .map_err(|e| D::Error::custom(format!("task {}: {}", name, e)))?,
                };
                tasks.insert(name, task);
            }
            Ok(tasks)
        }
        _ => Err(D::Error::custom("tasks must be a mapping")),
    }
}
