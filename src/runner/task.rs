//! Runtime task representation
//!
//! This differs from [`config::TaskConfig`] by carrying a resolved id and
//! structured needs/hooks, and by being the unit that `extends` inheritance
//! operates on.

use crate::config;
use crate::utils::to_id;
use crate::value::Mapping;
use indexmap::IndexMap;

/// Handler used when a task does not name one
pub const DEFAULT_USES: &str = "shell";

/// A dependency on another task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Need {
    pub id: String,

    /// Parsed for compatibility; needs always run sequentially
    pub parallel: bool,
}

impl Need {
    pub fn new(id: impl Into<String>) -> Self {
        Need {
            id: id.into(),
            parallel: false,
        }
    }
}

/// Hook suffixes; `build` with before hook `before` runs `build:before` first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

/// Runtime task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Task {
    /// Unique, lower-case id
    pub id: String,

    /// Display name
    pub name: String,

    pub desc: Option<String>,
    pub help: Option<String>,

    /// Handler key; `shell` when unset
    pub uses: Option<String>,

    /// Body handed to the handler
    pub run: Option<String>,

    pub env: IndexMap<String, String>,
    pub dotenv: Vec<String>,
    pub with: Mapping,
    pub needs: Vec<Need>,
    pub hooks: Hooks,
    pub hosts: Vec<String>,
    pub if_: Option<String>,
    pub force: Option<String>,
    pub cwd: Option<String>,
    pub timeout: Option<String>,
    pub extends: Option<String>,
    pub args: Vec<String>,
}

impl Task {
    /// Create an empty task with the given name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Task {
            id: to_id(&name),
            name,
            ..Default::default()
        }
    }

    /// Create a runtime task from its castfile entry
    pub fn from_config(key: &str, config: config::TaskConfig) -> Self {
        let id = config.id.as_deref().map(to_id).unwrap_or_else(|| to_id(key));
        let name = config.name.unwrap_or_else(|| key.to_string());

        Task {
            id,
            name,
            desc: config.desc,
            help: config.help,
            uses: config.uses,
            run: config.run,
            env: config.env,
            dotenv: config.dotenv,
            with: config.with,
            needs: config
                .needs
                .into_iter()
                .map(|n| Need {
                    id: n.id,
                    parallel: n.parallel,
                })
                .collect(),
            hooks: config
                .hooks
                .map(|h| Hooks {
                    before: h.before,
                    after: h.after,
                })
                .unwrap_or_default(),
            hosts: config.hosts,
            if_: config.if_,
            force: config.force,
            cwd: config.cwd,
            timeout: config.timeout,
            extends: config.extends,
            args: config.args,
        }
    }

    /// Handler key, defaulting to `shell`
    pub fn uses(&self) -> &str {
        self.uses
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_USES)
    }

    /// Fill unset fields from `base`
    ///
    /// Scalars are taken from the base only when unset here. Hosts and
    /// dotenv lists are merged, base first. `env` and `with` start from the
    /// base and are overridden by this task's entries.
    pub fn inherit(&mut self, base: &Task) {
        fn fill(slot: &mut Option<String>, from: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }

        fill(&mut self.desc, &base.desc);
        fill(&mut self.help, &base.help);
        fill(&mut self.uses, &base.uses);
        fill(&mut self.run, &base.run);
        fill(&mut self.if_, &base.if_);
        fill(&mut self.force, &base.force);
        fill(&mut self.cwd, &base.cwd);
        fill(&mut self.timeout, &base.timeout);

        if self.needs.is_empty() {
            self.needs = base.needs.clone();
        }
        if self.hooks.is_empty() {
            self.hooks = base.hooks.clone();
        }
        if self.args.is_empty() {
            self.args = base.args.clone();
        }

        self.hosts = merge_lists(&base.hosts, &self.hosts);
        self.dotenv = merge_lists(&base.dotenv, &self.dotenv);

        let mut env = base.env.clone();
        for (k, v) in &self.env {
            env.insert(k.clone(), v.clone());
        }
        self.env = env;

        let mut with = base.with.clone();
        for (k, v) in &self.with {
            with.insert(k.clone(), v.clone());
        }
        self.with = with;
    }
}

fn merge_lists(first: &[String], second: &[String]) -> Vec<String> {
    let mut out: Vec<String> = first.to_vec();
    for item in second {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

/// Insertion-ordered tasks keyed by id
#[derive(Debug, Clone, Default)]
pub struct TaskMap {
    tasks: IndexMap<String, Task>,
}

impl TaskMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task under its id, replacing any previous entry
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    /// Look up by exact id, then case-insensitively
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name).or_else(|| {
            self.tasks
                .iter()
                .find(|(id, _)| id.eq_ignore_ascii_case(name))
                .map(|(_, t)| t)
        })
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Task> {
        let key = self.resolve_key(name)?;
        self.tasks.get_mut(&key)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn resolve_key(&self, name: &str) -> Option<String> {
        if self.tasks.contains_key(name) {
            return Some(name.to_string());
        }
        self.tasks
            .keys()
            .find(|id| id.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.tasks.keys()
    }
}

impl FromIterator<Task> for TaskMap {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        let mut map = TaskMap::new();
        for task in iter {
            map.insert(task);
        }
        map
    }
}
