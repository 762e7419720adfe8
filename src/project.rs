//! Projects
//!
//! A [`Project`] is a loaded castfile. Loading resolves tasks (including
//! `extends` inheritance), jobs and the inventory; [`Project::init`] then
//! builds the project environment once and opens the IPC files. Runs can be
//! started any number of times after that.

use crate::config::{self, Config};
use crate::env::{dotenv, Env, ExpandOptions};
use crate::error::{ConfigError, ConfigResult, Result};
use crate::eval::Scope;
use crate::inventory::Inventory;
use crate::runner::ipc::{self, IpcFiles, CAST_ENV, CAST_PATH};
use crate::runner::{CancelToken, Engine, Job, JobMap, Runtime, Task, TaskMap, TaskResult};
use crate::utils::{resolve_path, split_optional, to_id};
use crate::value::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Env var selecting the execution context
pub const CONTEXT_VAR: &str = "CAST_CONTEXT";

/// Context used when nothing selects one
pub const DEFAULT_CONTEXT: &str = "default";

/// Read-only project facts shared with handlers
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,

    /// Directory containing the castfile
    pub dir: PathBuf,

    pub file: PathBuf,
    pub trusted_sources: Vec<String>,
    pub meta: Mapping,

    /// `$(command)` substitution during env expansion
    pub substitution: bool,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        ProjectInfo {
            id: String::new(),
            name: String::new(),
            dir: PathBuf::new(),
            file: PathBuf::new(),
            trusted_sources: Vec::new(),
            meta: Mapping::new(),
            substitution: true,
        }
    }
}

impl ProjectInfo {
    fn from_config(config: &Config, file: &Path) -> Self {
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let name = config.name.clone().unwrap_or_else(|| dir_name.clone());
        let id = config
            .id
            .as_deref()
            .map(to_id)
            .unwrap_or_else(|| to_id(&name));

        ProjectInfo {
            id,
            name,
            dir,
            file: file.to_path_buf(),
            trusted_sources: config.trusted_sources.clone(),
            meta: config.meta.clone(),
            substitution: config.config.substitution(),
        }
    }

    fn expand_options(&self) -> ExpandOptions {
        if self.substitution {
            ExpandOptions::default()
        } else {
            ExpandOptions::literal()
        }
    }
}

/// State built by [`Project::init`]
#[derive(Debug)]
struct Initialized {
    context: String,
    env: Env,
    scope: Scope,
    ipc: IpcFiles,
}

/// A loaded castfile
pub struct Project {
    config: Config,
    info: Arc<ProjectInfo>,
    tasks: TaskMap,
    jobs: JobMap,
    inventory: Inventory,
    runtime: Arc<Runtime>,
    base_env: Option<Env>,
    context: Option<String>,
    state: Option<Initialized>,
}

impl Project {
    /// Load the castfile at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let file = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let config = config::parse_config_file(&file)?;
        Ok(Self::from_config(config, file)?)
    }

    /// Load the nearest castfile at or above `dir`
    pub fn discover(dir: &Path) -> Result<Self> {
        let file = config::find_config_file_from(dir.to_path_buf())?;
        Self::load(&file)
    }

    /// Parse `yaml` as if it were the castfile in `dir`
    pub fn from_yaml_str(yaml: &str, dir: impl Into<PathBuf>) -> Result<Self> {
        let config = config::parse_config(yaml)?;
        Ok(Self::from_config(config, dir.into().join("castfile"))?)
    }

    /// Resolve tasks, jobs and the inventory of a parsed castfile
    pub fn from_config(config: Config, file: PathBuf) -> ConfigResult<Self> {
        config::validate_config(&config)?;

        let info = ProjectInfo::from_config(&config, &file);
        let tasks = build_tasks(&config)?;
        let jobs = config
            .jobs
            .iter()
            .map(|(key, job)| Job::from_config(key, job.clone()))
            .fold(JobMap::new(), |mut map, job| {
                map.insert(job);
                map
            });
        let inventory = Inventory::from_config(&config.inventory)?;

        Ok(Project {
            config,
            info: Arc::new(info),
            tasks,
            jobs,
            inventory,
            runtime: Arc::new(Runtime::default()),
            base_env: None,
            context: None,
            state: None,
        })
    }

    pub fn with_runtime(mut self, runtime: Arc<Runtime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Start the project environment from `env` instead of the process env
    pub fn with_env(mut self, env: Env) -> Self {
        self.base_env = Some(env);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = (!context.is_empty()).then_some(context);
        self
    }

    pub fn info(&self) -> &Arc<ProjectInfo> {
        &self.info
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    pub fn jobs(&self) -> &JobMap {
        &self.jobs
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Project environment, once initialized
    pub fn env(&self) -> Option<&Env> {
        self.state.as_ref().map(|s| &s.env)
    }

    /// Context in effect: explicit, then `CAST_CONTEXT`, then
    /// `config.context`, then `default`
    pub fn context_name(&self) -> String {
        if let Some(state) = &self.state {
            return state.context.clone();
        }
        self.resolve_context()
    }

    fn resolve_context(&self) -> String {
        let from_env = match &self.base_env {
            Some(env) => env.get(CONTEXT_VAR).map(str::to_string),
            None => std::env::var(CONTEXT_VAR).ok(),
        };

        self.context
            .clone()
            .or(from_env.filter(|c| !c.is_empty()))
            .or_else(|| self.config.config.context.clone())
            .unwrap_or_else(|| DEFAULT_CONTEXT.to_string())
    }

    /// One-time environment setup; later calls do nothing
    #[instrument(skip_all, fields(project = %self.info.id))]
    pub fn init(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let context = self.resolve_context();
        let env = self.base_env.clone().unwrap_or_else(Env::from_process);
        let (env, ipc) = self.setup_env(env, &context)?;
        let scope = self.base_scope();

        debug!(context = %context, vars = env.len(), "project initialized");
        self.state = Some(Initialized {
            context,
            env,
            scope,
            ipc,
        });
        Ok(())
    }

    /// Layer the project environment
    ///
    /// Order: base env, `paths`, inherited `CAST_PATH` entries, `./bin` and
    /// `./node_modules/.bin`, dotenv files, `env`, inherited `CAST_ENV`
    /// entries, then the IPC file variables.
    fn setup_env(&self, mut env: Env, context: &str) -> Result<(Env, IpcFiles)> {
        let dir = &self.info.dir;
        let options = self.info.expand_options();

        for path in &self.config.paths {
            env.prepend_path(resolve_path(dir, path));
        }

        let inherited_path = env.get(CAST_PATH).is_some_and(|p| !p.is_empty());
        let inherited_env = env.get(CAST_ENV).is_some_and(|p| !p.is_empty());
        let ipc = IpcFiles::open(&env)?;

        if inherited_path {
            for entry in ipc::read_path_file(ipc.path_file())? {
                env.prepend_path(entry);
            }
        }

        env.prepend_path(dir.join("bin"));
        env.prepend_path(dir.join("node_modules").join(".bin"));

        for file in &self.config.dotenv {
            if !file.matches_os() || !file.has_context(context) {
                continue;
            }
            let (path, optional) = split_optional(&file.path);
            let full = resolve_path(dir, path);
            if optional && !full.exists() {
                continue;
            }
            dotenv::load_file(&full, &mut env, &options).map_err(|e| ConfigError::ReadFile {
                path: full.clone(),
                error: e.to_string(),
            })?;
        }

        for (key, value) in &self.config.env {
            let expanded = env.expand(value, &options)?;
            env.set(key.clone(), expanded);
        }

        if inherited_env {
            ipc::read_dotenv_file(ipc.env_file(), &mut env, &options).map_err(|e| {
                ConfigError::ReadFile {
                    path: ipc.env_file().to_path_buf(),
                    error: e.to_string(),
                }
            })?;
        }

        ipc.export(&mut env);
        Ok((env, ipc))
    }

    fn base_scope(&self) -> Scope {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            os => os,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            arch => arch,
        };

        let mut scope = Scope::new();
        scope.insert("os", Value::from(os));
        scope.insert("arch", Value::from(arch));
        scope.insert("windows", Value::Bool(cfg!(windows)));
        scope.insert("linux", Value::Bool(os == "linux"));
        scope.insert("darwin", Value::Bool(os == "darwin"));
        if let Some(dirs) = directories::BaseDirs::new() {
            scope.insert("home", Value::from(dirs.home_dir().to_string_lossy().into_owned()));
        }
        if let Ok(n) = std::thread::available_parallelism() {
            scope.insert("num_cpu", Value::from(n.get()));
        }
        scope.insert("git", git_info(&self.info.dir));

        let mut project = Mapping::new();
        project.insert("id".into(), Value::from(self.info.id.clone()));
        project.insert("name".into(), Value::from(self.info.name.clone()));
        project.insert("dir".into(), Value::from(self.info.dir.to_string_lossy().into_owned()));

        let mut cast = Mapping::new();
        cast.insert("meta".into(), Value::Mapping(self.info.meta.clone()));
        cast.insert("project".into(), Value::Mapping(project));
        scope.insert("cast", Value::Mapping(cast));

        scope
    }

    fn initialized(&self) -> ConfigResult<&Initialized> {
        self.state
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("project is not initialized".into()))
    }

    fn engine<'a>(&'a self, state: &'a Initialized) -> Engine<'a> {
        Engine {
            info: self.info.clone(),
            tasks: &self.tasks,
            jobs: &self.jobs,
            inventory: &self.inventory,
            scope: &state.scope,
            runtime: self.runtime.clone(),
            ipc: Some(&state.ipc),
            context: &state.context,
        }
    }

    /// Run `targets` with extra handler `args`
    pub fn run_tasks(&mut self, targets: &[String], args: &[String]) -> Result<Vec<TaskResult>> {
        self.run_tasks_with(targets, args, &CancelToken::new())
    }

    pub fn run_tasks_with(
        &mut self,
        targets: &[String],
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<TaskResult>> {
        self.init()?;
        let state = self.initialized()?;
        Ok(self.engine(state).run_tasks(&state.env, targets, args, cancel)?)
    }

    /// Run a job, optionally followed by every job downstream of it
    pub fn run_job(&mut self, id: &str, downstream: bool) -> Result<Vec<TaskResult>> {
        self.run_job_with(id, downstream, &CancelToken::new())
    }

    pub fn run_job_with(&mut self, id: &str, downstream: bool, cancel: &CancelToken) -> Result<Vec<TaskResult>> {
        self.init()?;
        let state = self.initialized()?;
        self.engine(state).run_job(&state.env, id, downstream, cancel)
    }
}

/// Runtime tasks with `extends` inheritance applied
fn build_tasks(config: &Config) -> ConfigResult<TaskMap> {
    let declared: TaskMap = config
        .tasks
        .iter()
        .map(|(key, task)| Task::from_config(key, task.clone()))
        .collect();

    let mut resolved = TaskMap::new();
    for task in declared.iter() {
        resolved.insert(inherit_chain(&declared, task, &mut Vec::new())?);
    }
    Ok(resolved)
}

fn inherit_chain(tasks: &TaskMap, task: &Task, seen: &mut Vec<String>) -> ConfigResult<Task> {
    let Some(base_name) = task.extends.as_deref() else {
        return Ok(task.clone());
    };

    if seen.contains(&task.id) {
        return Err(ConfigError::CyclicalReference(seen.clone()));
    }
    seen.push(task.id.clone());

    let base = tasks.get(base_name).ok_or_else(|| ConfigError::UndefinedExtends {
        task: task.id.clone(),
        base: base_name.to_string(),
    })?;
    let base = inherit_chain(tasks, base, seen)?;

    let mut task = task.clone();
    task.inherit(&base);
    Ok(task)
}

/// `git.branch` and `git.sha` of the repository containing `dir`
fn git_info(dir: &Path) -> Value {
    let git = |args: &[&str]| -> Value {
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| Value::from(String::from_utf8_lossy(&o.stdout).trim().to_string()))
            .unwrap_or_default()
    };

    if !dir.is_dir() {
        return Value::mapping();
    }

    let mut info = Mapping::new();
    info.insert("branch".into(), git(&["rev-parse", "--abbrev-ref", "HEAD"]));
    info.insert("sha".into(), git(&["rev-parse", "HEAD"]));
    Value::Mapping(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(yaml: &str, dir: &Path) -> Project {
        Project::from_yaml_str(yaml, dir)
            .unwrap()
            .with_env(Env::new())
    }

    #[test]
    fn test_extends_chain() {
        let dir = TempDir::new().unwrap();
        let p = project(
            r#"
tasks:
  base:
    uses: bash
    env: { A: "1" }
  middle:
    extends: base
    cwd: ./sub
  leaf:
    extends: middle
    run: echo leaf
"#,
            dir.path(),
        );

        let leaf = p.tasks().get("leaf").unwrap();
        assert_eq!(leaf.uses(), "bash");
        assert_eq!(leaf.cwd.as_deref(), Some("./sub"));
        assert_eq!(leaf.env["A"], "1");
    }

    #[test]
    fn test_extends_cycle_is_rejected() {
        let result = Project::from_yaml_str(
            "tasks:\n  a: { extends: b, run: x }\n  b: { extends: a, run: y }\n",
            "/tmp",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_context_precedence() {
        let yaml = "config: { context: staging }\ntasks: { a: echo }\n";

        let p = Project::from_yaml_str(yaml, "/tmp").unwrap().with_env(Env::new());
        assert_eq!(p.context_name(), "staging");

        let mut env = Env::new();
        env.set(CONTEXT_VAR, "prod");
        let p = Project::from_yaml_str(yaml, "/tmp").unwrap().with_env(env);
        assert_eq!(p.context_name(), "prod");

        let p = Project::from_yaml_str(yaml, "/tmp")
            .unwrap()
            .with_env(Env::new())
            .with_context("qa");
        assert_eq!(p.context_name(), "qa");
    }

    #[test]
    fn test_env_layering() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".env"), "FROM_DOTENV=dot\nSHARED=dotenv\n").unwrap();
        fs::write(dir.path().join(".env.prod"), "PROD_ONLY=yes\n").unwrap();

        let yaml = r#"
dotenv:
  - .env
  - "?.env.missing"
  - { path: .env.prod, contexts: [prod] }
env:
  SHARED: env
  DERIVED: "${FROM_DOTENV}-derived"
tasks: { a: echo }
"#;
        let mut p = project(yaml, dir.path());
        p.init().unwrap();
        let env = p.env().unwrap();

        assert_eq!(env.get("FROM_DOTENV"), Some("dot"));
        assert_eq!(env.get("SHARED"), Some("env"));
        assert_eq!(env.get("DERIVED"), Some("dot-derived"));
        assert_eq!(env.get("PROD_ONLY"), None);
        assert!(env.get(CAST_PATH).is_some());
        assert!(env.get(CAST_ENV).is_some());
        assert!(env.has_path(dir.path().join("bin")));

        let mut p = project(yaml, dir.path()).with_context("prod");
        p.init().unwrap();
        assert_eq!(p.env().unwrap().get("PROD_ONLY"), Some("yes"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut p = project("tasks: { a: echo }", dir.path());
        p.init().unwrap();
        let first = p.env().unwrap().get(CAST_ENV).map(str::to_string);
        p.init().unwrap();
        assert_eq!(p.env().unwrap().get(CAST_ENV).map(str::to_string), first);
    }

    #[test]
    fn test_missing_required_dotenv_fails_init() {
        let dir = TempDir::new().unwrap();
        let mut p = project("dotenv: [.env.absent]\ntasks: { a: echo }", dir.path());
        assert!(p.init().is_err());
    }

    #[test]
    fn test_scope_has_project_metadata() {
        let dir = TempDir::new().unwrap();
        let p = project("name: Demo\nmeta: { owner: ops }\n", dir.path());
        let scope = p.base_scope();
        let cast = scope.get("cast").unwrap();
        assert_eq!(cast.get_path("meta.owner").unwrap(), &Value::from("ops"));
        assert_eq!(cast.get_path("project.name").unwrap(), &Value::from("Demo"));
        assert!(scope.get("os").is_some());
    }
}
