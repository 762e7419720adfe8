//! The run loop
//!
//! Tasks of a run execute one at a time in flattened order. Each task gets a
//! scratch copy of the run environment; only what a successful task writes
//! through the IPC files or its [`OutputSink`](crate::runner::OutputSink)
//! reaches the tasks after it.

use crate::env::{dotenv, Env, ExpandOptions};
use crate::error::{CastError, ConfigError, ConfigResult, ExecutionError, ExecutionResult};
use crate::eval::{is_template, Scope};
use crate::handlers::remote::{find_task_file, is_remote_uri, REMOTE_HANDLER};
use crate::inventory::{HostInfo, Inventory};
use crate::project::ProjectInfo;
use crate::runner::context::{CancelToken, ResolvedTask, TaskContext};
use crate::runner::graph::{check_cycles, flatten_tasks};
use crate::runner::handler::Handler;
use crate::runner::ipc::IpcFiles;
use crate::runner::job::JobMap;
use crate::runner::result::TaskResult;
use crate::runner::runtime::Runtime;
use crate::runner::task::{Task, TaskMap};
use crate::utils::{env_key, parse_duration, resolve_path, split_optional};
use crate::value::{Mapping, Outputs, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Prefix of the env vars carrying earlier tasks' outputs
pub const OUTPUTS_PREFIX: &str = "OUTPUTS_";

/// Everything a run needs from its project
pub struct Engine<'a> {
    pub info: Arc<ProjectInfo>,
    pub tasks: &'a TaskMap,
    pub jobs: &'a JobMap,
    pub inventory: &'a Inventory,

    /// Project-level scope (`os`, `arch`, `git`, `cast`, ...)
    pub scope: &'a Scope,

    pub runtime: Arc<Runtime>,
    pub ipc: Option<&'a IpcFiles>,
    pub context: &'a str,
}

/// Mutable state threaded through one run
#[derive(Debug)]
struct RunState {
    env: Env,
    outputs: Outputs,
    failed: bool,
}

impl<'a> Engine<'a> {
    fn expand_options(&self) -> ExpandOptions {
        if self.info.substitution {
            ExpandOptions::default()
        } else {
            ExpandOptions::literal()
        }
    }

    /// Run `targets` and everything they need
    ///
    /// Resolution errors abort before any handler runs; task failures are
    /// recorded in the returned results.
    #[instrument(skip_all, fields(targets = ?targets, context = %self.context))]
    pub fn run_tasks(
        &self,
        env: &Env,
        targets: &[String],
        args: &[String],
        cancel: &CancelToken,
    ) -> ConfigResult<Vec<TaskResult>> {
        check_cycles(self.tasks)?;
        let flattened = flatten_tasks(self.tasks, targets, self.context)?;

        let mut state = RunState {
            env: env.clone(),
            outputs: Outputs::new(),
            failed: false,
        };
        let mut results = Vec::with_capacity(flattened.len());

        for task in &flattened {
            let result = self.run_task(task, &mut state, args, cancel);
            if result.is_error() || result.is_cancelled() {
                state.failed = true;
            }
            results.push(result);
        }

        Ok(results)
    }

    fn run_task(&self, task: &Task, state: &mut RunState, args: &[String], cancel: &CancelToken) -> TaskResult {
        let printer = self.runtime.printer;

        let prepared = match self.prepare(task, state, args) {
            Ok(prepared) => prepared,
            Err(e) => {
                printer.task_failed(&task.name, &e.to_string());
                return TaskResult::new(task.id.clone()).start().fail(e);
            }
        };

        let Prepared {
            env: mut task_env,
            hosts,
            scope,
            force,
            condition,
        } = prepared;

        if !condition && !force {
            printer.task_skipped(&task.name, "condition is false");
            return TaskResult::new(task.id.clone()).skip("condition is false");
        }

        let placement = self
            .resolve_cwd(task, &mut task_env, &scope, &self.expand_options())
            .and_then(|cwd| self.resolve_timeout(task, &scope).map(|timeout| (cwd, timeout)));
        let (cwd, timeout) = match placement {
            Ok(placement) => placement,
            Err(e) => {
                printer.task_failed(&task.name, &e.to_string());
                return TaskResult::new(task.id.clone()).start().fail(e);
            }
        };

        if state.failed && !force {
            printer.task_skipped(&task.name, "a previous task failed");
            return TaskResult::new(task.id.clone()).skip("a previous task failed");
        }

        let Some((uses, handler)) = self.select_handler(task.uses(), &task_env) else {
            let e = ExecutionError::HandlerNotFound {
                task: task.id.clone(),
                uses: task.uses().to_string(),
            };
            printer.task_failed(&task.name, &e.to_string());
            return TaskResult::new(task.id.clone()).start().fail(e);
        };

        let resolved = ResolvedTask {
            id: task.id.clone(),
            name: task.name.clone(),
            uses,
            run: task.run.clone(),
            env: task_env,
            with: task.with.clone(),
            hosts,
            cwd,
            timeout,
            args: task.args.clone(),
        };

        let token = match resolved.timeout {
            Some(timeout) => cancel.with_timeout(timeout),
            None => cancel.child(),
        };

        printer.task_header(&task.name);
        debug!(task = %task.id, uses = %resolved.uses, cwd = %resolved.cwd.display(), "dispatching");

        let mut ctx = TaskContext::new(task.clone(), resolved, self.info.clone(), self.runtime.clone())
            .with_cancel(token.clone())
            .with_args(args.to_vec())
            .with_context_name(self.context)
            .with_outputs(state.outputs.clone());

        let mut result = handler(&mut ctx);
        if !result.is_ok() && !result.is_cancelled() && token.deadline_exceeded() {
            let started = result.started_at;
            result = TaskResult::new(task.id.clone()).cancel(token.error(&task.id));
            result.started_at = started.or(result.started_at);
        }

        if result.is_ok() {
            result = self.apply_updates(&mut ctx, state, result);
        } else if let Some(ipc) = self.ipc {
            if let Err(e) = ipc.truncate() {
                printer.warn(&format!("failed to reset IPC files: {}", e));
            }
        }

        match (&result.error, result.is_cancelled()) {
            (Some(e), true) => printer.task_cancelled(&task.name, &e.to_string()),
            (Some(e), false) => printer.task_failed(&task.name, &e.to_string()),
            _ => {}
        }

        result
    }

    /// Env, hosts and predicates; everything the skip decision needs
    fn prepare(&self, task: &Task, state: &RunState, args: &[String]) -> ExecutionResult<Prepared> {
        let mut env = state.env.clone();
        export_outputs(&state.outputs, &mut env);

        let hosts = self.inventory.resolve(&task.hosts);
        let options = self.expand_options();

        for file in &task.dotenv {
            let (path, optional) = split_optional(file);
            let full = resolve_path(&self.info.dir, path);
            if optional && !full.exists() {
                continue;
            }
            dotenv::load_file(&full, &mut env, &options).map_err(|e| ExecutionError::DotEnv {
                task: task.id.clone(),
                path: full.clone(),
                reason: e.to_string(),
            })?;
        }

        for (key, value) in &task.env {
            let expanded = env
                .expand(value, &options)
                .map_err(|source| ExecutionError::EnvExpand {
                    task: task.id.clone(),
                    key: key.clone(),
                    source,
                })?;
            env.set(key.clone(), expanded);
        }

        let scope = self.task_scope(&env, state, args);
        let evaluator = &self.runtime.evaluator;

        let force = match task.force.as_deref().filter(|f| !f.trim().is_empty()) {
            Some(expr) => evaluator
                .eval_bool(expr, &scope)
                .map_err(|source| ExecutionError::Predicate {
                    task: task.id.clone(),
                    field: "force",
                    source,
                })?,
            None => false,
        };

        let condition = match task.if_.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(expr) => evaluator
                .eval_bool(expr, &scope)
                .map_err(|source| ExecutionError::Predicate {
                    task: task.id.clone(),
                    field: "if",
                    source,
                })?,
            None => true,
        };

        Ok(Prepared {
            env,
            hosts,
            scope,
            force,
            condition,
        })
    }

    fn task_scope(&self, env: &Env, state: &RunState, args: &[String]) -> Scope {
        let mut scope = self.scope.clone();
        scope.insert("env", Value::from(&env.to_map()));
        scope.insert("outputs", state.outputs.as_value().clone());
        scope.insert("args", Value::from(args.to_vec()));
        scope.insert("success", Value::Bool(!state.failed));
        scope
    }

    fn resolve_cwd(
        &self,
        task: &Task,
        env: &mut Env,
        scope: &Scope,
        options: &ExpandOptions,
    ) -> ExecutionResult<PathBuf> {
        let Some(raw) = task.cwd.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(self.info.dir.clone());
        };

        let mut cwd = raw.to_string();
        if is_template(&cwd) {
            cwd = self
                .runtime
                .evaluator
                .render(&cwd, scope)
                .map_err(|source| ExecutionError::Predicate {
                    task: task.id.clone(),
                    field: "cwd",
                    source,
                })?;
        }
        if cwd.contains('$') {
            cwd = env
                .expand(&cwd, options)
                .map_err(|source| ExecutionError::EnvExpand {
                    task: task.id.clone(),
                    key: "cwd".to_string(),
                    source,
                })?;
        }

        if cwd.trim().is_empty() {
            return Ok(self.info.dir.clone());
        }
        Ok(resolve_path(&self.info.dir, &cwd))
    }

    fn resolve_timeout(&self, task: &Task, scope: &Scope) -> ExecutionResult<Option<Duration>> {
        let Some(raw) = task.timeout.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        let value = if is_template(raw) {
            self.runtime
                .evaluator
                .render(raw, scope)
                .map_err(|source| ExecutionError::Predicate {
                    task: task.id.clone(),
                    field: "timeout",
                    source,
                })?
        } else {
            raw.to_string()
        };

        parse_duration(&value)
            .map(Some)
            .map_err(|reason| ExecutionError::Timeout {
                task: task.id.clone(),
                value,
                reason,
            })
    }

    /// Registered handler, then remote module, then a fallback task file
    fn select_handler(&self, uses: &str, env: &Env) -> Option<(String, Handler)> {
        let registry = &self.runtime.handlers;
        if let Some(handler) = registry.get(uses) {
            return Some((uses.to_string(), handler));
        }
        if is_remote_uri(uses) {
            return registry.get(REMOTE_HANDLER).map(|h| (uses.to_string(), h));
        }
        let path = find_task_file(uses, &self.info.dir, env)?;
        debug!(uses, path = %path.display(), "using fallback task file");
        registry
            .get(REMOTE_HANDLER)
            .map(|h| (path.to_string_lossy().into_owned(), h))
    }

    /// Fold a successful task's updates into the run
    fn apply_updates(&self, ctx: &mut TaskContext, state: &mut RunState, mut result: TaskResult) -> TaskResult {
        let id = ctx.task.id.clone();
        let sink = ctx.take_updates();

        let mut outputs = Mapping::new();
        for (key, value) in result.outputs.iter() {
            outputs.insert(key.clone(), value.clone());
        }

        if let Some(ipc) = self.ipc {
            match ipc.collect(&ctx.task.env, &self.expand_options()) {
                Ok(updates) => {
                    for dir in &updates.paths {
                        state.env.prepend_path(dir);
                    }
                    for (key, value) in updates.env {
                        state.env.set(key, value);
                    }
                    outputs.extend(updates.outputs);
                }
                Err(e) => {
                    let started = result.started_at;
                    let mut failed = TaskResult::new(id).fail(e);
                    failed.started_at = started.or(failed.started_at);
                    return failed;
                }
            }
        }

        for dir in &sink.paths {
            state.env.prepend_path(dir);
        }
        for (key, value) in sink.env {
            state.env.set(key, value);
        }
        outputs.extend(sink.outputs);

        if !outputs.is_empty() {
            let value = Value::Mapping(outputs);
            state.outputs.insert(id.clone(), value.clone());
            result.outputs.insert(id, value);
        }

        result
    }

    /// Run a job, or the job and every job downstream of it
    ///
    /// Each step is its own run. The first failing step fails the job and
    /// stops the remaining jobs.
    #[instrument(skip_all, fields(job = %id, downstream))]
    pub fn run_job(
        &self,
        env: &Env,
        id: &str,
        downstream: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<TaskResult>, CastError> {
        let jobs = if downstream {
            self.jobs.downstream(id)?
        } else {
            vec![self
                .jobs
                .get(id)
                .ok_or_else(|| ConfigError::JobNotFound(id.to_string()))?]
        };

        let printer = self.runtime.printer;
        let mut results = Vec::new();

        for job in jobs {
            if let Some(expr) = job.if_.as_deref().filter(|c| !c.trim().is_empty()) {
                let mut scope = self.scope.clone();
                scope.insert("env", Value::from(&env.to_map()));
                scope.insert("success", Value::Bool(true));
                let run = self
                    .runtime
                    .evaluator
                    .eval_bool(expr, &scope)
                    .map_err(|source| ExecutionError::Predicate {
                        task: job.id.clone(),
                        field: "if",
                        source,
                    })?;
                if !run {
                    printer.task_skipped(&job.name, "condition is false");
                    continue;
                }
            }

            printer.info(&format!("job {}", job.name));
            for step in &job.steps {
                let step_results = self.run_tasks(env, std::slice::from_ref(step), &[], cancel)?;
                let errored = step_results.iter().any(TaskResult::is_error);
                let cancelled = step_results.iter().any(TaskResult::is_cancelled);
                results.extend(step_results);

                if errored {
                    return Err(ExecutionError::JobFailed {
                        job: job.id.clone(),
                        step: step.clone(),
                    }
                    .into());
                }
                if cancelled {
                    return Err(ExecutionError::JobCancelled {
                        job: job.id.clone(),
                        step: step.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(results)
    }
}

struct Prepared {
    env: Env,
    hosts: Vec<HostInfo>,
    scope: Scope,
    force: bool,
    condition: bool,
}

/// Export outputs as `OUTPUTS_<TASK>_<KEY>` variables
fn export_outputs(outputs: &Outputs, env: &mut Env) {
    for (task, value) in outputs.iter() {
        let Some(map) = value.as_mapping() else { continue };
        for (key, value) in map {
            env.set(
                format!("{}{}_{}", OUTPUTS_PREFIX, env_key(task), env_key(key)),
                value.to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_outputs() {
        let mut outputs = Outputs::new();
        let mut map = Mapping::new();
        map.insert("version".into(), Value::from("1.2.0"));
        map.insert("build-id".into(), Value::Number(42.0));
        outputs.insert("make-release", Value::Mapping(map));

        let mut env = Env::new();
        export_outputs(&outputs, &mut env);
        assert_eq!(env.get("OUTPUTS_MAKE_RELEASE_VERSION"), Some("1.2.0"));
        assert_eq!(env.get("OUTPUTS_MAKE_RELEASE_BUILD_ID"), Some("42"));
    }
}
