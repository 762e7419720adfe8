//! `cast` handler: run a task or job of another project

use crate::config::find_config_in_dir;
use crate::error::{CastError, ExecutionError, ExecutionResult};
use crate::project::Project;
use crate::runner::{TaskContext, TaskResult};
use crate::utils::resolve_path;
use std::path::PathBuf;
use tracing::debug;

/// What to run in the other project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Task(String),
    Job(String),
}

impl Target {
    fn kind(&self) -> &'static str {
        match self {
            Target::Task(_) => "task",
            Target::Job(_) => "job",
        }
    }

    fn name(&self) -> &str {
        match self {
            Target::Task(name) | Target::Job(name) => name,
        }
    }
}

fn non_empty(ctx: &TaskContext, key: &str) -> ExecutionResult<Option<String>> {
    match ctx.param(key) {
        None => Ok(None),
        Some(value) => match value.as_str().filter(|s| !s.is_empty()) {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(ExecutionError::InvalidParams(format!(
                "'{}' in 'with' must be a non-empty string",
                key
            ))),
        },
    }
}

/// Castfile named by `with.file` or found in `with.dir`
pub fn castfile(ctx: &TaskContext) -> ExecutionResult<PathBuf> {
    let raw = match (non_empty(ctx, "file")?, non_empty(ctx, "dir")?) {
        (Some(file), _) => file,
        (None, Some(dir)) => dir,
        (None, None) => {
            return Err(ExecutionError::InvalidParams(
                "cast handler requires 'file' or 'dir' in 'with'".into(),
            ))
        }
    };

    let path = resolve_path(&ctx.task.cwd, &raw);
    if path.is_dir() {
        return find_config_in_dir(&path)
            .map_err(|e| ExecutionError::InvalidParams(format!("no castfile found in '{}': {}", path.display(), e)));
    }
    if !path.exists() {
        return Err(ExecutionError::InvalidParams(format!(
            "castfile '{}' does not exist",
            path.display()
        )));
    }
    Ok(path)
}

/// Exactly one of `with.task` and `with.job`
pub fn target(ctx: &TaskContext) -> ExecutionResult<Target> {
    match (non_empty(ctx, "task")?, non_empty(ctx, "job")?) {
        (Some(task), None) => Ok(Target::Task(task)),
        (None, Some(job)) => Ok(Target::Job(job)),
        (Some(_), Some(_)) => Err(ExecutionError::InvalidParams(
            "cast handler cannot accept both 'task' and 'job'".into(),
        )),
        (None, None) => Err(ExecutionError::InvalidParams(
            "cast handler requires 'task' or 'job' in 'with'".into(),
        )),
    }
}

pub fn run_cast(ctx: &mut TaskContext) -> TaskResult {
    let result = ctx.result();
    match cast(ctx) {
        Ok(()) => result.ok(),
        Err(e) => result.fail(e),
    }
}

fn cast(ctx: &TaskContext) -> ExecutionResult<()> {
    let file = castfile(ctx)?;
    let target = target(ctx)?;
    debug!(file = %file.display(), target = ?target, "running cross-project target");

    let cross = |source: CastError| ExecutionError::CrossProject {
        kind: target.kind(),
        name: target.name().to_string(),
        source: Box::new(source),
    };

    let mut project = Project::load(&file)
        .map_err(&cross)?
        .with_runtime(ctx.runtime.clone())
        .with_env(ctx.task.env.clone())
        .with_context(ctx.context_name.clone());

    let results = match &target {
        Target::Task(name) => project
            .run_tasks_with(std::slice::from_ref(name), &ctx.args, &ctx.cancel)
            .map_err(&cross)?,
        Target::Job(name) => project
            .run_job_with(name, false, &ctx.cancel)
            .map_err(&cross)?,
    };

    if let Some(failed) = results.iter().find(|r| r.is_cancelled()) {
        if !results.iter().any(TaskResult::is_error) {
            return Err(ctx.cancel.error(&failed.id));
        }
    }
    if let Some(failed) = results.iter().find(|r| r.is_error()) {
        let reason = failed
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "failed".to_string());
        return Err(cross(CastError::Execution(ExecutionError::Other(format!(
            "task {} failed: {}",
            failed.id, reason
        )))));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::context;
    use crate::value::Value;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_target_requires_exactly_one() {
        let mut ctx = context("cast", None);
        assert!(target(&ctx).is_err());

        ctx.task.with.insert("task".into(), Value::from("build"));
        assert_eq!(target(&ctx).unwrap(), Target::Task("build".into()));

        ctx.task.with.insert("job".into(), Value::from("ci"));
        assert!(target(&ctx).is_err());

        ctx.task.with.shift_remove("task");
        assert_eq!(target(&ctx).unwrap(), Target::Job("ci".into()));
    }

    #[test]
    fn test_castfile_from_dir() {
        let dir = TempDir::new().unwrap();
        let other = dir.path().join("other");
        fs::create_dir(&other).unwrap();
        fs::write(other.join("castfile.yaml"), "tasks: { a: echo }").unwrap();

        let mut ctx = context("cast", None);
        ctx.task.cwd = dir.path().to_path_buf();
        ctx.task.with.insert("dir".into(), Value::from("other"));
        assert_eq!(castfile(&ctx).unwrap(), other.join("castfile.yaml"));

        ctx.task.with.insert("dir".into(), Value::from("missing"));
        assert!(castfile(&ctx).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_task_in_other_project() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        fs::write(
            dir.path().join("castfile"),
            format!("tasks:\n  touch: \"echo $GREETING > '{}'\"\n", marker.display()),
        )
        .unwrap();

        let mut ctx = context("cast", None);
        ctx.task.cwd = dir.path().to_path_buf();
        ctx.task.env = crate::env::Env::from_process();
        ctx.task.env.set("GREETING", "hello");
        ctx.task.with.insert("file".into(), Value::from("castfile"));
        ctx.task.with.insert("task".into(), Value::from("touch"));

        let result = run_cast(&mut ctx);
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(fs::read_to_string(marker).unwrap().trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_task_fails_handler() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("castfile"), "tasks:\n  boom: exit 3\n").unwrap();

        let mut ctx = context("cast", None);
        ctx.task.cwd = dir.path().to_path_buf();
        ctx.task.env = crate::env::Env::from_process();
        ctx.task.with.insert("file".into(), Value::from("castfile"));
        ctx.task.with.insert("task".into(), Value::from("boom"));

        let result = run_cast(&mut ctx);
        assert!(result.is_error());
        assert!(matches!(result.error, Some(ExecutionError::CrossProject { kind: "task", .. })));
    }
}
