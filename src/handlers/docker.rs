//! `docker` handler

use crate::error::ExecutionError;
use crate::handlers::process::{self, RunOptions};
use crate::runner::{TaskContext, TaskResult};
use crate::value::Value;
use tracing::debug;

/// Build the `docker run` argument list for a task
///
/// Only env keys declared on the task are forwarded into the container.
pub fn docker_args(ctx: &TaskContext) -> Result<Vec<String>, ExecutionError> {
    let image = match ctx.param("image") {
        Some(Value::String(image)) if !image.trim().is_empty() => image.clone(),
        Some(_) => {
            return Err(ExecutionError::InvalidParams(
                "docker task requires 'image' to be a non-empty string".into(),
            ))
        }
        None => {
            return Err(ExecutionError::InvalidParams(
                "docker task requires an 'image' in 'with'".into(),
            ))
        }
    };

    let mut args: Vec<String> = vec!["run".into(), "--rm".into()];

    if !ctx.task.cwd.as_os_str().is_empty() {
        args.push("-w".into());
        args.push("/app".into());
        args.push("-v".into());
        args.push(format!("{}:/app", ctx.task.cwd.display()));
    }

    for volume in ctx.param_list("volumes") {
        args.push("-v".into());
        args.push(volume);
    }

    for key in ctx.schema.env.keys() {
        if let Some(value) = ctx.task.env.get(key) {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
    }

    args.push(image);

    match ctx.param_str("command").filter(|c| !c.is_empty()) {
        Some(command) => args.push(command),
        None => {
            if let Some(run) = ctx.task.run.as_deref().filter(|r| !r.trim().is_empty()) {
                args.push("sh".into());
                args.push("-c".into());
                args.push(run.to_string());
            }
        }
    }

    match ctx.param("args") {
        Some(Value::Sequence(items)) => args.extend(items.iter().map(|v| v.to_string())),
        Some(Value::String(line)) => {
            let parsed = shlex::split(line).ok_or_else(|| {
                ExecutionError::InvalidParams(format!("cannot parse docker args '{}'", line))
            })?;
            args.extend(parsed);
        }
        Some(other) => args.push(other.to_string()),
        None => {}
    }

    Ok(args)
}

pub fn run_docker(ctx: &mut TaskContext) -> TaskResult {
    let result = ctx.result();

    let mut args = match docker_args(ctx) {
        Ok(args) => args,
        Err(e) => return result.fail(e),
    };
    args.extend(ctx.args.iter().cloned());

    debug!(task = %ctx.task.id, "docker {}", args.join(" "));
    let command = process::command("docker", &args, &ctx.task.cwd, &ctx.task.env);
    match process::run(command, RunOptions::default(), &ctx.cancel, &ctx.task.id) {
        Ok(()) => result.ok(),
        Err(e) => result.fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::context;

    #[test]
    fn test_args_from_run_body() {
        let mut ctx = context("docker", Some("make test"));
        ctx.task.cwd = "/src".into();
        ctx.task.with.insert("image".into(), Value::from("rust:1"));
        ctx.task.with.insert(
            "volumes".into(),
            Value::from(vec!["cache:/cache".to_string()]),
        );
        ctx.task.with.insert("args".into(), Value::from("--flag 'two words'"));
        ctx.schema.env.insert("MODE".into(), "ci".into());
        ctx.task.env.set("MODE", "ci");
        ctx.task.env.set("UNDECLARED", "x");

        let args = docker_args(&ctx).unwrap();
        assert_eq!(
            args,
            vec![
                "run", "--rm", "-w", "/app", "-v", "/src:/app", "-v", "cache:/cache", "-e",
                "MODE=ci", "rust:1", "sh", "-c", "make test", "--flag", "two words"
            ]
        );
    }

    #[test]
    fn test_command_overrides_run() {
        let mut ctx = context("docker", Some("ignored"));
        ctx.task.with.insert("image".into(), Value::from("alpine"));
        ctx.task.with.insert("command".into(), Value::from("ls"));
        ctx.task
            .with
            .insert("args".into(), Value::from(vec!["-la".to_string()]));

        let args = docker_args(&ctx).unwrap();
        assert_eq!(&args[args.len() - 3..], &["alpine", "ls", "-la"]);
        assert!(!args.contains(&"ignored".to_string()));
    }

    #[test]
    fn test_missing_image() {
        let ctx = context("docker", Some("true"));
        assert!(matches!(
            docker_args(&ctx),
            Err(ExecutionError::InvalidParams(_))
        ));
    }
}
