//! `ssh` handler: run the task body on every target host

use crate::error::{ExecutionError, ExecutionResult};
use crate::handlers::pool::{combine_errors, max_parallel, run_hosts};
use crate::handlers::{declared_env, with_password};
use crate::runner::{TaskContext, TaskResult};
use tracing::debug;

pub const MAX_PARALLEL_VAR: &str = "CAST_SSH_MAX_PARALLEL";

pub fn run_ssh(ctx: &mut TaskContext) -> TaskResult {
    let result = ctx.result();
    match ssh(ctx) {
        Ok(()) => result.ok(),
        Err(e) => result.fail(e),
    }
}

fn ssh(ctx: &TaskContext) -> ExecutionResult<()> {
    if ctx.task.hosts.is_empty() {
        return Err(ExecutionError::InvalidParams(format!(
            "no hosts found for ssh task '{}'",
            ctx.task.id
        )));
    }

    let script = ctx
        .task
        .run
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| {
            ExecutionError::InvalidParams(format!("ssh task '{}' has no run body", ctx.task.id))
        })?;

    let workers = max_parallel(ctx, MAX_PARALLEL_VAR)?;
    let env = declared_env(ctx);
    let transport = ctx.runtime.transport.clone();

    debug!(task = %ctx.task.id, hosts = ctx.task.hosts.len(), workers, "running ssh task");
    let errors = run_hosts(&ctx.task.hosts, workers, &ctx.cancel, |host, token| {
        let host = with_password(host, &ctx.task.env);
        transport.run(&host, script, &env, token)
    });

    combine_errors("SSH", errors, &ctx.cancel, &ctx.task.id)
}
