//! Built-in task handlers
//!
//! Each handler is a plain function registered under one or more `uses`
//! keys by [`register_builtins`].

pub mod cast;
pub mod docker;
pub mod pool;
pub mod process;
pub mod remote;
pub mod scp;
pub mod shell;
pub mod ssh;
pub mod transport;

use crate::env::Env;
use crate::inventory::HostInfo;
use crate::runner::{Handler, HandlerRegistry, TaskContext};
use std::sync::Arc;

/// Register every built-in handler
pub fn register_builtins(registry: &mut HandlerRegistry) {
    let shell: Handler = Arc::new(shell::run_shell);
    registry.register_all(shell::INTERPRETERS, shell);

    registry.register("ssh", ssh::run_ssh);
    registry.register("scp", scp::run_scp);
    registry.register("docker", docker::run_docker);
    registry.register("cast", cast::run_cast);
    registry.register(remote::REMOTE_HANDLER, remote::run_remote);
}

/// The task's declared env keys with their resolved values
///
/// Remote hosts and containers only see what the task declares, not the
/// whole process environment.
pub(crate) fn declared_env(ctx: &TaskContext) -> Vec<(String, String)> {
    ctx.schema
        .env
        .keys()
        .filter_map(|key| {
            ctx.task
                .env
                .get(key)
                .map(|value| (key.clone(), value.to_string()))
        })
        .collect()
}

/// Host with its password looked up in `env` when it names a variable
pub(crate) fn with_password(host: &HostInfo, env: &Env) -> HostInfo {
    let mut host = host.clone();
    if let Some(password) = &host.password {
        if let Some(value) = env.get(password) {
            host.password = Some(value.to_string());
        }
    }
    host
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Runtime;

    #[test]
    fn test_builtins_registered() {
        let runtime = Runtime::default();
        for name in ["shell", "bash", "python", "deno", "ssh", "scp", "docker", "cast", "remote"] {
            assert!(runtime.handlers.contains(name), "missing handler {name}");
        }
    }

    #[test]
    fn test_password_from_env() {
        let mut host = HostInfo::new("db");
        host.password = Some("DB_PASS".into());
        let mut env = Env::new();
        env.set("DB_PASS", "hunter2");
        assert_eq!(with_password(&host, &env).password.as_deref(), Some("hunter2"));

        host.password = Some("literal".into());
        assert_eq!(with_password(&host, &env).password.as_deref(), Some("literal"));
    }
}
