//! Child process execution with cooperative cancellation

use crate::env::Env;
use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::CancelToken;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// How often a running child is checked for exit and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Extra plumbing for [`run`]
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// Written to the child's stdin, which is then closed
    pub input: Option<String>,

    /// Prefix every output line with `[prefix] `
    pub prefix: Option<String>,
}

/// A command with `env` as its complete environment
pub fn command(program: &str, args: &[String], cwd: &Path, env: &Env) -> Command {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env.iter())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}

/// Run `command` to completion, killing it if `token` is cancelled
///
/// A non-zero exit is `CommandFailed`; cancellation yields the token's own
/// error for `task`.
pub fn run(mut command: Command, options: RunOptions, token: &CancelToken, task: &str) -> ExecutionResult<()> {
    let program = command.get_program().to_string_lossy().into_owned();

    if options.input.is_some() {
        command.stdin(Stdio::piped());
    }
    if options.prefix.is_some() {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!(program = %program, "spawning");
    let mut child = command
        .spawn()
        .map_err(|source| ExecutionError::Spawn { program, source })?;

    let writer = options.input.and_then(|input| {
        child.stdin.take().map(|mut stdin| {
            thread::spawn(move || {
                // The child may exit without reading everything
                let _ = stdin.write_all(input.as_bytes());
            })
        })
    });

    let mut readers = Vec::new();
    if let Some(prefix) = options.prefix {
        if let Some(out) = child.stdout.take() {
            readers.push(forward_lines(out, prefix.clone(), false));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(forward_lines(err, prefix, true));
        }
    }

    let outcome = wait(&mut child, token, task);

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    for reader in readers {
        let _ = reader.join();
    }

    outcome
}

fn forward_lines<R>(source: R, prefix: String, to_stderr: bool) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(source).lines().map_while(Result::ok) {
            if to_stderr {
                eprintln!("[{}] {}", prefix, line);
            } else {
                println!("[{}] {}", prefix, line);
            }
        }
    })
}

fn wait(child: &mut Child, token: &CancelToken, task: &str) -> ExecutionResult<()> {
    loop {
        let status = child
            .try_wait()
            .map_err(|e| ExecutionError::Other(format!("failed to wait on child: {}", e)))?;

        if let Some(status) = status {
            if status.success() {
                return Ok(());
            }
            return Err(ExecutionError::CommandFailed(status.code()));
        }

        if token.is_cancelled() {
            debug!(task, "killing child");
            let _ = child.kill();
            let _ = child.wait();
            return Err(token.error(task));
        }

        thread::sleep(POLL_INTERVAL);
    }
}
