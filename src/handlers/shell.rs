//! Interpreter handlers
//!
//! Every interpreter key maps to one spawn-and-wait handler; the table below
//! decides how the task body is passed to the program.

use crate::error::ExecutionError;
use crate::handlers::process::{self, RunOptions};
use crate::runner::{TaskContext, TaskResult};
use std::io::Write;
use tracing::debug;

/// Keys handled by [`run_shell`]
pub const INTERPRETERS: &[&str] = &[
    "shell", "bash", "sh", "pwsh", "powershell", "go", "golang", "dotnet", "csharp", "deno",
    "node", "bun", "python", "ruby",
];

/// How a body reaches the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `program [flags...] <body>`
    Inline {
        program: &'static str,
        flags: &'static [&'static str],
    },

    /// Body written to a temp file with `extension`, then `program [flags...] <file>`
    File {
        program: &'static str,
        flags: &'static [&'static str],
        extension: &'static str,
    },
}

/// Invocation for an interpreter key
pub fn invocation(uses: &str) -> Option<Invocation> {
    use Invocation::*;

    let inv = match uses.to_ascii_lowercase().as_str() {
        "shell" if cfg!(windows) => Inline {
            program: "pwsh",
            flags: &["-NoProfile", "-NonInteractive", "-Command"],
        },
        "shell" | "sh" => Inline {
            program: "sh",
            flags: &["-c"],
        },
        "bash" => Inline {
            program: "bash",
            flags: &["-c"],
        },
        "pwsh" => Inline {
            program: "pwsh",
            flags: &["-NoProfile", "-NonInteractive", "-Command"],
        },
        "powershell" => Inline {
            program: if cfg!(windows) { "powershell" } else { "pwsh" },
            flags: &["-NoProfile", "-NonInteractive", "-Command"],
        },
        "python" => Inline {
            program: if cfg!(windows) { "python" } else { "python3" },
            flags: &["-c"],
        },
        "node" => Inline {
            program: "node",
            flags: &["-e"],
        },
        "bun" => Inline {
            program: "bun",
            flags: &["-e"],
        },
        "ruby" => Inline {
            program: "ruby",
            flags: &["-e"],
        },
        "deno" => Inline {
            program: "deno",
            flags: &["eval"],
        },
        "go" | "golang" => File {
            program: "go",
            flags: &["run"],
            extension: "go",
        },
        "dotnet" | "csharp" => File {
            program: "dotnet",
            flags: &["run"],
            extension: "cs",
        },
        _ => return None,
    };
    Some(inv)
}

/// Run the task body with the interpreter named by `uses`
pub fn run_shell(ctx: &mut TaskContext) -> TaskResult {
    let result = ctx.result();

    let Some(inv) = invocation(&ctx.task.uses) else {
        return result.fail(ExecutionError::InvalidParams(format!(
            "'{}' is not a known interpreter",
            ctx.task.uses
        )));
    };

    let body = match ctx.task.run.as_deref().filter(|r| !r.trim().is_empty()) {
        Some(body) => body.to_string(),
        None => {
            return result.fail(ExecutionError::InvalidParams(format!(
                "task '{}' has no run body",
                ctx.task.id
            )))
        }
    };

    // Keeps the script file alive until the process exits
    let mut _script = None;

    let (program, mut args) = match inv {
        Invocation::Inline { program, flags } => {
            let mut args: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
            args.push(body);
            (program, args)
        }
        Invocation::File {
            program,
            flags,
            extension,
        } => {
            let file = match write_script(&body, extension) {
                Ok(file) => file,
                Err(e) => {
                    return result.fail(ExecutionError::Other(format!(
                        "failed to write script for task '{}': {}",
                        ctx.task.id, e
                    )))
                }
            };
            let mut args: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
            args.push(file.to_string_lossy().into_owned());
            _script = Some(file);
            (program, args)
        }
    };
    args.extend(ctx.all_args());

    debug!(task = %ctx.task.id, program, "running interpreter");
    let command = process::command(program, &args, &ctx.task.cwd, &ctx.task.env);
    match process::run(command, RunOptions::default(), &ctx.cancel, &ctx.task.id) {
        Ok(()) => result.ok(),
        Err(e) => result.fail(e),
    }
}

fn write_script(body: &str, extension: &str) -> std::io::Result<tempfile::TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("cast_")
        .suffix(&format!(".{}", extension))
        .tempfile()?;
    file.write_all(body.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}
