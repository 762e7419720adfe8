//! SSH/SCP transport
//!
//! [`OpenSsh`] drives the system `ssh` and `scp` binaries (through `sshpass`
//! for password-only hosts). Tests substitute their own [`Transport`].

use crate::env::Env;
use crate::error::ExecutionResult;
use crate::handlers::process::{self, RunOptions};
use crate::inventory::HostInfo;
use crate::runner::CancelToken;
use crate::utils::expand_home;
use std::path::Path;

/// Runs commands on and copies files to or from a host
pub trait Transport: Send + Sync {
    /// Run `script` on `host`, exporting `env` first
    ///
    /// Output lines are prefixed with the host name.
    fn run(&self, host: &HostInfo, script: &str, env: &[(String, String)], token: &CancelToken) -> ExecutionResult<()>;

    fn upload(&self, host: &HostInfo, local: &Path, remote: &str, token: &CancelToken) -> ExecutionResult<()>;

    fn download(&self, host: &HostInfo, remote: &str, local: &Path, token: &CancelToken) -> ExecutionResult<()>;
}

/// Transport backed by the OpenSSH client binaries
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenSsh;

impl OpenSsh {
    /// Program, leading args and extra env for an ssh-family binary
    ///
    /// `port_flag` is `-p` for ssh and `-P` for scp.
    fn base(&self, program: &str, host: &HostInfo, port_flag: &str) -> (String, Vec<String>, Env) {
        let mut env = Env::from_process();
        let mut args = Vec::new();

        let password_only = host.identity.is_none() && host.password.is_some();
        let program = if password_only {
            if let Some(password) = &host.password {
                env.set("SSHPASS", password.clone());
            }
            args.push("-e".to_string());
            args.push(program.to_string());
            "sshpass".to_string()
        } else {
            program.to_string()
        };

        args.push(port_flag.to_string());
        args.push(host.port.to_string());

        if let Some(identity) = &host.identity {
            args.push("-i".to_string());
            args.push(expand_home(identity).to_string_lossy().into_owned());
        }
        if !password_only {
            args.push("-o".to_string());
            args.push("BatchMode=yes".to_string());
        }
        args.push("-o".to_string());
        args.push("StrictHostKeyChecking=accept-new".to_string());

        (program, args, env)
    }
}

/// `export K='v'` lines followed by the script
pub fn remote_script(script: &str, env: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in env {
        let quoted = shlex::try_quote(value)
            .map(|q| q.into_owned())
            .unwrap_or_else(|_| format!("'{}'", value.replace('\'', "'\\''")));
        out.push_str(&format!("export {}={}\n", key, quoted));
    }
    out.push_str(script);
    if !script.ends_with('\n') {
        out.push('\n');
    }
    out
}

impl Transport for OpenSsh {
    fn run(&self, host: &HostInfo, script: &str, env: &[(String, String)], token: &CancelToken) -> ExecutionResult<()> {
        let (program, mut args, process_env) = self.base("ssh", host, "-p");
        args.push(host.target());
        args.push("sh -s".to_string());

        let command = process::command(&program, &args, Path::new("."), &process_env);
        let options = RunOptions {
            input: Some(remote_script(script, env)),
            prefix: Some(host.host.clone()),
        };
        process::run(command, options, token, &host.alias)
    }

    fn upload(&self, host: &HostInfo, local: &Path, remote: &str, token: &CancelToken) -> ExecutionResult<()> {
        let (program, mut args, process_env) = self.base("scp", host, "-P");
        args.push("-r".to_string());
        args.push(local.to_string_lossy().into_owned());
        args.push(format!("{}:{}", host.target(), remote));

        let command = process::command(&program, &args, Path::new("."), &process_env);
        process::run(command, RunOptions::default(), token, &host.alias)
    }

    fn download(&self, host: &HostInfo, remote: &str, local: &Path, token: &CancelToken) -> ExecutionResult<()> {
        let (program, mut args, process_env) = self.base("scp", host, "-P");
        args.push("-r".to_string());
        args.push(format!("{}:{}", host.target(), remote));
        args.push(local.to_string_lossy().into_owned());

        let command = process::command(&program, &args, Path::new("."), &process_env);
        process::run(command, RunOptions::default(), token, &host.alias)
    }
}
