//! `scp` handler: copy files to or from every target host

use crate::error::{ExecutionError, ExecutionResult};
use crate::handlers::pool::{combine_errors, max_parallel, run_hosts};
use crate::handlers::with_password;
use crate::runner::{TaskContext, TaskResult};
use crate::utils::resolve_path;

pub const MAX_PARALLEL_VAR: &str = "CAST_SCP_MAX_PARALLEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// A `source:destination` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub source: String,
    pub destination: String,
}

impl Transfer {
    pub fn parse(spec: &str) -> ExecutionResult<Self> {
        match spec.split_once(':') {
            Some((source, destination)) if !source.is_empty() && !destination.is_empty() => {
                Ok(Transfer {
                    source: source.to_string(),
                    destination: destination.to_string(),
                })
            }
            _ => Err(ExecutionError::InvalidParams(format!(
                "invalid scp file '{}', expected 'source:destination'",
                spec
            ))),
        }
    }
}

fn direction(ctx: &TaskContext) -> ExecutionResult<Direction> {
    match ctx.param_str("direction").as_deref() {
        Some("download") => Ok(Direction::Download),
        Some("upload") => Ok(Direction::Upload),
        Some(other) => Err(ExecutionError::InvalidParams(format!(
            "invalid scp direction '{}'",
            other
        ))),
        None if ctx.param_bool("download") => Ok(Direction::Download),
        None => Ok(Direction::Upload),
    }
}

pub fn run_scp(ctx: &mut TaskContext) -> TaskResult {
    let result = ctx.result();
    match scp(ctx) {
        Ok(()) => result.ok(),
        Err(e) => result.fail(e),
    }
}

fn scp(ctx: &TaskContext) -> ExecutionResult<()> {
    let transfers = ctx
        .param_list("files")
        .iter()
        .map(|f| Transfer::parse(f))
        .collect::<ExecutionResult<Vec<_>>>()?;
    if transfers.is_empty() {
        return Err(ExecutionError::InvalidParams(
            "no files specified for scp task".into(),
        ));
    }

    if ctx.task.hosts.is_empty() {
        return Err(ExecutionError::InvalidParams(format!(
            "no hosts found for scp task '{}'",
            ctx.task.id
        )));
    }

    let direction = direction(ctx)?;
    let workers = max_parallel(ctx, MAX_PARALLEL_VAR)?;
    let transport = ctx.runtime.transport.clone();

    let errors = run_hosts(&ctx.task.hosts, workers, &ctx.cancel, |host, token| {
        let host = with_password(host, &ctx.task.env);
        for transfer in &transfers {
            match direction {
                Direction::Upload => {
                    println!(
                        "[{}]: Uploading {} to {}",
                        host.host, transfer.source, transfer.destination
                    );
                    let local = resolve_path(&ctx.task.cwd, &transfer.source);
                    transport.upload(&host, &local, &transfer.destination, token)?;
                }
                Direction::Download => {
                    println!(
                        "[{}]: Downloading {} to {}",
                        host.host, transfer.source, transfer.destination
                    );
                    let local = resolve_path(&ctx.task.cwd, &transfer.destination);
                    transport.download(&host, &transfer.source, &local, token)?;
                }
            }
        }
        Ok(())
    });

    combine_errors("SCP", errors, &ctx.cancel, &ctx.task.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context_with_transport, FakeTransport};
    use crate::inventory::HostInfo;
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn test_parse_transfer() {
        assert_eq!(
            Transfer::parse("dist/app:/srv/app").unwrap(),
            Transfer {
                source: "dist/app".into(),
                destination: "/srv/app".into()
            }
        );
        assert!(Transfer::parse("no-colon").is_err());
        assert!(Transfer::parse(":/srv").is_err());
    }

    #[test]
    fn test_upload_is_default() {
        let transport = Arc::new(FakeTransport::default());
        let mut ctx = context_with_transport("scp", None, transport.clone());
        ctx.task.cwd = "/work".into();
        ctx.task.hosts = vec![HostInfo::new("web")];
        ctx.task
            .with
            .insert("files".into(), Value::from(vec!["app.tar:/tmp/app.tar".to_string()]));

        let result = run_scp(&mut ctx);
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(transport.calls(), vec!["upload web /work/app.tar /tmp/app.tar"]);
    }

    #[test]
    fn test_download_direction() {
        let transport = Arc::new(FakeTransport::default());
        let mut ctx = context_with_transport("scp", None, transport.clone());
        ctx.task.cwd = "/work".into();
        ctx.task.hosts = vec![HostInfo::new("web")];
        ctx.task.with.insert("download".into(), Value::Bool(true));
        ctx.task
            .with
            .insert("files".into(), Value::from(vec!["/var/log/app.log:logs/app.log".to_string()]));

        let result = run_scp(&mut ctx);
        assert!(result.is_ok(), "{:?}", result.error);
        assert_eq!(
            transport.calls(),
            vec!["download web /var/log/app.log /work/logs/app.log"]
        );
    }

    #[test]
    fn test_requires_files() {
        let mut ctx = context_with_transport("scp", None, Arc::new(FakeTransport::default()));
        ctx.task.hosts = vec![HostInfo::new("web")];
        assert!(run_scp(&mut ctx).is_error());
    }
}
