//! Bounded worker pool for per-host work

use crate::error::{is_cancellation, ExecutionError, ExecutionResult};
use crate::inventory::HostInfo;
use crate::runner::{CancelToken, TaskContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tracing::{debug, instrument};

/// Workers used when nothing else is configured
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Worker count for a task
///
/// `with.max-parallel` wins over the `env_var` entry of the task env; an
/// unusable `with` value is an error, an unusable env value is ignored.
pub fn max_parallel(ctx: &TaskContext, env_var: &str) -> ExecutionResult<usize> {
    if let Some(value) = ctx.param("max-parallel") {
        let raw = value.to_string();
        return match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ExecutionError::InvalidParams(format!(
                "invalid max-parallel value '{}'",
                raw
            ))),
        };
    }

    Ok(ctx
        .task
        .env
        .get(env_var)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_PARALLEL))
}

/// Run `work` for every host on at most `max_parallel` threads
///
/// Hosts are handed out one at a time; once any host fails no further hosts
/// are dispatched, while hosts already running finish. Returns the failures
/// in completion order.
#[instrument(skip_all, fields(hosts = hosts.len(), max_parallel = max_parallel))]
pub fn run_hosts<F>(
    hosts: &[HostInfo],
    max_parallel: usize,
    token: &CancelToken,
    work: F,
) -> Vec<(String, ExecutionError)>
where
    F: Fn(&HostInfo, &CancelToken) -> ExecutionResult<()> + Sync,
{
    let workers = max_parallel.max(1).min(hosts.len());
    if workers == 0 {
        return Vec::new();
    }

    let (job_tx, job_rx) = mpsc::sync_channel::<&HostInfo>(0);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel::<(String, ExecutionError)>();
    let failed = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let worker_token = token.child();
            let work = &work;
            let failed = &failed;

            scope.spawn(move || loop {
                let next = match job_rx.lock() {
                    Ok(rx) => rx.recv(),
                    Err(_) => break,
                };
                let Ok(host) = next else { break };

                if let Err(e) = work(host, &worker_token) {
                    failed.store(true, Ordering::SeqCst);
                    let _ = result_tx.send((host.host.clone(), e));
                }
            });
        }
        drop(result_tx);

        for host in hosts {
            if failed.load(Ordering::SeqCst) || token.is_cancelled() {
                debug!("stopping dispatch");
                break;
            }
            if job_tx.send(host).is_err() {
                break;
            }
        }
        drop(job_tx);
    });

    result_rx.into_iter().collect()
}

/// Fold per-host failures into one task error
///
/// Cancellation wins so the task reports as cancelled rather than failed.
pub fn combine_errors(kind: &str, mut errors: Vec<(String, ExecutionError)>, token: &CancelToken, task: &str) -> ExecutionResult<()> {
    if token.is_cancelled() || errors.iter().any(|(_, e)| is_cancellation(e)) {
        return Err(token.error(task));
    }

    match errors.len() {
        0 => Ok(()),
        1 => {
            let (host, error) = errors.remove(0);
            Err(ExecutionError::Host {
                host,
                reason: error.to_string(),
            })
        }
        _ => {
            let lines: Vec<String> = errors
                .iter()
                .map(|(host, e)| format!("[{}]: {}", host, e))
                .collect();
            Err(ExecutionError::Other(format!(
                "{} tasks failed on multiple hosts:\n{}",
                kind,
                lines.join("\n")
            )))
        }
    }
}
