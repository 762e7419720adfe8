//! Execution context handed to handlers
//!
//! A [`TaskContext`] carries the fully resolved task, the cancellation token
//! and an in-process output sink. Handlers read what they need and return a
//! [`TaskResult`].

use crate::env::Env;
use crate::error::ExecutionError;
use crate::inventory::HostInfo;
use crate::project::ProjectInfo;
use crate::runner::ipc::{OutputSink, RecordingSink};
use crate::runner::result::TaskResult;
use crate::runner::runtime::Runtime;
use crate::runner::task::Task;
use crate::ui::Printer;
use crate::utils::format_duration;
use crate::value::{Mapping, Outputs, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    parent: Option<CancelToken>,
}

/// Cooperative cancellation token
///
/// Children observe their parent's cancellation; a token created with
/// [`with_timeout`](CancelToken::with_timeout) also cancels itself once its
/// deadline passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled whenever this one is
    pub fn child(&self) -> Self {
        CancelToken {
            state: Arc::new(TokenState {
                parent: Some(self.clone()),
                ..Default::default()
            }),
        }
    }

    /// A child token that expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        CancelToken {
            state: Arc::new(TokenState {
                deadline: Some(Instant::now() + timeout),
                timeout: Some(timeout),
                parent: Some(self.clone()),
                ..Default::default()
            }),
        }
    }

    /// Cancel this token and every child
    pub fn cancel(&self) {
        self.cancel_with("cancelled");
    }

    pub fn cancel_with(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.state.reason.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
            || self.deadline_exceeded()
            || self
                .state
                .parent
                .as_ref()
                .map(CancelToken::is_cancelled)
                .unwrap_or(false)
    }

    /// Whether this token or an ancestor ran past its deadline
    pub fn deadline_exceeded(&self) -> bool {
        self.state
            .deadline
            .map(|d| Instant::now() >= d)
            .unwrap_or(false)
            || self
                .state
                .parent
                .as_ref()
                .map(CancelToken::deadline_exceeded)
                .unwrap_or(false)
    }

    /// The timeout that expired, searching ancestors
    fn expired_timeout(&self) -> Option<Duration> {
        if self.state.deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            return self.state.timeout;
        }
        self.state.parent.as_ref().and_then(CancelToken::expired_timeout)
    }

    /// Why the token was cancelled, if it was cancelled explicitly
    pub fn reason(&self) -> Option<String> {
        if let Ok(slot) = self.state.reason.lock() {
            if slot.is_some() {
                return slot.clone();
            }
        }
        self.state.parent.as_ref().and_then(CancelToken::reason)
    }

    /// The error describing this token's cancellation
    ///
    /// Deadlines are reported as timeouts; anything else as plain
    /// cancellation.
    pub fn error(&self, task: &str) -> ExecutionError {
        match self.expired_timeout() {
            Some(timeout) => ExecutionError::TimedOut {
                task: task.to_string(),
                after: format_duration(timeout),
            },
            None => ExecutionError::Cancelled(task.to_string()),
        }
    }
}

/// Task after env, cwd, timeout and host resolution
#[derive(Debug, Clone, Default)]
pub struct ResolvedTask {
    pub id: String,
    pub name: String,

    /// Handler key, possibly rewritten to a fallback task file
    pub uses: String,

    pub run: Option<String>,
    pub env: Env,
    pub with: Mapping,
    pub hosts: Vec<HostInfo>,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
    pub args: Vec<String>,
}

/// Everything a handler gets to see
pub struct TaskContext {
    pub cancel: CancelToken,

    /// The task as declared, after inheritance
    pub schema: Task,

    /// The task as resolved for this attempt
    pub task: ResolvedTask,

    /// Extra command line arguments
    pub args: Vec<String>,

    /// Execution context name (`default`, `prod`, ...)
    pub context_name: String,

    pub project: Arc<ProjectInfo>,

    /// Outputs of earlier tasks in this run
    pub outputs: Outputs,

    pub runtime: Arc<Runtime>,
    pub printer: Printer,

    updates: RecordingSink,
}

impl TaskContext {
    pub fn new(schema: Task, task: ResolvedTask, project: Arc<ProjectInfo>, runtime: Arc<Runtime>) -> Self {
        let printer = runtime.printer;
        TaskContext {
            cancel: CancelToken::new(),
            schema,
            task,
            args: Vec::new(),
            context_name: "default".to_string(),
            project,
            outputs: Outputs::new(),
            runtime,
            printer,
            updates: RecordingSink::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }

    pub fn with_outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }

    /// A running result for this task
    pub fn result(&self) -> TaskResult {
        TaskResult::new(self.task.id.clone()).start()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Task args followed by command line args
    pub fn all_args(&self) -> Vec<String> {
        self.task
            .args
            .iter()
            .chain(self.args.iter())
            .cloned()
            .collect()
    }

    /// A `with` parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.task.with.get(key).filter(|v| !v.is_null())
    }

    /// A `with` parameter rendered as a string
    pub fn param_str(&self, key: &str) -> Option<String> {
        self.param(key).map(|v| v.to_string())
    }

    /// A `with` parameter read as a flag
    pub fn param_bool(&self, key: &str) -> bool {
        self.param(key).map(Value::is_truthy).unwrap_or(false)
    }

    /// A `with` parameter given as a list or a single scalar
    pub fn param_list(&self, key: &str) -> Vec<String> {
        match self.param(key) {
            Some(Value::Sequence(items)) => items.iter().map(|v| v.to_string()).collect(),
            Some(other) => vec![other.to_string()],
            None => Vec::new(),
        }
    }

    /// Updates recorded through [`OutputSink`]
    pub fn take_updates(&mut self) -> RecordingSink {
        std::mem::take(&mut self.updates)
    }
}

impl OutputSink for TaskContext {
    fn set_env(&mut self, key: &str, value: &str) {
        self.updates.set_env(key, value);
    }

    fn prepend_path(&mut self, dir: &str) {
        self.updates.prepend_path(dir);
    }

    fn set_output(&mut self, key: &str, value: Value) {
        self.updates.set_output(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_propagates_to_children() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.reason().as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_child_cancel_does_not_touch_parent() {
        let root = CancelToken::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let token = CancelToken::new().with_timeout(Duration::from_millis(20));
        assert!(!token.is_cancelled());
        thread::sleep(Duration::from_millis(40));
        assert!(token.is_cancelled());
        assert!(token.deadline_exceeded());

        match token.child().error("slow") {
            ExecutionError::TimedOut { task, after } => {
                assert_eq!(task, "slow");
                assert_eq!(after, "20ms");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_cancel_error() {
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(token.error("t"), ExecutionError::Cancelled(_)));
    }
}
