//! Task execution
//!
//! Graph flattening, the run loop, the handler contract and the IPC channel
//! tasks use to pass env and outputs forward.

pub mod context;
pub mod engine;
pub mod graph;
pub mod handler;
pub mod ipc;
pub mod job;
pub mod result;
pub mod runtime;
pub mod task;

pub use context::{CancelToken, ResolvedTask, TaskContext};
pub use engine::Engine;
pub use graph::{check_cycles, find_cyclical_references, flatten_tasks};
pub use handler::{Handler, HandlerRegistry};
pub use ipc::{IpcFiles, OutputSink, RecordingSink};
pub use job::{Job, JobMap};
pub use result::{exit_code, TaskResult, TaskStatus, EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS};
pub use runtime::Runtime;
pub use task::{Hooks, Need, Task, TaskMap};
