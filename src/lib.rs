//! Cast - a YAML-based task and job runner
//!
//! Cast loads a castfile, flattens the requested tasks into dependency order
//! and runs each one through a pluggable handler: local interpreters,
//! containers, SSH/SCP hosts, other projects or remote task modules.

pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod eval;
pub mod handlers;
pub mod inventory;
pub mod project;
pub mod runner;
pub mod ui;
pub mod utils;
pub mod value;

pub use error::{CastError, Result};
pub use project::{Project, ProjectInfo};

/// Current version of Cast
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
