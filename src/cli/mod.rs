//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, dispatch to the project and
//! shell completion.

pub mod app;

pub use app::*;
