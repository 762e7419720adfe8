//! Error types for Cast

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Cast operations
pub type Result<T> = std::result::Result<T, CastError>;

/// Main error type for Cast
#[derive(Error, Debug)]
pub enum CastError {
    /// Configuration and resolution errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task execution errors that escape a run
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Environment expansion errors
    #[error("Expansion error: {0}")]
    Expand(#[from] ExpandError),

    /// Expression evaluation errors
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Dotenv parsing errors
    #[error("Dotenv error: {0}")]
    DotEnv(#[from] DotEnvError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Project loading and graph resolution errors
///
/// These are fatal to a run and are reported before any handler executes.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find castfile (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {job} needs undefined job {need}")]
    UndefinedJobNeed { job: String, need: String },

    #[error("Cyclical references found in tasks: {}", .0.join(", "))]
    CyclicalReference(Vec<String>),

    #[error("Cycle detected in job dependencies starting at {0}")]
    JobCycle(String),

    #[error("Task {task} extends undefined task {base}")]
    UndefinedExtends { task: String, base: String },

    #[error("Host {host} references undefined defaults {defaults}")]
    UndefinedHostDefaults { host: String, defaults: String },

    #[error("Duplicate host entry for host {0}")]
    DuplicateHost(String),

    #[error("Failed to read '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },
}

/// Errors recorded on a single task result
///
/// These never abort a run; they mark the task as failed and trigger the
/// cascading skip of later unforced tasks.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed with exit code {0:?}")]
    CommandFailed(Option<i32>),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Unable to find task handler for {task} using '{uses}'")]
    HandlerNotFound { task: String, uses: String },

    #[error("Failed to load dotenv file {path} for task {task}: {reason}")]
    DotEnv {
        task: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to expand env variable {key} for task {task}: {source}")]
    EnvExpand {
        task: String,
        key: String,
        #[source]
        source: ExpandError,
    },

    #[error("Failed to evaluate {field} for task {task}: {source}")]
    Predicate {
        task: String,
        field: &'static str,
        #[source]
        source: EvalError,
    },

    #[error("Failed to parse task {task} timeout '{value}': {reason}")]
    Timeout {
        task: String,
        value: String,
        reason: String,
    },

    #[error("Task {task} timed out after {after}")]
    TimedOut { task: String, after: String },

    #[error("Task {0} cancelled")]
    Cancelled(String),

    #[error("Invalid task parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to read task outputs from {path}: {reason}")]
    Outputs { path: PathBuf, reason: String },

    #[error("Remote task error: {0}")]
    Remote(String),

    #[error("Failed on host {host}: {reason}")]
    Host { host: String, reason: String },

    #[error("Cross-project {kind} '{name}' failed: {source}")]
    CrossProject {
        kind: &'static str,
        name: String,
        #[source]
        source: Box<CastError>,
    },

    #[error("Job {job} failed at step {step}")]
    JobFailed { job: String, step: String },

    #[error("Job {job} cancelled at step {step}")]
    JobCancelled { job: String, step: String },

    #[error("{0}")]
    Other(String),
}

/// Shell-style expansion errors
#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("Variable '{name}' is required: {message}")]
    Required { name: String, message: String },

    #[error("Unterminated expression starting at byte {0}")]
    Unterminated(usize),

    #[error("Invalid variable expression '{0}'")]
    InvalidSyntax(String),

    #[error("Command substitution '{command}' failed: {reason}")]
    Substitution { command: String, reason: String },
}

/// Dotenv syntax errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DotEnvError {
    #[error("line {line}: expected KEY=value")]
    MissingEquals { line: usize },

    #[error("line {line}: invalid key '{key}'")]
    InvalidKey { line: usize, key: String },

    #[error("line {line}: unterminated quoted value")]
    UnterminatedQuote { line: usize },
}

/// Expression evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),

    #[error("Unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unterminated string literal")]
    UnterminatedString,

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Unterminated template expression")]
    UnterminatedTemplate,
}

/// Dotted path addressing errors for values and outputs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Key '{0}' not found")]
    KeyNotFound(String),

    #[error("Index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Expected integer index for sequence at segment '{0}'")]
    InvalidIndex(String),

    #[error("Cannot descend into a scalar at segment '{0}'")]
    NotLastSegment(String),

    #[error("Empty path")]
    Empty,
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for expansion operations
pub type ExpandResult<T> = std::result::Result<T, ExpandError>;

/// Specialized result type for dotenv parsing
pub type DotEnvResult<T> = std::result::Result<T, DotEnvError>;

/// Specialized result type for expression evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Specialized result type for value path operations
pub type PathResult<T> = std::result::Result<T, PathError>;

/// Whether an execution error represents cancellation rather than failure
pub fn is_cancellation(err: &ExecutionError) -> bool {
    matches!(
        err,
        ExecutionError::Cancelled(_)
            | ExecutionError::TimedOut { .. }
            | ExecutionError::JobCancelled { .. }
    )
}
