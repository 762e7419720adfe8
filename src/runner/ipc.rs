//! Channels tasks use to hand data to later tasks
//!
//! External processes write to three files named by env vars:
//!
//! * `CAST_PATH` - one directory per line, prepended to PATH
//! * `CAST_ENV` - dotenv entries merged into the run environment
//! * `CAST_OUTPUTS` - dotenv entries stored as the task's outputs
//!
//! In-process handlers use [`OutputSink`] instead.

use crate::env::dotenv::{self, LoadError};
use crate::env::{Env, ExpandOptions};
use crate::error::ExecutionError;
use crate::value::{Mapping, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

pub const CAST_PATH: &str = "CAST_PATH";
pub const CAST_ENV: &str = "CAST_ENV";
pub const CAST_OUTPUTS: &str = "CAST_OUTPUTS";

/// In-process alternative to the IPC files
pub trait OutputSink {
    fn set_env(&mut self, key: &str, value: &str);
    fn prepend_path(&mut self, dir: &str);
    fn set_output(&mut self, key: &str, value: Value);
}

/// Sink that remembers every update in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingSink {
    pub env: Vec<(String, String)>,
    pub paths: Vec<String>,
    pub outputs: Mapping,
}

impl RecordingSink {
    pub fn is_empty(&self) -> bool {
        self.env.is_empty() && self.paths.is_empty() && self.outputs.is_empty()
    }
}

impl OutputSink for RecordingSink {
    fn set_env(&mut self, key: &str, value: &str) {
        self.env.push((key.to_string(), value.to_string()));
    }

    fn prepend_path(&mut self, dir: &str) {
        self.paths.push(dir.to_string());
    }

    fn set_output(&mut self, key: &str, value: Value) {
        self.outputs.insert(key.to_string(), value);
    }
}

/// One IPC file, either inherited from the environment or owned
#[derive(Debug)]
struct IpcFile {
    path: PathBuf,

    /// Deleted on drop when we created it
    _owned: Option<TempPath>,
}

impl IpcFile {
    fn open(env: &Env, key: &str) -> io::Result<Self> {
        if let Some(existing) = env.get(key).filter(|p| !p.is_empty()) {
            let path = PathBuf::from(existing);
            if !path.exists() {
                fs::write(&path, "")?;
            }
            return Ok(IpcFile { path, _owned: None });
        }

        let temp = tempfile::Builder::new()
            .prefix(&format!("{}_", key.to_ascii_lowercase()))
            .tempfile()
            .map(NamedTempFile::into_temp_path)?;
        Ok(IpcFile {
            path: temp.to_path_buf(),
            _owned: Some(temp),
        })
    }
}

/// The three IPC files of a project
///
/// Files this project created are removed when it is dropped; files named by
/// a parent process are left in place.
#[derive(Debug)]
pub struct IpcFiles {
    path: IpcFile,
    env: IpcFile,
    outputs: IpcFile,
}

/// What a task wrote to the IPC files
#[derive(Debug, Default, PartialEq)]
pub struct IpcUpdates {
    pub paths: Vec<String>,
    pub env: Vec<(String, String)>,
    pub outputs: Mapping,
}

impl IpcFiles {
    /// Reuse files named in `env`, creating temp files for the rest
    pub fn open(env: &Env) -> io::Result<Self> {
        Ok(IpcFiles {
            path: IpcFile::open(env, CAST_PATH)?,
            env: IpcFile::open(env, CAST_ENV)?,
            outputs: IpcFile::open(env, CAST_OUTPUTS)?,
        })
    }

    pub fn path_file(&self) -> &Path {
        &self.path.path
    }

    pub fn env_file(&self) -> &Path {
        &self.env.path
    }

    pub fn outputs_file(&self) -> &Path {
        &self.outputs.path
    }

    /// Point the three env vars at the files
    pub fn export(&self, env: &mut Env) {
        env.set(CAST_PATH, self.path_file().to_string_lossy());
        env.set(CAST_ENV, self.env_file().to_string_lossy());
        env.set(CAST_OUTPUTS, self.outputs_file().to_string_lossy());
    }

    /// Read everything a task wrote, then truncate the files
    ///
    /// `env` is used to expand `CAST_ENV` and `CAST_OUTPUTS` values and is
    /// not modified.
    pub fn collect(&self, env: &Env, options: &ExpandOptions) -> Result<IpcUpdates, ExecutionError> {
        let paths = read_path_file(self.path_file()).map_err(|e| outputs_error(self.path_file(), e))?;

        let mut scratch = env.clone();
        let env_entries = read_dotenv_file(self.env_file(), &mut scratch, options)
            .map_err(|e| outputs_error(self.env_file(), e))?;

        let outputs = read_dotenv_file(self.outputs_file(), &mut scratch, options)
            .map_err(|e| outputs_error(self.outputs_file(), e))?
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        self.truncate().map_err(|e| outputs_error(self.path_file(), e))?;

        debug!(
            paths = paths.len(),
            env = env_entries.len(),
            "collected task updates"
        );

        Ok(IpcUpdates {
            paths,
            env: env_entries,
            outputs,
        })
    }

    pub fn truncate(&self) -> io::Result<()> {
        for file in [self.path_file(), self.env_file(), self.outputs_file()] {
            fs::write(file, "")?;
        }
        Ok(())
    }
}

fn outputs_error(path: &Path, err: impl ToString) -> ExecutionError {
    ExecutionError::Outputs {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Non-empty, non-comment trimmed lines of a `CAST_PATH` file
pub fn read_path_file(path: &Path) -> io::Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Dotenv entries of a `CAST_ENV`/`CAST_OUTPUTS` file, expanded against `env`
pub fn read_dotenv_file(
    path: &Path,
    env: &mut Env,
    options: &ExpandOptions,
) -> Result<Vec<(String, String)>, LoadError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    dotenv::apply(&content, env, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_files_are_removed_on_drop() {
        let files = IpcFiles::open(&Env::new()).unwrap();
        let path = files.env_file().to_path_buf();
        assert!(path.exists());
        drop(files);
        assert!(!path.exists());
    }

    #[test]
    fn test_inherited_files_are_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let shared = dir.path().join("env");
        let mut env = Env::new();
        env.set(CAST_ENV, shared.to_string_lossy());

        let files = IpcFiles::open(&env).unwrap();
        assert_eq!(files.env_file(), shared.as_path());
        drop(files);
        assert!(shared.exists());
    }

    #[test]
    fn test_collect_reads_and_truncates() {
        let files = IpcFiles::open(&Env::new()).unwrap();
        fs::write(files.path_file(), "/opt/tool/bin\n\n# note\n  /usr/local/x  \n").unwrap();
        fs::write(files.env_file(), "VERSION=1.2\nTAG=v${VERSION}\n").unwrap();
        fs::write(files.outputs_file(), "artifact=app.tar\n").unwrap();

        let mut env = Env::new();
        env.set("UNCHANGED", "yes");
        let updates = files.collect(&env, &ExpandOptions::literal()).unwrap();

        assert_eq!(updates.paths, vec!["/opt/tool/bin", "/usr/local/x"]);
        assert_eq!(
            updates.env,
            vec![
                ("VERSION".to_string(), "1.2".to_string()),
                ("TAG".to_string(), "v1.2".to_string())
            ]
        );
        assert_eq!(updates.outputs["artifact"], Value::from("app.tar"));
        assert!(!env.has("VERSION"));

        assert_eq!(fs::read_to_string(files.env_file()).unwrap(), "");
        let again = files.collect(&env, &ExpandOptions::literal()).unwrap();
        assert_eq!(again, IpcUpdates::default());
    }

    #[test]
    fn test_collect_reports_bad_dotenv() {
        let files = IpcFiles::open(&Env::new()).unwrap();
        fs::write(files.outputs_file(), "not a pair\n").unwrap();
        let err = files.collect(&Env::new(), &ExpandOptions::literal()).unwrap_err();
        assert!(matches!(err, ExecutionError::Outputs { .. }));
    }

    #[test]
    fn test_recording_sink() {
        let mut sink = RecordingSink::default();
        assert!(sink.is_empty());
        sink.set_env("A", "1");
        sink.prepend_path("/bin/x");
        sink.set_output("k", Value::from("v"));
        assert_eq!(sink.env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(sink.paths, vec!["/bin/x"]);
        assert_eq!(sink.outputs["k"], Value::from("v"));
    }
}
