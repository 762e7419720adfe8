//! Common test utilities

#![allow(dead_code)]

use cast::env::Env;
use cast::runner::{OutputSink, Runtime, TaskContext};
use cast::ui::{Printer, Verbosity};
use cast::value::Value;
use cast::Project;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory with a castfile
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("castfile");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config with a subdirectory next to it
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let (temp_dir, config_path) = create_test_config(content);
    let sub_dir = temp_dir.path().join("subdir");
    fs::create_dir(&sub_dir).unwrap();
    (temp_dir, config_path, sub_dir)
}

/// Ids of tasks that reached a handler, in order
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, id: &str) {
        self.0.lock().unwrap().push(id.to_string());
    }

    pub fn get(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Silent runtime with in-process test handlers
///
/// * `record` - records the task id and succeeds
/// * `fail` - records the task id and fails
/// * `publish` - records, then sets every `with` entry as env and output
/// * `env-probe` - records `id:$PROBE` using the task's resolved env
pub fn runtime(calls: &Calls) -> Runtime {
    let record = calls.clone();
    let fail = calls.clone();
    let publish = calls.clone();
    let probe = calls.clone();

    Runtime::new(Printer::new(Verbosity::Silent))
        .with_handler("record", move |ctx: &mut TaskContext| {
            record.push(&ctx.task.id);
            ctx.result().ok()
        })
        .with_handler("fail", move |ctx: &mut TaskContext| {
            fail.push(&ctx.task.id);
            ctx.result()
                .fail(cast::error::ExecutionError::Other("boom".into()))
        })
        .with_handler("publish", move |ctx: &mut TaskContext| {
            publish.push(&ctx.task.id);
            let with = ctx.task.with.clone();
            for (key, value) in with {
                ctx.set_env(&key, &value.to_string());
                ctx.set_output(&key, value);
            }
            ctx.result().ok()
        })
        .with_handler("env-probe", move |ctx: &mut TaskContext| {
            let value = ctx.task.env.get("PROBE").unwrap_or("<unset>").to_string();
            probe.push(&format!("{}:{}", ctx.task.id, value));
            ctx.result().ok()
        })
}

/// Project from `yaml` in a fresh temp dir, on the process env
pub fn project(yaml: &str, calls: &Calls) -> (TempDir, Project) {
    let (dir, path) = create_test_config(yaml);
    let project = Project::load(&path)
        .unwrap()
        .with_env(Env::from_process())
        .with_runtime(Arc::new(runtime(calls)));
    (dir, project)
}

pub fn targets(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn string(value: &str) -> Value {
    Value::from(value)
}
