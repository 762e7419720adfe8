//! Integration tests for task execution

mod common;

use cast::error::{CastError, ConfigError, ExecutionError};
use cast::runner::{exit_code, OutputSink, TaskContext, TaskStatus, EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS};
use cast::value::Value;
use common::{project, targets, Calls};
use std::time::Duration;

fn statuses(results: &[cast::runner::TaskResult]) -> Vec<(String, TaskStatus)> {
    results.iter().map(|r| (r.id.clone(), r.status)).collect()
}

#[test]
fn test_needs_run_first_and_shared_needs_once() {
    let yaml = r#"
tasks:
  setup: { uses: record }
  build: { uses: record, needs: setup }
  lint: { uses: record, needs: [setup] }
  release: { uses: record, needs: [build, lint] }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["release"]), &[]).unwrap();

    assert_eq!(calls.get(), vec!["setup", "build", "lint", "release"]);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(exit_code(&results), EXIT_SUCCESS);
}

#[test]
fn test_multiple_targets_share_dependencies() {
    let yaml = r#"
tasks:
  setup: { uses: record }
  a: { uses: record, needs: setup }
  b: { uses: record, needs: setup }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    project.run_tasks(&targets(&["a", "b"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["setup", "a", "b"]);
}

#[test]
fn test_hooks_wrap_the_task() {
    let yaml = r#"
tasks:
  deploy:before: { uses: record }
  deploy:after: { uses: record }
  deploy:
    uses: record
    hooks: true
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    project.run_tasks(&targets(&["deploy"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["deploy:before", "deploy", "deploy:after"]);
}

#[test]
fn test_context_variant_is_preferred() {
    let yaml = r#"
tasks:
  deploy: { uses: record }
  deploy:prod: { uses: record }
"#;
    let calls = Calls::default();
    let (_dir, project) = project(yaml, &calls);
    let mut project = project.with_context("prod");

    project.run_tasks(&targets(&["deploy"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["deploy:prod"]);
}

#[test]
fn test_cycle_is_rejected_before_anything_runs() {
    let yaml = r#"
tasks:
  ok: { uses: record }
  a: { uses: record, needs: b }
  b: { uses: record, needs: a }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let err = project.run_tasks(&targets(&["ok"]), &[]).unwrap_err();
    assert!(matches!(
        err,
        CastError::Config(ConfigError::CyclicalReference(_))
    ));
    assert!(calls.get().is_empty());
}

#[test]
fn test_unknown_target_is_an_error() {
    let calls = Calls::default();
    let (_dir, mut project) = project("tasks:\n  a: { uses: record }\n", &calls);

    let err = project.run_tasks(&targets(&["missing"]), &[]).unwrap_err();
    assert!(matches!(err, CastError::Config(ConfigError::TaskNotFound(_))));
}

#[test]
fn test_predicates() {
    let yaml = r#"
tasks:
  plain: { uses: record }
  falsy: { uses: record, if: "false" }
  truthy: { uses: record, if: "true" }
  forced: { uses: record, if: "false", force: "true" }
  from-env:
    uses: record
    env: { MODE: release }
    if: env.MODE == "release"
  all:
    uses: record
    needs: [plain, falsy, truthy, forced, from-env]
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["all"]), &[]).unwrap();

    assert_eq!(
        calls.get(),
        vec!["plain", "truthy", "forced", "from-env", "all"]
    );
    let skipped = results.iter().find(|r| r.id == "falsy").unwrap();
    assert!(skipped.is_skipped());
    assert_eq!(skipped.message.as_deref(), Some("condition is false"));
    assert_eq!(exit_code(&results), EXIT_SUCCESS);
}

#[test]
fn test_invalid_predicate_fails_the_task() {
    let yaml = r#"
tasks:
  bad: { uses: record, if: "env.X ==" }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["bad"]), &[]).unwrap();
    assert!(results[0].is_error());
    assert!(matches!(
        results[0].error,
        Some(ExecutionError::Predicate { field: "if", .. })
    ));
    assert!(calls.get().is_empty());
}

#[test]
fn test_failure_skips_later_tasks_unless_forced() {
    let yaml = r#"
tasks:
  first: { uses: record }
  broken: { uses: fail }
  later: { uses: record }
  cleanup: { uses: record, force: "true" }
  all:
    uses: record
    needs: [first, broken, later, cleanup]
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["all"]), &[]).unwrap();

    assert_eq!(calls.get(), vec!["first", "broken", "cleanup"]);
    assert_eq!(
        statuses(&results),
        vec![
            ("first".to_string(), TaskStatus::Ok),
            ("broken".to_string(), TaskStatus::Error),
            ("later".to_string(), TaskStatus::Skipped),
            ("cleanup".to_string(), TaskStatus::Ok),
            ("all".to_string(), TaskStatus::Skipped),
        ]
    );
    assert_eq!(
        results[2].message.as_deref(),
        Some("a previous task failed")
    );
    assert_eq!(exit_code(&results), EXIT_FAILURE);
}

#[test]
fn test_success_is_visible_to_predicates() {
    let yaml = r#"
tasks:
  broken: { uses: fail }
  report: { uses: record, force: "!success" }
  all: { uses: record, needs: [broken, report] }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    project.run_tasks(&targets(&["all"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["broken", "report"]);
}

#[test]
fn test_missing_handler_is_a_task_error() {
    let yaml = r#"
tasks:
  odd: { uses: no-such-handler }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["odd"]), &[]).unwrap();
    assert!(matches!(
        results[0].error,
        Some(ExecutionError::HandlerNotFound { .. })
    ));
    assert_eq!(exit_code(&results), EXIT_FAILURE);
}

#[test]
fn test_sink_updates_reach_later_tasks_only() {
    let yaml = r#"
tasks:
  before: { uses: env-probe }
  publish:
    uses: publish
    with:
      PROBE: set-by-publish
  after: { uses: env-probe }
  all: { uses: record, needs: [before, publish, after] }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["all"]), &[]).unwrap();

    assert_eq!(
        calls.get(),
        vec!["before:<unset>", "publish", "after:set-by-publish", "all"]
    );

    let published = results.iter().find(|r| r.id == "publish").unwrap();
    let outputs = published.outputs.get("publish.PROBE").unwrap();
    assert_eq!(outputs, &Value::from("set-by-publish"));
}

#[test]
fn test_outputs_are_exported_as_env() {
    let yaml = r#"
tasks:
  version:
    uses: publish
    with:
      release: "1.4.0"
  probe:
    uses: env-probe
    env:
      PROBE: ${OUTPUTS_VERSION_RELEASE}
    needs: version
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    project.run_tasks(&targets(&["probe"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["version", "probe:1.4.0"]);
}

#[test]
fn test_outputs_do_not_leak_into_a_new_run() {
    let yaml = r#"
tasks:
  publish:
    uses: publish
    with:
      PROBE: leaked
  probe: { uses: env-probe }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    project.run_tasks(&targets(&["publish"]), &[]).unwrap();
    project.run_tasks(&targets(&["probe"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["publish", "probe:<unset>"]);
}

#[test]
fn test_timeout_cancels_the_task() {
    let yaml = r#"
tasks:
  slow:
    uses: wait
    timeout: 50ms
  after: { uses: record }
  all: { uses: record, needs: [slow, after] }
"#;
    let calls = Calls::default();
    let (_dir, path) = common::create_test_config(yaml);
    let runtime = common::runtime(&calls).with_handler("wait", |ctx: &mut TaskContext| {
        let result = ctx.result();
        for _ in 0..200 {
            if ctx.is_cancelled() {
                return result.cancel(ctx.cancel.error(&ctx.task.id));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        result.ok()
    });
    let mut project = cast::Project::load(&path)
        .unwrap()
        .with_env(cast::env::Env::from_process())
        .with_runtime(std::sync::Arc::new(runtime));

    let results = project.run_tasks(&targets(&["all"]), &[]).unwrap();

    assert!(results[0].is_cancelled());
    assert!(matches!(
        results[0].error,
        Some(ExecutionError::TimedOut { .. })
    ));
    assert!(results[1].is_skipped());
    assert_eq!(exit_code(&results), EXIT_CANCELLED);
    assert!(calls.get().is_empty());
}

#[test]
fn test_invalid_timeout_fails_the_task() {
    let yaml = r#"
tasks:
  odd: { uses: record, timeout: soon }
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["odd"]), &[]).unwrap();
    assert!(matches!(
        results[0].error,
        Some(ExecutionError::Timeout { .. })
    ));
}

#[test]
fn test_extends_inherits_handler_and_env() {
    let yaml = r#"
tasks:
  base:
    uses: env-probe
    env: { PROBE: from-base }
  child:
    extends: base
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    project.run_tasks(&targets(&["child"]), &[]).unwrap();
    assert_eq!(calls.get(), vec!["child:from-base"]);
}

#[test]
fn test_job_runs_its_steps() {
    let yaml = r#"
tasks:
  build: { uses: record }
  test: { uses: record, needs: build }
jobs:
  ci:
    steps: [build, test]
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_job("ci", false).unwrap();

    // each step is its own run, so build runs again as a need of test
    assert_eq!(calls.get(), vec!["build", "build", "test"]);
    assert_eq!(exit_code(&results), EXIT_SUCCESS);
}

#[test]
fn test_job_downstream_and_failure() {
    let yaml = r#"
tasks:
  build: { uses: record }
  broken: { uses: fail }
  publish: { uses: record }
jobs:
  compile:
    steps: build
  verify:
    needs: compile
    steps: [broken]
  ship:
    needs: verify
    steps: [publish]
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let err = project.run_job("compile", true).unwrap_err();
    match err {
        CastError::Execution(ExecutionError::JobFailed { job, step }) => {
            assert_eq!(job, "verify");
            assert_eq!(step, "broken");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.get(), vec!["build", "broken"]);
}

#[test]
fn test_job_condition() {
    let yaml = r#"
tasks:
  build: { uses: record }
jobs:
  never:
    if: "false"
    steps: [build]
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_job("never", false).unwrap();
    assert!(results.is_empty());
    assert!(calls.get().is_empty());
}

#[test]
fn test_unknown_job() {
    let calls = Calls::default();
    let (_dir, mut project) = project("tasks:\n  a: { uses: record }\n", &calls);

    let err = project.run_job("nope", false).unwrap_err();
    assert!(matches!(err, CastError::Config(ConfigError::JobNotFound(_))));
}

#[test]
fn test_false_condition_skips_before_cwd_and_timeout() {
    let yaml = r#"
tasks:
  off:
    uses: record
    if: "false"
    timeout: not-a-duration
  elsewhere:
    uses: record
    if: "false"
    cwd: "${{ missing( }}"
  after:
    uses: record
    needs: [off, elsewhere]
"#;
    let calls = Calls::default();
    let (_dir, mut project) = project(yaml, &calls);

    let results = project.run_tasks(&targets(&["after"]), &[]).unwrap();

    assert_eq!(
        statuses(&results),
        vec![
            ("off".to_string(), TaskStatus::Skipped),
            ("elsewhere".to_string(), TaskStatus::Skipped),
            ("after".to_string(), TaskStatus::Ok),
        ]
    );
    assert_eq!(calls.get(), vec!["after"]);
    assert_eq!(exit_code(&results), EXIT_SUCCESS);
}

#[test]
fn test_sink_path_reaches_later_tasks_only() {
    let yaml = r#"
tasks:
  tools:
    uses: add-path
  probe:
    uses: path-probe
    needs: tools
  fresh:
    uses: path-probe
"#;
    let calls = Calls::default();
    let (_dir, path) = common::create_test_config(yaml);
    let paths = calls.clone();
    let runtime = common::runtime(&calls)
        .with_handler("add-path", |ctx: &mut TaskContext| {
            ctx.prepend_path("/opt/cast-tools/bin");
            ctx.result().ok()
        })
        .with_handler("path-probe", move |ctx: &mut TaskContext| {
            let first = ctx.task.env.split_path().into_iter().next().unwrap_or_default();
            paths.push(&format!("{}:{}", ctx.task.id, first));
            ctx.result().ok()
        });
    let mut project = cast::Project::load(&path)
        .unwrap()
        .with_env(cast::env::Env::from_process())
        .with_runtime(std::sync::Arc::new(runtime));

    project.run_tasks(&targets(&["probe"]), &[]).unwrap();
    project.run_tasks(&targets(&["fresh"]), &[]).unwrap();

    let calls = calls.get();
    assert_eq!(calls[0], "probe:/opt/cast-tools/bin");
    assert_ne!(calls[1], "fresh:/opt/cast-tools/bin");
}

#[cfg(unix)]
mod shell {
    use super::*;
    use std::fs;

    #[test]
    fn test_shell_task_succeeds_and_fails() {
        let yaml = r#"
tasks:
  good: "true"
  bad:
    uses: sh
    run: exit 3
"#;
        let calls = Calls::default();
        let (_dir, mut project) = project(yaml, &calls);

        let results = project.run_tasks(&targets(&["good"]), &[]).unwrap();
        assert_eq!(exit_code(&results), EXIT_SUCCESS);

        let results = project.run_tasks(&targets(&["bad"]), &[]).unwrap();
        assert!(matches!(
            results[0].error,
            Some(ExecutionError::CommandFailed(Some(3)))
        ));
    }

    #[test]
    fn test_cast_env_file_reaches_later_tasks() {
        let yaml = r#"
tasks:
  export:
    run: echo "GREETING=hello" >> "$CAST_ENV"
  probe:
    run: echo "$GREETING" > greeting.txt
    needs: export
  fresh:
    run: echo "${GREETING:-unset}" > fresh.txt
"#;
        let calls = Calls::default();
        let (dir, mut project) = project(yaml, &calls);

        let results = project.run_tasks(&targets(&["probe"]), &[]).unwrap();
        assert_eq!(exit_code(&results), EXIT_SUCCESS);
        let greeting = fs::read_to_string(dir.path().join("greeting.txt")).unwrap();
        assert_eq!(greeting.trim(), "hello");

        project.run_tasks(&targets(&["fresh"]), &[]).unwrap();
        let fresh = fs::read_to_string(dir.path().join("fresh.txt")).unwrap();
        assert_eq!(fresh.trim(), "unset");
    }

    #[test]
    fn test_cast_outputs_file_becomes_task_outputs() {
        let yaml = r#"
tasks:
  version:
    run: echo "tag=v2" >> "$CAST_OUTPUTS"
  use:
    run: echo "$OUTPUTS_VERSION_TAG" > tag.txt
    needs: version
"#;
        let calls = Calls::default();
        let (dir, mut project) = project(yaml, &calls);

        let results = project.run_tasks(&targets(&["use"]), &[]).unwrap();
        assert_eq!(
            results[0].outputs.get("version.tag").unwrap(),
            &Value::from("v2")
        );
        let tag = fs::read_to_string(dir.path().join("tag.txt")).unwrap();
        assert_eq!(tag.trim(), "v2");
    }

    #[test]
    fn test_cwd_is_relative_to_the_project() {
        let yaml = r#"
tasks:
  where:
    cwd: subdir
    run: pwd > here.txt
"#;
        let calls = Calls::default();
        let (dir, path) = common::create_test_config(yaml);
        fs::create_dir(dir.path().join("subdir")).unwrap();
        let mut project = cast::Project::load(&path)
            .unwrap()
            .with_env(cast::env::Env::from_process())
            .with_runtime(std::sync::Arc::new(common::runtime(&calls)));

        let results = project.run_tasks(&targets(&["where"]), &[]).unwrap();
        assert_eq!(exit_code(&results), EXIT_SUCCESS);
        assert!(dir.path().join("subdir").join("here.txt").exists());
    }

    #[test]
    fn test_cast_env_values_expand_against_the_task_env() {
        let yaml = r#"
tasks:
  export:
    env:
      VERSION: "1.2"
    run: |
      echo 'TAG=v${VERSION}' >> "$CAST_ENV"
  use:
    needs: export
    run: echo "$TAG" > tag.txt
"#;
        let calls = Calls::default();
        let (dir, mut project) = project(yaml, &calls);

        let results = project.run_tasks(&targets(&["use"]), &[]).unwrap();
        assert_eq!(exit_code(&results), EXIT_SUCCESS);
        let tag = fs::read_to_string(dir.path().join("tag.txt")).unwrap();
        assert_eq!(tag.trim(), "v1.2");
    }

    #[test]
    fn test_cast_path_file_is_prepended_for_later_tasks() {
        let yaml = r#"
tasks:
  tools:
    run: echo "/opt/cast-test/bin" >> "$CAST_PATH"
  probe:
    needs: tools
    run: echo "$PATH" > path.txt
  fresh:
    run: echo "$PATH" > fresh.txt
"#;
        let calls = Calls::default();
        let (dir, mut project) = project(yaml, &calls);

        let results = project.run_tasks(&targets(&["probe"]), &[]).unwrap();
        assert_eq!(exit_code(&results), EXIT_SUCCESS);
        let path = fs::read_to_string(dir.path().join("path.txt")).unwrap();
        assert!(path.trim().starts_with("/opt/cast-test/bin:"), "PATH was {path}");

        project.run_tasks(&targets(&["fresh"]), &[]).unwrap();
        let fresh = fs::read_to_string(dir.path().join("fresh.txt")).unwrap();
        assert!(!fresh.contains("/opt/cast-test/bin"), "PATH was {fresh}");
    }
}
