//! Task graph resolution
//!
//! Flattens requested targets into an execution order that honors needs and
//! hooks, and detects cycles in the needs graph.

use crate::error::{ConfigError, ConfigResult};
use crate::runner::task::{Task, TaskMap};
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Resolve a target, preferring the `<target>:<context>` variant
pub fn resolve_target<'a>(tasks: &'a TaskMap, target: &str, context: &str) -> Option<&'a Task> {
    if !context.is_empty() {
        if let Some(task) = tasks.get(&format!("{}:{}", target, context)) {
            return Some(task);
        }
    }
    tasks.get(target)
}

/// Flatten `targets` into execution order
///
/// Needs come before the task that needs them, `<id>:<hook>` tasks wrap it,
/// and every task appears once. Missing hook tasks are ignored.
#[instrument(skip(tasks), fields(task_count = tasks.len()))]
pub fn flatten_tasks(tasks: &TaskMap, targets: &[String], context: &str) -> ConfigResult<Vec<Task>> {
    let mut set = Vec::new();
    let mut stack = Vec::new();
    flatten_into(tasks, targets, context, &mut set, &mut stack)?;
    debug!(
        order = ?set.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        "flattened tasks"
    );
    Ok(set)
}

fn flatten_into(
    tasks: &TaskMap,
    targets: &[String],
    context: &str,
    set: &mut Vec<Task>,
    stack: &mut Vec<String>,
) -> ConfigResult<()> {
    for target in targets {
        let task = resolve_target(tasks, target, context)
            .ok_or_else(|| ConfigError::TaskNotFound(target.clone()))?;

        if stack.contains(&task.id) {
            return Err(ConfigError::CyclicalReference(vec![task.id.clone()]));
        }

        if !task.needs.is_empty() {
            stack.push(task.id.clone());
            let needs: Vec<String> = task.needs.iter().map(|n| n.id.clone()).collect();
            flatten_into(tasks, &needs, context, set, stack)?;
            stack.pop();
        }

        for suffix in &task.hooks.before {
            push_hook(tasks, &task.id, suffix, set);
        }

        if !contains(set, &task.id) {
            set.push(task.clone());
        }

        for suffix in &task.hooks.after {
            push_hook(tasks, &task.id, suffix, set);
        }
    }

    Ok(())
}

fn push_hook(tasks: &TaskMap, id: &str, suffix: &str, set: &mut Vec<Task>) {
    if let Some(hook) = tasks.get(&format!("{}:{}", id, suffix)) {
        if !contains(set, &hook.id) {
            set.push(hook.clone());
        }
    }
}

fn contains(set: &[Task], id: &str) -> bool {
    set.iter().any(|t| t.id == id)
}

/// Find tasks that re-enter the needs chain they are already on
///
/// Returns the re-entering tasks, not full cycle paths. Needs that do not
/// resolve are ignored here; flattening reports them.
pub fn find_cyclical_references<'a, I>(tasks: &TaskMap, roots: I) -> Vec<Task>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut cycles: Vec<Task> = Vec::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = Vec::new();

    for task in roots {
        visit(tasks, task, &mut stack, &mut done, &mut cycles);
    }

    cycles
}

fn visit(
    tasks: &TaskMap,
    task: &Task,
    stack: &mut Vec<String>,
    done: &mut HashSet<String>,
    cycles: &mut Vec<Task>,
) {
    if stack.contains(&task.id) {
        if !contains(cycles, &task.id) {
            cycles.push(task.clone());
        }
        return;
    }
    if done.contains(&task.id) {
        return;
    }

    stack.push(task.id.clone());
    for need in &task.needs {
        if let Some(next) = tasks.get(&need.id) {
            visit(tasks, next, stack, done, cycles);
        }
    }
    stack.pop();
    done.insert(task.id.clone());
}

/// Reject the whole task map when any cycle exists
pub fn check_cycles(tasks: &TaskMap) -> ConfigResult<()> {
    let cycles = find_cyclical_references(tasks, tasks.iter());
    if cycles.is_empty() {
        return Ok(());
    }
    Err(ConfigError::CyclicalReference(
        cycles.into_iter().map(|t| t.id).collect(),
    ))
}
