//! Castfile validation
//!
//! Structural checks that can be made before any task runs: references
//! between tasks, jobs and inventory entries must resolve.

use crate::config::types::Config;
use crate::error::{ConfigError, ConfigResult};

/// Validate a complete castfile
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    validate_tasks(config)?;
    validate_jobs(config)?;
    validate_inventory(config)?;
    Ok(())
}

fn has_task(config: &Config, name: &str) -> bool {
    config.tasks.contains_key(name)
        || config
            .tasks
            .keys()
            .any(|k| k.eq_ignore_ascii_case(name))
}

/// Every `extends` must name another defined task
fn validate_tasks(config: &Config) -> ConfigResult<()> {
    for (name, task) in &config.tasks {
        if let Some(base) = &task.extends {
            if base.eq_ignore_ascii_case(name) {
                return Err(ConfigError::Invalid(format!("Task {} extends itself", name)));
            }
            if !has_task(config, base) {
                return Err(ConfigError::UndefinedExtends {
                    task: name.clone(),
                    base: base.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Every job need must name another defined job
fn validate_jobs(config: &Config) -> ConfigResult<()> {
    for (name, job) in &config.jobs {
        for need in &job.needs {
            if !config.jobs.contains_key(need) {
                return Err(ConfigError::UndefinedJobNeed {
                    job: name.clone(),
                    need: need.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Hosts may only reference defined defaults; `default` may be omitted
fn validate_inventory(config: &Config) -> ConfigResult<()> {
    let inventory = &config.inventory;
    for (alias, host) in &inventory.hosts {
        if let Some(defaults) = &host.defaults {
            if defaults != "default" && !inventory.defaults.contains_key(defaults) {
                return Err(ConfigError::UndefinedHostDefaults {
                    host: alias.clone(),
                    defaults: defaults.clone(),
                });
            }
        }
    }
    Ok(())
}
