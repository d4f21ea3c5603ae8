use super::*;
use anyhow::{anyhow, Result};
use std::collections::HashSet;

/// Validate the complete configuration
pub fn validate_config(config: &SchedulerConfig) -> Result<()> {
    validate_scheduler_options(&config.scheduler)?;
    validate_task_declarations(&config.jobs)?;
    Ok(())
}

/// Validate scheduler-wide options
fn validate_scheduler_options(options: &SchedulerOptions) -> Result<()> {
    if options.log_dir.as_os_str().is_empty() {
        return Err(anyhow!("Log directory cannot be empty"));
    }

    if options.tick_interval.is_zero() {
        return Err(anyhow!("Tick interval must be greater than 0"));
    }

    validate_stop_options(&options.stop)
}

fn validate_stop_options(stop: &StopOptions) -> Result<()> {
    if stop.timeout.is_zero() {
        return Err(anyhow!("Stop timeout must be greater than 0"));
    }

    if stop.poll_interval.is_zero() {
        return Err(anyhow!("Stop poll interval must be greater than 0"));
    }

    if stop.term_attempts == 0 {
        return Err(anyhow!("Termination attempts must be greater than 0"));
    }

    if stop.term_poll_interval.is_zero() {
        return Err(anyhow!("Termination poll interval must be greater than 0"));
    }

    Ok(())
}

/// Validate all task declarations
fn validate_task_declarations(tasks: &[TaskDeclaration]) -> Result<()> {
    if tasks.is_empty() {
        return Err(anyhow!("At least one job must be configured"));
    }

    let mut names = HashSet::new();
    for task in tasks {
        if !names.insert(&task.name) {
            return Err(anyhow!("Duplicate job name: {}", task.name));
        }

        validate_task_declaration(task)?;
    }

    Ok(())
}

/// Validate a single task declaration
fn validate_task_declaration(task: &TaskDeclaration) -> Result<()> {
    let name = task.name.as_str();

    if name.is_empty() {
        return Err(anyhow!("Job name cannot be empty"));
    }

    if name.len() > 64 {
        return Err(anyhow!("Job name too long (max 64 characters): {}", name));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(anyhow!(
            "Job name can only contain alphanumeric characters, hyphens, and underscores: {}",
            name
        ));
    }

    if task.path.trim().is_empty() {
        return Err(anyhow!("Path for job {} cannot be empty", name));
    }

    Ok(())
}
