use colored::Colorize;
use sqlrunner_core::{ConsulClient, LockFile, LockOperation, LockSpec, RunnerConfig};

use crate::{EXIT_FAILURE, EXIT_LOCKED};

pub fn lock_consul(spec: &LockSpec, config: &RunnerConfig) -> anyhow::Result<Option<ConsulClient>> {
    Ok(spec
        .consul
        .as_deref()
        .map(|address| ConsulClient::with_timeout(address, config.consul.request_timeout()))
        .transpose()?)
}

pub fn build_lock(spec: &LockSpec, config: &RunnerConfig) -> anyhow::Result<LockFile> {
    Ok(LockFile::new(
        spec.path.clone(),
        spec.soft,
        lock_consul(spec, config)?,
    ))
}

/// `--check-lock` and `--delete-lock`. Returns the process exit code.
pub async fn handle_lock_operation(
    operation: LockOperation,
    config: &RunnerConfig,
) -> anyhow::Result<i32> {
    match operation {
        LockOperation::Check(spec) => {
            let lock = build_lock(&spec, config)?;
            if lock.exists().await? {
                println!(
                    "{} {} found, previous run failed or is ongoing",
                    "Error:".red().bold(),
                    spec.path
                );
                Ok(EXIT_LOCKED)
            } else {
                println!("{} {} does not exist", "Success:".green().bold(), spec.path);
                Ok(0)
            }
        }
        LockOperation::Delete(spec) => {
            let mut lock = build_lock(&spec, config)?;
            if !lock.exists().await? {
                println!(
                    "{} {} does not exist, nothing to delete",
                    "Error:".red().bold(),
                    spec.path
                );
                return Ok(EXIT_FAILURE);
            }

            match lock.unlock().await {
                Ok(()) => {
                    println!("{} {} found and deleted", "Success:".green().bold(), spec.path);
                    Ok(0)
                }
                Err(e) => {
                    println!(
                        "{} {} found but could not delete: {}",
                        "Error:".red().bold(),
                        spec.path,
                        e
                    );
                    Ok(EXIT_FAILURE)
                }
            }
        }
    }
}
