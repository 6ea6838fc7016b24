//! Singleton-run guard, kept either as a local file or as a Consul key.

use chrono::Utc;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::consul::ConsulClient;
use crate::error::{RunnerError, RunnerResult};

const LOCK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug)]
pub struct LockFile {
    path: String,
    soft: bool,
    consul: Option<ConsulClient>,
    locked: bool,
}

impl LockFile {
    pub fn new(path: impl Into<String>, soft: bool, consul: Option<ConsulClient>) -> Self {
        Self {
            path: path.into(),
            soft,
            consul,
            locked: false,
        }
    }

    /// Builds the lock and refuses to go on if one is already present.
    pub async fn acquire(
        path: impl Into<String>,
        soft: bool,
        consul: Option<ConsulClient>,
    ) -> RunnerResult<Self> {
        let lock = Self::new(path, soft, consul);
        if lock.exists().await? {
            return Err(RunnerError::LockExists(lock.path));
        }
        Ok(lock)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// A soft lock is released even when the run fails.
    pub fn is_soft(&self) -> bool {
        self.soft
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Writes the current UTC time to the lock location.
    pub async fn lock(&mut self) -> RunnerResult<()> {
        if self.locked {
            return Err(RunnerError::AlreadyLocked);
        }

        let value = Utc::now().format(LOCK_TIMESTAMP_FORMAT).to_string();
        info!("Checking and setting the lockfile at this key '{}'", self.path);

        match &self.consul {
            Some(consul) => consul.put_string(&self.path, &value).await?,
            None => {
                let dir = match Path::new(&self.path).parent() {
                    Some(dir) if !dir.as_os_str().is_empty() => dir,
                    _ => Path::new("."),
                };
                if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
                    return Err(RunnerError::LockDirectoryMissing(
                        dir.display().to_string(),
                    ));
                }

                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                file.write_all(value.as_bytes()).await?;
                file.flush().await?;
            }
        }

        self.locked = true;
        Ok(())
    }

    pub async fn unlock(&mut self) -> RunnerResult<()> {
        info!("Deleting lockfile at this key '{}'", self.path);

        match &self.consul {
            Some(consul) => consul.delete(&self.path).await?,
            None => tokio::fs::remove_file(&self.path).await?,
        }

        self.locked = false;
        Ok(())
    }

    pub async fn exists(&self) -> RunnerResult<bool> {
        match &self.consul {
            Some(consul) => match consul.get_string(&self.path).await {
                Ok(_) => Ok(true),
                Err(RunnerError::ConsulKeyNotFound(_)) => Ok(false),
                Err(e) => Err(e),
            },
            None => Ok(tokio::fs::try_exists(&self.path).await?),
        }
    }
}
