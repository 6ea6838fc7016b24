use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::SqlProvider;
use crate::error::{RunnerError, RunnerResult};

/// Reads scripts from the local file system, relative to a SQL root.
#[derive(Debug, Clone)]
pub struct FileSqlProvider {
    root: PathBuf,
}

impl FileSqlProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SqlProvider for FileSqlProvider {
    fn resolve_key(&self, reference: &str) -> String {
        self.root
            .join(reference.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned()
    }

    async fn get_sql(&self, reference: &str) -> RunnerResult<String> {
        let path = self.resolve_key(reference);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RunnerError::SqlReadFailed {
                path,
                message: e.to_string(),
            })
    }
}
