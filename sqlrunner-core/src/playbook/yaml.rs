use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::{parse_playbook_yaml, PlaybookProvider};
use crate::error::{RunnerError, RunnerResult};
use crate::models::Playbook;
use crate::template::TemplateEngine;

/// Reads a YAML playbook from the local file system.
pub struct YamlFilePlaybookProvider {
    path: PathBuf,
    variables: HashMap<String, String>,
    engine: Arc<TemplateEngine>,
}

impl YamlFilePlaybookProvider {
    pub fn new(
        path: impl Into<PathBuf>,
        variables: HashMap<String, String>,
        engine: Arc<TemplateEngine>,
    ) -> Self {
        Self {
            path: path.into(),
            variables,
            engine,
        }
    }
}

#[async_trait]
impl PlaybookProvider for YamlFilePlaybookProvider {
    async fn get_playbook(&self) -> RunnerResult<Playbook> {
        info!(path = %self.path.display(), "Loading playbook");
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RunnerError::PlaybookReadFailed {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;

        parse_playbook_yaml(&raw, &self.variables, &self.engine).await
    }
}
