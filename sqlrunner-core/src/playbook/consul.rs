use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{parse_playbook_yaml, PlaybookProvider};
use crate::consul::ConsulClient;
use crate::error::{RunnerError, RunnerResult};
use crate::models::Playbook;
use crate::template::TemplateEngine;

/// Reads a YAML playbook stored under a Consul KV key.
pub struct ConsulPlaybookProvider {
    client: ConsulClient,
    key: String,
    variables: HashMap<String, String>,
    engine: Arc<TemplateEngine>,
}

impl ConsulPlaybookProvider {
    pub fn new(
        client: ConsulClient,
        key: impl Into<String>,
        variables: HashMap<String, String>,
        engine: Arc<TemplateEngine>,
    ) -> Self {
        Self {
            client,
            key: key.into(),
            variables,
            engine,
        }
    }
}

#[async_trait]
impl PlaybookProvider for ConsulPlaybookProvider {
    async fn get_playbook(&self) -> RunnerResult<Playbook> {
        info!(key = %self.key, consul = %self.client.base_url(), "Loading playbook from consul");
        let raw = self.client.get_string(&self.key).await.map_err(|e| match e {
            RunnerError::ConsulKeyNotFound(_) => e,
            other => RunnerError::PlaybookReadFailed {
                path: self.key.clone(),
                message: other.to_string(),
            },
        })?;

        parse_playbook_yaml(&raw, &self.variables, &self.engine).await
    }
}
