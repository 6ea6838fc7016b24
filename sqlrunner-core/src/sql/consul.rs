use async_trait::async_trait;

use super::{join_key, SqlProvider};
use crate::consul::ConsulClient;
use crate::error::RunnerResult;

/// Reads scripts from Consul KV, under a key prefix.
#[derive(Debug, Clone)]
pub struct ConsulSqlProvider {
    client: ConsulClient,
    prefix: String,
}

impl ConsulSqlProvider {
    pub fn new(client: ConsulClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl SqlProvider for ConsulSqlProvider {
    fn resolve_key(&self, reference: &str) -> String {
        join_key(&self.prefix, reference)
    }

    async fn get_sql(&self, reference: &str) -> RunnerResult<String> {
        self.client.get_string(&self.resolve_key(reference)).await
    }
}
