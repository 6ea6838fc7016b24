use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::bigquery::BigQueryFactory;
use super::mysql::MySqlFactory;
use super::postgres::PostgresFactory;
use super::snowflake::SnowflakeFactory;
use super::traits::{DynBackendFactory, DynTargetClient};
use crate::config::ConnectionConfig;
use crate::models::{BackendType, Target, TargetError};

/// Maps backend types to the factories that build their clients.
///
/// Built once at startup and shared read-only by every target task.
pub struct BackendRegistry {
    factories: HashMap<BackendType, DynBackendFactory>,
    connection: ConnectionConfig,
}

impl BackendRegistry {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            factories: HashMap::new(),
            connection,
        }
    }

    /// Postgres and Redshift share the Postgres client; every other backend
    /// has its own.
    pub fn with_defaults(connection: ConnectionConfig) -> Self {
        let postgres: DynBackendFactory = Arc::new(PostgresFactory);
        Self::new(connection)
            .register(BackendType::Postgres, postgres.clone())
            .register(BackendType::Redshift, postgres)
            .register(BackendType::MySql, Arc::new(MySqlFactory))
            .register(BackendType::Snowflake, Arc::new(SnowflakeFactory))
            .register(BackendType::BigQuery, Arc::new(BigQueryFactory))
    }

    pub fn register(mut self, backend: BackendType, factory: DynBackendFactory) -> Self {
        self.factories.insert(backend, factory);
        self
    }

    pub fn supports(&self, backend: BackendType) -> bool {
        self.factories.contains_key(&backend)
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Builds the client for `target`, able to run `pool_size` queries at
    /// once. Failures come back as the target-level error to report for it.
    pub async fn connect(
        &self,
        target: &Target,
        pool_size: u32,
    ) -> Result<DynTargetClient, TargetError> {
        let backend = target
            .backend_type()
            .map_err(|_| TargetError::UnsupportedBackend(target.kind.clone()))?;

        let factory = self
            .factories
            .get(&backend)
            .ok_or_else(|| TargetError::UnsupportedBackend(target.kind.clone()))?;

        debug!(
            target_name = %target.name,
            backend = %backend,
            factory = factory.name(),
            pool_size,
            "Building target client"
        );

        factory
            .connect(target, &self.connection, pool_size.max(1))
            .await
            .map_err(|e| TargetError::InitializationFailed(e.to_string()))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults(ConnectionConfig::default())
    }
}
