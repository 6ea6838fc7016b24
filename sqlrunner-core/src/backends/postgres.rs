use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, Either, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{BackendFactory, DynTargetClient, TargetClient};
use super::{dry_run_check, timed_out};
use crate::config::ConnectionConfig;
use crate::error::RunnerResult;
use crate::models::{QueryStatus, ReadyQuery, ResultTable, Target};

/// Postgres and Redshift targets over the Postgres wire protocol.
///
/// Scripts go through the simple query protocol, so a file may hold several
/// `;`-separated statements; the affected count is what the server reports
/// for them.
pub struct PostgresClient {
    target: Target,
    pool: PgPool,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl PostgresClient {
    /// Builds the client without connecting. The pool holds up to
    /// `pool_size` connections so a whole step can run at once; the acquire
    /// timeout then only bounds establishing a connection.
    pub fn new(target: &Target, config: &ConnectionConfig, pool_size: u32) -> RunnerResult<Self> {
        let mut options = PgConnectOptions::new();
        if !target.host.is_empty() {
            options = options.host(&target.host);
        }
        if let Some(port) = target.port_number()? {
            options = options.port(port);
        }
        if !target.username.is_empty() {
            options = options.username(&target.username);
        }
        if !target.password.is_empty() {
            options = options.password(&target.password);
        }
        if !target.database.is_empty() {
            options = options.database(&target.database);
        }
        options = options.ssl_mode(if target.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Disable
        });
        if !target.query_tag.is_empty() {
            options = options.application_name(&target.query_tag);
        }

        let pool = PgPoolOptions::new()
            .max_connections(pool_size.max(1))
            .acquire_timeout(config.connect_timeout())
            .connect_lazy_with(options);

        Ok(Self {
            target: target.clone(),
            pool,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    fn address(&self) -> String {
        format!("{}:{}", self.target.host, self.target.port)
    }

    async fn execute(
        &self,
        script: &str,
        show_output: bool,
    ) -> Result<(u64, Option<ResultTable>), sqlx::Error> {
        let mut stream = sqlx::raw_sql(script).fetch_many(&self.pool);
        let mut affected = 0u64;
        let mut table = show_output.then(ResultTable::default);

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(result) => affected += result.rows_affected(),
                Either::Right(row) => {
                    if let Some(table) = table.as_mut() {
                        capture_row(table, &row);
                    }
                }
            }
        }

        Ok((affected, table))
    }
}

fn capture_row(table: &mut ResultTable, row: &PgRow) {
    if table.columns.is_empty() {
        table.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
    }
    let values = (0..row.len())
        .map(|i| match row.try_get_unchecked::<Option<String>, _>(i) {
            Ok(Some(value)) => value,
            Ok(None) => "NULL".to_string(),
            Err(_) => "?".to_string(),
        })
        .collect();
    table.rows.push(values);
}

#[async_trait]
impl TargetClient for PostgresClient {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn is_connectable(&self) -> bool {
        let ping = sqlx::raw_sql("SELECT 1").execute(&self.pool);
        match tokio::time::timeout(self.connect_timeout, ping).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(target_name = %self.target.name, error = %e, "Connectivity check failed");
                false
            }
            Err(_) => {
                warn!(target_name = %self.target.name, "Connectivity check timed out");
                false
            }
        }
    }

    async fn run_query(
        &self,
        query: Arc<ReadyQuery>,
        dry_run: bool,
        show_output: bool,
    ) -> QueryStatus {
        if dry_run {
            return dry_run_check(self, query, &self.address()).await;
        }

        debug!(target_name = %self.target.name, query = %query.name, "Executing on postgres");
        let outcome =
            tokio::time::timeout(self.read_timeout, self.execute(&query.script, show_output)).await;

        match outcome {
            Ok(Ok((affected, table))) => {
                let status = QueryStatus::success(query, affected);
                match table {
                    Some(table) => status.with_output(table),
                    None => status,
                }
            }
            Ok(Err(e)) => QueryStatus::failure(query, e),
            Err(_) => QueryStatus::failure(query, timed_out(self.read_timeout)),
        }
    }
}

pub struct PostgresFactory;

#[async_trait]
impl BackendFactory for PostgresFactory {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn connect(
        &self,
        target: &Target,
        config: &ConnectionConfig,
        pool_size: u32,
    ) -> RunnerResult<DynTargetClient> {
        Ok(Arc::new(PostgresClient::new(target, config, pool_size)?))
    }
}
