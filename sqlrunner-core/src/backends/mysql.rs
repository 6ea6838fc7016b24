use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{
    MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::{Column, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::statements::{is_select, split_statements};
use super::traits::{BackendFactory, DynTargetClient, TargetClient};
use super::{dry_run_check, timed_out};
use crate::config::ConnectionConfig;
use crate::error::RunnerResult;
use crate::models::{QueryStatus, ReadyQuery, ResultTable, Target};

/// MySQL targets.
///
/// Scripts are split client-side (honouring `DELIMITER`) and run one
/// statement at a time on a single connection. `SELECT` statements count the rows they return;
/// everything else counts the rows the server reports as affected.
pub struct MySqlClient {
    target: Target,
    pool: MySqlPool,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl MySqlClient {
    /// Builds the client without connecting. The pool holds up to
    /// `pool_size` connections so a whole step can run at once; the acquire
    /// timeout then only bounds establishing a connection.
    pub fn new(target: &Target, config: &ConnectionConfig, pool_size: u32) -> RunnerResult<Self> {
        let mut options = MySqlConnectOptions::new();
        if !target.host.is_empty() {
            options = options.host(&target.host);
        }
        if let Some(port) = target.port_number()? {
            options = options.port(port);
        }
        if !target.username.is_empty() {
            options = options.username(&target.username).password(&target.password);
        }
        if !target.database.is_empty() {
            options = options.database(&target.database);
        }
        options = options.ssl_mode(if target.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Disabled
        });

        let pool = MySqlPoolOptions::new()
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

    /// Runs the whole script on one pooled connection so session state
    /// (temporary tables, user variables, `USE`, open transactions) carries
    /// from one statement to the next.
    async fn execute(
        &self,
        script: &str,
        show_output: bool,
    ) -> Result<(u64, Option<ResultTable>), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        run_script(&mut *conn, script, show_output).await
    }
}

/// One database session that statements are sent to in order.
#[async_trait]
pub(crate) trait StatementSession: Send {
    /// Runs a statement and returns the affected row count.
    async fn execute_statement(&mut self, statement: &str) -> Result<u64, sqlx::Error>;

    /// Runs a row-returning statement and returns how many rows came back,
    /// capturing them into `table` when given.
    async fn fetch_statement(
        &mut self,
        statement: &str,
        table: Option<&mut ResultTable>,
    ) -> Result<u64, sqlx::Error>;
}

#[async_trait]
impl StatementSession for MySqlConnection {
    async fn execute_statement(&mut self, statement: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::Executor::execute(&mut *self, sqlx::raw_sql(statement)).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_statement(
        &mut self,
        statement: &str,
        mut table: Option<&mut ResultTable>,
    ) -> Result<u64, sqlx::Error> {
        let mut rows = sqlx::raw_sql(statement).fetch(&mut *self);
        let mut count = 0u64;
        while let Some(row) = rows.try_next().await? {
            count += 1;
            if let Some(table) = table.as_deref_mut() {
                capture_row(table, &row);
            }
        }
        Ok(count)
    }
}

/// Splits `script` and sends every statement to `session`, stopping at the
/// first error.
pub(crate) async fn run_script<S>(
    session: &mut S,
    script: &str,
    show_output: bool,
) -> Result<(u64, Option<ResultTable>), sqlx::Error>
where
    S: StatementSession + ?Sized,
{
    let mut affected = 0u64;
    let mut table = show_output.then(ResultTable::default);

    for statement in split_statements(script) {
        affected += if is_select(&statement) {
            session.fetch_statement(&statement, table.as_mut()).await?
        } else {
            session.execute_statement(&statement).await?
        };
    }

    Ok((affected, table))
}

fn capture_row(table: &mut ResultTable, row: &MySqlRow) {
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
impl TargetClient for MySqlClient {
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

        debug!(target_name = %self.target.name, query = %query.name, "Executing on mysql");
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

pub struct MySqlFactory;

#[async_trait]
impl BackendFactory for MySqlFactory {
    fn name(&self) -> &str {
        "mysql"
    }

    async fn connect(
        &self,
        target: &Target,
        config: &ConnectionConfig,
        pool_size: u32,
    ) -> RunnerResult<DynTargetClient> {
        Ok(Arc::new(MySqlClient::new(target, config, pool_size)?))
    }
}
