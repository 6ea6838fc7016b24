mod bigquery;
mod google_auth;
mod mysql;
mod postgres;
mod registry;
mod snowflake;
pub mod statements;
mod traits;

pub use bigquery::{BigQueryClient, BigQueryFactory};
pub use google_auth::GoogleCredentials;
pub use mysql::{MySqlClient, MySqlFactory};
pub use postgres::{PostgresClient, PostgresFactory};
pub use snowflake::{SnowflakeClient, SnowflakeFactory};
pub use registry::BackendRegistry;
pub use traits::{BackendFactory, DynBackendFactory, DynTargetClient, TargetClient};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RunnerError;
use crate::models::{QueryStatus, ReadyQuery};

/// Dry-run handling shared by the clients: check connectivity, log, and report zero
/// rows without an error either way.
pub(crate) async fn dry_run_check<C>(
    client: &C,
    query: Arc<ReadyQuery>,
    address: &str,
) -> QueryStatus
where
    C: TargetClient + ?Sized,
{
    if client.is_connectable().await {
        info!(
            target_name = %client.target().name,
            "SUCCESS: Able to connect to target database, {}",
            address
        );
    } else {
        warn!(
            target_name = %client.target().name,
            "ERROR: Cannot connect to target database, {}",
            address
        );
    }
    QueryStatus::success(query, 0)
}

pub(crate) fn timed_out(limit: Duration) -> RunnerError {
    RunnerError::QueryTimeout(limit.as_secs())
}
