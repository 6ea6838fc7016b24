use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::error::RunnerResult;
use crate::models::{QueryStatus, ReadyQuery, Target};

/// A connected database target.
///
/// One client is built per target and used only by that target's task tree.
/// Splitting multi-statement scripts is the client's business.
#[async_trait]
pub trait TargetClient: Send + Sync {
    fn target(&self) -> &Target;

    /// Cheap liveness check; used by dry runs.
    async fn is_connectable(&self) -> bool;

    /// Runs one script. Failures are reported on the returned status, never
    /// raised. With `dry_run` the client only checks connectivity and reports
    /// zero rows.
    async fn run_query(
        &self,
        query: Arc<ReadyQuery>,
        dry_run: bool,
        show_output: bool,
    ) -> QueryStatus;
}

pub type DynTargetClient = Arc<dyn TargetClient>;

/// Builds clients for one backend type.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn name(&self) -> &str;

    /// `pool_size` is the widest step the client will run: every query of a
    /// step must be able to hold its own connection at the same time.
    async fn connect(
        &self,
        target: &Target,
        config: &ConnectionConfig,
        pool_size: u32,
    ) -> RunnerResult<DynTargetClient>;
}

pub type DynBackendFactory = Arc<dyn BackendFactory>;
