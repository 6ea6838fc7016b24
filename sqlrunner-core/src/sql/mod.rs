//! Sources of SQL script text.

mod consul;
mod file;

use async_trait::async_trait;

use crate::error::RunnerResult;

pub use consul::ConsulSqlProvider;
pub use file::FileSqlProvider;

/// Resolves query references to script text.
///
/// The engine treats both the resolved key and the text as opaque.
#[async_trait]
pub trait SqlProvider: Send + Sync {
    /// Fully qualified path or key for a query reference.
    fn resolve_key(&self, reference: &str) -> String;

    async fn get_sql(&self, reference: &str) -> RunnerResult<String>;
}

/// Joins a `/`-separated prefix and key the way a path join would, without
/// letting a leading `/` on the key discard the prefix.
pub(crate) fn join_key(prefix: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        return key.to_string();
    }
    if key.is_empty() {
        return prefix.to_string();
    }
    format!("{}/{}", prefix.trim_end_matches('/'), key)
}
