use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A query whose text has been fetched and, when requested, expanded.
///
/// Built once per run during preparation and shared read-only (behind an
/// `Arc`) by every target that executes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyQuery {
    pub script: String,
    pub name: String,
    pub path: String,
}

impl ReadyQuery {
    pub fn new(
        script: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            script: script.into(),
            name: name.into(),
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReadyStep {
    pub name: String,
    pub queries: Vec<Arc<ReadyQuery>>,
}

/// Rows captured when query output is requested. Values are rendered as
/// text, `NULL` for SQL nulls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueryStatus {
    pub query: Arc<ReadyQuery>,
    pub path: String,
    pub affected: u64,
    pub error: Option<String>,
    pub output: Option<ResultTable>,
}

impl QueryStatus {
    pub fn success(query: Arc<ReadyQuery>, affected: u64) -> Self {
        let path = query.path.clone();
        Self {
            query,
            path,
            affected,
            error: None,
            output: None,
        }
    }

    pub fn failure(query: Arc<ReadyQuery>, error: impl std::fmt::Display) -> Self {
        let path = query.path.clone();
        Self {
            query,
            path,
            affected: 0,
            error: Some(error.to_string()),
            output: None,
        }
    }

    pub fn with_output(mut self, output: ResultTable) -> Self {
        self.output = Some(output);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct StepStatus {
    pub name: String,
    /// 1-based position of the step within the executed step list.
    pub index: usize,
    pub queries: Vec<QueryStatus>,
}

impl StepStatus {
    pub fn has_errors(&self) -> bool {
        self.queries.iter().any(QueryStatus::is_error)
    }
}

/// Failures that belong to a target as a whole rather than to one query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("Database type is unsupported: {0}")]
    UnsupportedBackend(String),

    #[error("Target initialization failed: {0}")]
    InitializationFailed(String),

    #[error("The fromStep argument did not match any available steps: {0}")]
    StepNotFound(String),

    #[error("The runQuery argument did not match any available queries: '{0}'")]
    QueryNotFound(String),

    #[error("The runQuery argument must have the form 'step::query': '{0}'")]
    RunQueryArgument(String),

    #[error("Target task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Debug, Clone)]
pub struct TargetStatus {
    pub name: String,
    pub errors: Vec<TargetError>,
    pub steps: Vec<StepStatus>,
}

impl TargetStatus {
    pub fn new(name: impl Into<String>, steps: Vec<StepStatus>) -> Self {
        Self {
            name: name.into(),
            errors: Vec::new(),
            steps,
        }
    }

    pub fn with_error(name: impl Into<String>, error: TargetError) -> Self {
        Self {
            name: name.into(),
            errors: vec![error],
            steps: Vec::new(),
        }
    }

    pub fn has_init_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_query_errors(&self) -> bool {
        self.steps.iter().any(StepStatus::has_errors)
    }

    pub fn failed_queries(&self) -> impl Iterator<Item = (&StepStatus, &QueryStatus)> {
        self.steps
            .iter()
            .flat_map(|step| step.queries.iter().map(move |q| (step, q)))
            .filter(|(_, q)| q.is_error())
    }
}
