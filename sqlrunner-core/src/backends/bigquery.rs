use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::google_auth::{AccessToken, GoogleCredentials, BIGQUERY_SCOPE};
use super::traits::{BackendFactory, DynTargetClient, TargetClient};
use super::{dry_run_check, timed_out};
use crate::config::ConnectionConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::models::{QueryStatus, ReadyQuery, ResultTable, Target};

const BIGQUERY_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// How long each request waits server-side for the job before returning.
const WAIT_MS: u64 = 10_000;

/// BigQuery targets over the jobs.query REST API, in standard SQL.
///
/// The target's `project` bills the job; a non-empty `region` is passed as
/// the job location.
pub struct BigQueryClient {
    target: Target,
    http: Client,
    base_url: String,
    credentials: GoogleCredentials,
    token: Mutex<Option<AccessToken>>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl QueryResponse {
    fn affected(&self) -> u64 {
        self.num_dml_affected_rows
            .as_deref()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    fn into_table(self) -> ResultTable {
        let columns = self
            .schema
            .map(|s| s.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();
        let mut table = ResultTable::new(columns);
        table.rows = self
            .rows
            .into_iter()
            .map(|row| {
                row.f
                    .into_iter()
                    .map(|cell| match cell.v {
                        Value::String(s) => s,
                        Value::Null => "NULL".to_string(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect();
        table
    }
}

impl BigQueryClient {
    pub fn new(
        target: &Target,
        config: &ConnectionConfig,
        credentials: GoogleCredentials,
    ) -> RunnerResult<Self> {
        if target.project.trim().is_empty() {
            return Err(RunnerError::InvalidConnectionParameter {
                target: target.name.clone(),
                parameter: "project".to_string(),
                message: "a project is required for bigquery targets".to_string(),
            });
        }

        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            target: target.clone(),
            http,
            base_url: BIGQUERY_API_BASE.to_string(),
            credentials,
            token: Mutex::new(None),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> RunnerResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let token = self
            .credentials
            .fetch_token(&self.http, BIGQUERY_SCOPE)
            .await
            .map_err(|e| RunnerError::ConnectionFailed {
                target: self.target.name.clone(),
                message: e.to_string(),
            })?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> RunnerResult<T> {
        let token = self.access_token().await?;
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("bigquery returned HTTP {}", status));
            return Err(RunnerError::QueryFailed(message));
        }

        serde_json::from_str(&body).map_err(|e| {
            RunnerError::SerializationError(format!("unexpected bigquery response: {}", e))
        })
    }

    async fn execute(
        &self,
        script: &str,
        show_output: bool,
    ) -> RunnerResult<(u64, Option<ResultTable>)> {
        if script.trim().is_empty() {
            return Ok((0, None));
        }

        let project = &self.target.project;
        let location = Some(self.target.region.as_str()).filter(|r| !r.is_empty());
        let request = QueryRequest {
            query: script,
            use_legacy_sql: false,
            location,
            timeout_ms: WAIT_MS,
        };

        let mut response: QueryResponse = self
            .send(
                self.http
                    .post(format!("{}/projects/{}/queries", self.base_url, project))
                    .json(&request),
            )
            .await?;

        while !response.job_complete {
            let job = response.job_reference.take().ok_or_else(|| {
                RunnerError::QueryFailed("bigquery returned a running job without a reference".to_string())
            })?;
            debug!(target_name = %self.target.name, job_id = %job.job_id, "Waiting for bigquery job");

            let mut poll = self
                .http
                .get(format!("{}/projects/{}/queries/{}", self.base_url, project, job.job_id))
                .query(&[("timeoutMs", WAIT_MS.to_string())]);
            if let Some(location) = job.location.as_deref() {
                poll = poll.query(&[("location", location)]);
            }
            response = self.send(poll).await?;
            if response.job_reference.is_none() {
                response.job_reference = Some(job);
            }
        }

        let affected = response.affected();
        Ok((affected, show_output.then(|| response.into_table())))
    }
}

#[async_trait]
impl TargetClient for BigQueryClient {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn is_connectable(&self) -> bool {
        match tokio::time::timeout(self.connect_timeout, self.execute("SELECT 1", true)).await {
            Ok(Ok((_, Some(table)))) => table.rows == vec![vec!["1".to_string()]],
            Ok(Ok(_)) => false,
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
            return dry_run_check(self, query, &self.target.project).await;
        }

        debug!(target_name = %self.target.name, query = %query.name, "Executing on bigquery");
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

pub struct BigQueryFactory;

#[async_trait]
impl BackendFactory for BigQueryFactory {
    fn name(&self) -> &str {
        "bigquery"
    }

    async fn connect(
        &self,
        target: &Target,
        config: &ConnectionConfig,
        _pool_size: u32,
    ) -> RunnerResult<DynTargetClient> {
        let credentials = GoogleCredentials::application_default()?;
        Ok(Arc::new(BigQueryClient::new(target, config, credentials)?))
    }
}
