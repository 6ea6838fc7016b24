use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::{BackendFactory, DynTargetClient, TargetClient};
use super::{dry_run_check, timed_out};
use crate::config::ConnectionConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::models::{QueryStatus, ReadyQuery, ResultTable, Target};

const LOGIN_PATH: &str = "/session/v1/login-request";
const QUERY_PATH: &str = "/queries/v1/query-request";
const CLIENT_APP_ID: &str = "sql-runner";

/// Response codes for a statement that is still executing.
const QUERY_IN_PROGRESS: [&str; 2] = ["333333", "333334"];
const SESSION_EXPIRED: &str = "390112";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const JWT_LIFETIME_SECS: i64 = 59 * 60;

/// Snowflake targets over the Snowflake REST API.
///
/// A session is opened on first use, with a password or, when the target names
/// a private key file, key-pair (JWT) authentication. Whole scripts are sent
/// as one multi-statement request; the affected count is the sum of rows
/// inserted, updated and deleted.
pub struct SnowflakeClient {
    target: Target,
    http: Client,
    base_url: String,
    auth: SnowflakeAuth,
    session: Mutex<Option<String>>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

enum SnowflakeAuth {
    Password(String),
    KeyPair { key: EncodingKey, fingerprint: String },
}

impl SnowflakeAuth {
    fn key_pair(key: &RsaPrivateKey) -> Result<Self, String> {
        let der = key.to_pkcs1_der().map_err(|e| e.to_string())?;
        Ok(SnowflakeAuth::KeyPair {
            key: EncodingKey::from_rsa_der(der.as_bytes()),
            fingerprint: public_key_fingerprint(key)?,
        })
    }
}

#[derive(Serialize)]
struct KeyPairClaims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct SnowflakeResponse<T> {
    #[serde(default)]
    success: bool,
    code: Option<String>,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct LoginData {
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<Vec<Value>>,
    stats: Option<QueryStats>,
    result_ids: Option<String>,
    get_result_url: Option<String>,
    sql_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryStats {
    #[serde(default)]
    num_rows_inserted: u64,
    #[serde(default)]
    num_rows_updated: u64,
    #[serde(default)]
    num_rows_deleted: u64,
}

impl SnowflakeResponse<QueryData> {
    fn is_pending(&self) -> bool {
        self.success
            && self
                .code
                .as_deref()
                .is_some_and(|code| QUERY_IN_PROGRESS.contains(&code))
    }

    fn into_result(self) -> RunnerResult<QueryData> {
        if self.success {
            return Ok(self.data.unwrap_or_default());
        }

        let code = self.code.unwrap_or_default();
        let message = self.message.unwrap_or_else(|| "unknown error".to_string());
        let sql_state = self.data.and_then(|d| d.sql_state);
        Err(RunnerError::QueryFailed(match sql_state {
            Some(state) => format!("{} ({}): {}", code, state, message),
            None => format!("{}: {}", code, message),
        }))
    }
}

impl QueryData {
    fn affected(&self) -> u64 {
        self.stats
            .as_ref()
            .map(|s| s.num_rows_inserted + s.num_rows_updated + s.num_rows_deleted)
            .unwrap_or(0)
    }

    fn child_results(&self) -> Vec<String> {
        self.result_ids
            .as_deref()
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn into_table(self) -> ResultTable {
        let mut table = ResultTable::new(self.rowtype.into_iter().map(|c| c.name).collect());
        table.rows = self
            .rowset
            .into_iter()
            .map(|row| row.into_iter().map(render_value).collect())
            .collect();
        table
    }
}

fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

impl SnowflakeClient {
    pub fn new(target: &Target, config: &ConnectionConfig) -> RunnerResult<Self> {
        let invalid = |parameter: &str, message: String| RunnerError::InvalidConnectionParameter {
            target: target.name.clone(),
            parameter: parameter.to_string(),
            message,
        };

        if target.account.trim().is_empty() {
            return Err(invalid(
                "account",
                "an account is required for snowflake targets".to_string(),
            ));
        }

        // with key-pair auth the password field holds the key passphrase
        let auth = if target.private_key_path.is_empty() {
            SnowflakeAuth::Password(target.password.clone())
        } else {
            let key = load_private_key(Path::new(&target.private_key_path), &target.password)
                .map_err(|e| invalid("private_key_path", e))?;
            SnowflakeAuth::key_pair(&key).map_err(|e| invalid("private_key_path", e))?
        };

        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            target: target.clone(),
            http,
            base_url: format!("https://{}", account_host(&target.account, &target.region)),
            auth,
            session: Mutex::new(None),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn account_name(&self) -> String {
        self.target
            .account
            .split('.')
            .next()
            .unwrap_or_default()
            .trim()
            .to_uppercase()
    }

    fn connection_error(&self, message: impl std::fmt::Display) -> RunnerError {
        RunnerError::ConnectionFailed {
            target: self.target.name.clone(),
            message: message.to_string(),
        }
    }

    async fn session_token(&self) -> RunnerResult<String> {
        let mut session = self.session.lock().await;
        if let Some(token) = session.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *session = Some(token.clone());
        Ok(token)
    }

    async fn login(&self) -> RunnerResult<String> {
        let account = self.account_name();
        let mut data = json!({
            "CLIENT_APP_ID": CLIENT_APP_ID,
            "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
            "ACCOUNT_NAME": account,
            "LOGIN_NAME": self.target.username,
            "SESSION_PARAMETERS": {},
        });
        if !self.target.query_tag.is_empty() {
            data["SESSION_PARAMETERS"] = json!({ "QUERY_TAG": self.target.query_tag });
        }
        match &self.auth {
            SnowflakeAuth::Password(password) => data["PASSWORD"] = json!(password),
            SnowflakeAuth::KeyPair { key, fingerprint } => {
                data["AUTHENTICATOR"] = json!("SNOWFLAKE_JWT");
                data["TOKEN"] = json!(key_pair_jwt(key, fingerprint, &account, &self.target.username)?);
            }
        }

        let mut params = vec![("requestId", Uuid::new_v4().to_string())];
        if !self.target.database.is_empty() {
            params.push(("databaseName", self.target.database.clone()));
        }
        if !self.target.warehouse.is_empty() {
            params.push(("warehouse", self.target.warehouse.clone()));
        }

        debug!(target_name = %self.target.name, account = %account, "Opening snowflake session");
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .query(&params)
            .header(ACCEPT, "application/json")
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|e| self.connection_error(e))?;

        if !resp.status().is_success() {
            return Err(self.connection_error(format!("login returned HTTP {}", resp.status())));
        }

        let body: SnowflakeResponse<LoginData> =
            resp.json().await.map_err(|e| self.connection_error(e))?;
        if !body.success {
            return Err(self.connection_error(
                body.message.unwrap_or_else(|| "login failed".to_string()),
            ));
        }
        body.data
            .and_then(|d| d.token)
            .ok_or_else(|| self.connection_error("login response carried no session token"))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        token: &str,
    ) -> RunnerResult<SnowflakeResponse<T>> {
        let resp = request
            .header(AUTHORIZATION, format!("Snowflake Token=\"{}\"", token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RunnerError::QueryFailed(format!(
                "snowflake returned HTTP {}",
                status
            )));
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            RunnerError::SerializationError(format!("unexpected snowflake response: {}", e))
        })
    }

    /// Polls a pending statement until it has finished.
    async fn complete(
        &self,
        mut response: SnowflakeResponse<QueryData>,
        token: &str,
    ) -> RunnerResult<QueryData> {
        while response.is_pending() {
            let url = response
                .data
                .as_ref()
                .and_then(|d| d.get_result_url.clone())
                .ok_or_else(|| {
                    RunnerError::QueryFailed(
                        "statement is still running but no result url was returned".to_string(),
                    )
                })?;
            tokio::time::sleep(POLL_INTERVAL).await;
            response = self
                .send(self.http.get(format!("{}{}", self.base_url, url)), token)
                .await?;
        }
        response.into_result()
    }

    async fn submit(&self, script: &str) -> RunnerResult<(QueryData, String)> {
        let body = json!({
            "sqlText": script,
            "asyncExec": false,
            "sequenceId": 1,
            "parameters": { "MULTI_STATEMENT_COUNT": 0 },
        });

        let mut renewed = false;
        loop {
            let token = self.session_token().await?;
            let request = self
                .http
                .post(format!("{}{}", self.base_url, QUERY_PATH))
                .query(&[("requestId", Uuid::new_v4().to_string())])
                .json(&body);
            let response = self.send(request, &token).await?;

            if response.code.as_deref() == Some(SESSION_EXPIRED) && !renewed {
                debug!(target_name = %self.target.name, "Snowflake session expired, logging in again");
                *self.session.lock().await = None;
                renewed = true;
                continue;
            }

            return Ok((self.complete(response, &token).await?, token));
        }
    }

    async fn execute(
        &self,
        script: &str,
        show_output: bool,
    ) -> RunnerResult<(u64, Option<ResultTable>)> {
        if script.trim().is_empty() {
            return Ok((0, None));
        }

        let (data, token) = self.submit(script).await?;
        let children = data.child_results();
        if children.is_empty() {
            let affected = data.affected();
            return Ok((affected, show_output.then(|| data.into_table())));
        }

        if show_output {
            return Err(RunnerError::QueryFailed(
                "Unable to showQueryOutput for multi-statement queries".to_string(),
            ));
        }

        let mut affected = 0;
        for id in children {
            let url = format!("{}/queries/{}/result", self.base_url, id);
            let response = self.send(self.http.get(url), &token).await?;
            affected += self.complete(response, &token).await?.affected();
        }
        Ok((affected, None))
    }
}

/// Host for an account identifier. Locators without a region suffix get the
/// target's region appended, except for the default `us-west-1`.
fn account_host(account: &str, region: &str) -> String {
    let account = account.trim().to_lowercase();
    let region = region.trim();
    if account.contains('.') || region.is_empty() || region == "us-west-1" {
        format!("{}.snowflakecomputing.com", account)
    } else {
        format!("{}.{}.snowflakecomputing.com", account, region)
    }
}

/// Reads a PEM private key: PKCS#8, passphrase-protected PKCS#8 or PKCS#1.
pub(crate) fn load_private_key(path: &Path, passphrase: &str) -> Result<RsaPrivateKey, String> {
    let pem = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    let parsed = if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        RsaPrivateKey::from_pkcs8_encrypted_pem(&pem, passphrase.as_bytes()).map_err(|e| e.to_string())
    } else if pem.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| e.to_string())
    } else {
        RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| e.to_string())
    };

    parsed.map_err(|e| format!("failed to parse private key {}: {}", path.display(), e))
}

/// `SHA256:` followed by the base64 digest of the DER public key, as
/// registered on the Snowflake user.
fn public_key_fingerprint(key: &RsaPrivateKey) -> Result<String, String> {
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| e.to_string())?;
    Ok(format!("SHA256:{}", STANDARD.encode(Sha256::digest(der.as_bytes()))))
}

fn key_pair_jwt(
    key: &EncodingKey,
    fingerprint: &str,
    account: &str,
    user: &str,
) -> RunnerResult<String> {
    let qualified = format!("{}.{}", account, user.to_uppercase());
    let now = chrono::Utc::now().timestamp();
    let claims = KeyPairClaims {
        iss: format!("{}.{}", qualified, fingerprint),
        sub: qualified,
        iat: now,
        exp: now + JWT_LIFETIME_SECS,
    };
    encode(&Header::new(Algorithm::RS256), &claims, key)
        .map_err(|e| RunnerError::Internal(format!("failed to sign snowflake login token: {}", e)))
}

#[async_trait]
impl TargetClient for SnowflakeClient {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn is_connectable(&self) -> bool {
        match tokio::time::timeout(self.connect_timeout, self.session_token()).await {
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
            return dry_run_check(self, query, &self.target.account).await;
        }

        debug!(target_name = %self.target.name, query = %query.name, "Executing on snowflake");
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

pub struct SnowflakeFactory;

#[async_trait]
impl BackendFactory for SnowflakeFactory {
    fn name(&self) -> &str {
        "snowflake"
    }

    async fn connect(
        &self,
        target: &Target,
        config: &ConnectionConfig,
        _pool_size: u32,
    ) -> RunnerResult<DynTargetClient> {
        Ok(Arc::new(SnowflakeClient::new(target, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY_FINGERPRINT: &str = "SHA256:xd0VHzqvt/2bGqtmmxbymCEMtS/yL6PfLNCxhgOyc3w=";

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    fn target() -> Target {
        Target {
            name: "sf".to_string(),
            kind: "snowflake".to_string(),
            account: "xy12345".to_string(),
            region: "eu-west-1".to_string(),
            username: "loader".to_string(),
            password: "hunter2".to_string(),
            database: "ANALYTICS".to_string(),
            warehouse: "ETL_WH".to_string(),
            query_tag: "sql-runner".to_string(),
            ..Default::default()
        }
    }

    async fn client(server: &MockServer) -> SnowflakeClient {
        SnowflakeClient::new(&target(), &ConnectionConfig::default())
            .unwrap()
            .with_base_url(server.uri())
    }

    async fn mount_login(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(query_param("warehouse", "ETL_WH"))
            .and(body_string_contains("\"PASSWORD\":\"hunter2\""))
            .and(body_string_contains("\"QUERY_TAG\":\"sql-runner\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "token": "session-1" }
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn test_account_host() {
        assert_eq!(account_host("xy12345", ""), "xy12345.snowflakecomputing.com");
        assert_eq!(account_host("xy12345", "us-west-1"), "xy12345.snowflakecomputing.com");
        assert_eq!(
            account_host("XY12345", "eu-west-1"),
            "xy12345.eu-west-1.snowflakecomputing.com"
        );
        assert_eq!(
            account_host("xy12345.us-east-2.aws", "eu-west-1"),
            "xy12345.us-east-2.aws.snowflakecomputing.com"
        );
    }

    #[test]
    fn test_account_is_required() {
        let mut target = target();
        target.account = String::new();
        let result = SnowflakeClient::new(&target, &ConnectionConfig::default());
        assert!(matches!(
            result,
            Err(RunnerError::InvalidConnectionParameter { ref parameter, .. }) if parameter == "account"
        ));
    }

    #[test]
    fn test_load_private_keys() {
        let plain = load_private_key(&testdata("rsa_key.p8"), "").unwrap();
        let encrypted = load_private_key(&testdata("rsa_key_encrypted.p8"), "testpass").unwrap();
        assert_eq!(public_key_fingerprint(&plain).unwrap(), KEY_FINGERPRINT);
        assert_eq!(public_key_fingerprint(&encrypted).unwrap(), KEY_FINGERPRINT);

        assert!(load_private_key(&testdata("rsa_key_encrypted.p8"), "wrongpass").is_err());
        assert!(load_private_key(&testdata("missing.p8"), "").is_err());

        let dir = tempfile::tempdir().unwrap();
        let invalid = dir.path().join("invalid.pem");
        std::fs::write(&invalid, "not a pem file").unwrap();
        assert!(load_private_key(&invalid, "").is_err());
    }

    #[tokio::test]
    async fn test_key_pair_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .and(body_string_contains("\"AUTHENTICATOR\":\"SNOWFLAKE_JWT\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "token": "session-jwt" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut target = target();
        target.private_key_path = testdata("rsa_key_encrypted.p8").display().to_string();
        target.password = "testpass".to_string();
        let client = SnowflakeClient::new(&target, &ConnectionConfig::default())
            .unwrap()
            .with_base_url(server.uri());

        assert!(client.is_connectable().await);
    }

    #[tokio::test]
    async fn test_bad_key_passphrase_fails_construction() {
        let mut target = target();
        target.private_key_path = testdata("rsa_key_encrypted.p8").display().to_string();
        target.password = "wrongpass".to_string();

        let result = SnowflakeFactory
            .connect(&target, &ConnectionConfig::default(), 1)
            .await;
        assert!(matches!(
            result,
            Err(RunnerError::InvalidConnectionParameter { ref parameter, .. }) if parameter == "private_key_path"
        ));
    }

    #[tokio::test]
    async fn test_session_is_reused_and_rows_are_summed() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path(QUERY_PATH))
            .and(header("authorization", "Snowflake Token=\"session-1\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "rowtype": [{ "name": "number of rows inserted" }],
                    "rowset": [["3"]],
                    "stats": { "numRowsInserted": 3, "numRowsUpdated": 2, "numRowsDeleted": 0 }
                }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server).await;
        let query = Arc::new(ReadyQuery::new("INSERT INTO t SELECT 1;", "ins", "ins.sql"));

        let first = client.run_query(Arc::clone(&query), false, false).await;
        let second = client.run_query(query, false, true).await;

        assert_eq!(first.error, None);
        assert_eq!(first.affected, 5);
        let table = second.output.unwrap();
        assert_eq!(table.columns, vec!["number of rows inserted".to_string()]);
        assert_eq!(table.rows, vec![vec!["3".to_string()]]);
    }

    #[tokio::test]
    async fn test_multi_statement_results_are_summed() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path(QUERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "resultIds": "01a,01b" }
            })))
            .mount(&server)
            .await;
        for (id, inserted) in [("01a", 4), ("01b", 6)] {
            Mock::given(method("GET"))
                .and(path(format!("/queries/{}/result", id)))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "success": true,
                    "data": { "stats": { "numRowsInserted": inserted } }
                })))
                .mount(&server)
                .await;
        }

        let client = client(&server).await;
        let query = Arc::new(ReadyQuery::new("INSERT 1; INSERT 2;", "multi", "multi.sql"));

        let status = client.run_query(Arc::clone(&query), false, false).await;
        assert_eq!(status.error, None);
        assert_eq!(status.affected, 10);

        let status = client.run_query(query, false, true).await;
        assert!(status
            .error
            .unwrap()
            .contains("Unable to showQueryOutput for multi-statement queries"));
    }

    #[tokio::test]
    async fn test_pending_statement_is_polled() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path(QUERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "code": "333334",
                "data": { "getResultUrl": "/queries/01c/result" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/queries/01c/result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "stats": { "numRowsDeleted": 7 } }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let query = Arc::new(ReadyQuery::new("DELETE FROM t;", "del", "del.sql"));
        let status = client.run_query(query, false, false).await;
        assert_eq!(status.error, None);
        assert_eq!(status.affected, 7);
    }

    #[tokio::test]
    async fn test_statement_error_is_reported() {
        let server = MockServer::start().await;
        mount_login(&server, 1).await;
        Mock::given(method("POST"))
            .and(path(QUERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "code": "002003",
                "message": "SQL compilation error: Object 'T' does not exist.",
                "data": { "sqlState": "42S02" }
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        let query = Arc::new(ReadyQuery::new("SELECT * FROM t;", "sel", "sel.sql"));
        let status = client.run_query(query, false, false).await;
        assert!(status
            .error
            .unwrap()
            .contains("002003 (42S02): SQL compilation error"));
    }

    #[tokio::test]
    async fn test_failed_login_fails_the_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(LOGIN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "code": "390100",
                "message": "Incorrect username or password was specified."
            })))
            .mount(&server)
            .await;

        let client = client(&server).await;
        assert!(!client.is_connectable().await);

        let query = Arc::new(ReadyQuery::new("SELECT 1;", "one", "one.sql"));
        let status = client.run_query(Arc::clone(&query), false, false).await;
        assert!(status.error.unwrap().contains("Incorrect username or password"));

        let dry = client.run_query(query, true, false).await;
        assert_eq!(dry.error, None);
        assert_eq!(dry.affected, 0);
    }
}
