//! OAuth access tokens for Google APIs from application default credentials.

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

const METADATA_ENDPOINT: &str = "http://metadata.google.internal";
const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

pub const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// Tokens are renewed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoogleCredentials {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default = "default_token_uri")]
        token_uri: String,
    },
    #[serde(skip)]
    ComputeMetadata { endpoint: String },
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    pub value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

impl GoogleCredentials {
    /// `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud user credentials
    /// file, then the compute metadata server.
    pub fn application_default() -> RunnerResult<Self> {
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            if !path.is_empty() {
                return Self::from_file(Path::new(&path));
            }
        }
        if let Some(path) = gcloud_credentials_file().filter(|p| p.exists()) {
            return Self::from_file(&path);
        }
        Ok(Self::compute_metadata(METADATA_ENDPOINT))
    }

    pub fn compute_metadata(endpoint: impl Into<String>) -> Self {
        GoogleCredentials::ComputeMetadata {
            endpoint: endpoint.into(),
        }
    }

    pub fn from_file(path: &Path) -> RunnerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RunnerError::CredentialsNotFound {
            provider: "GoogleApplicationDefault".to_string(),
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> RunnerResult<Self> {
        serde_json::from_str(json).map_err(|e| RunnerError::CredentialsNotFound {
            provider: "GoogleApplicationDefault".to_string(),
            message: format!("unsupported credentials file: {}", e),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GoogleCredentials::ServiceAccount { .. } => "GoogleServiceAccount",
            GoogleCredentials::AuthorizedUser { .. } => "GoogleAuthorizedUser",
            GoogleCredentials::ComputeMetadata { .. } => "GoogleComputeMetadata",
        }
    }

    fn error(&self, message: impl Into<String>) -> RunnerError {
        RunnerError::CredentialsNotFound {
            provider: self.kind().to_string(),
            message: message.into(),
        }
    }

    pub(crate) async fn fetch_token(&self, http: &Client, scope: &str) -> RunnerResult<AccessToken> {
        debug!(provider = self.kind(), "Requesting Google access token");
        let request = match self {
            GoogleCredentials::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
                    .map_err(|e| self.error(format!("invalid service account key: {}", e)))?;
                let now = chrono::Utc::now().timestamp();
                let claims = AssertionClaims {
                    iss: client_email,
                    scope,
                    aud: token_uri,
                    iat: now,
                    exp: now + 3600,
                };
                let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
                    .map_err(|e| self.error(format!("failed to sign token request: {}", e)))?;
                http.post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            GoogleCredentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => http.post(token_uri).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ]),
            GoogleCredentials::ComputeMetadata { endpoint } => http
                .get(format!("{}{}", endpoint.trim_end_matches('/'), METADATA_TOKEN_PATH))
                .header("Metadata-Flavor", "Google"),
        };

        let resp = request.send().await.map_err(|e| self.error(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.error(format!("token endpoint returned HTTP {}: {}", status, body.trim())));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| self.error(format!("unexpected token response: {}", e)))?;
        Ok(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in.unwrap_or(3600)),
        })
    }
}

fn gcloud_credentials_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".config")
            .join("gcloud")
            .join("application_default_credentials.json")
    })
}
