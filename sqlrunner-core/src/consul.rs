//! Minimal client for the Consul KV HTTP API.
//!
//! Playbooks, SQL scripts and lock keys can all live in Consul; only plain
//! string get/put/delete is needed for that.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ConsulClient {
    client: Client,
    base_url: String,
}

impl ConsulClient {
    /// `address` may be a bare `host:port` (as the Consul agent prints it) or
    /// a full URL.
    pub fn new(address: &str) -> RunnerResult<Self> {
        Self::with_timeout(address, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(address: &str, timeout: Duration) -> RunnerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: normalize_address(address),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key.trim_start_matches('/'))
    }

    pub async fn get_string(&self, key: &str) -> RunnerResult<String> {
        let url = self.key_url(key);
        debug!(key = %key, "Reading key from consul");

        let resp = self.client.get(&url).query(&[("raw", "")]).send().await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.text().await?),
            StatusCode::NOT_FOUND => Err(RunnerError::ConsulKeyNotFound(key.to_string())),
            s => Err(RunnerError::ConsulRequestFailed {
                key: key.to_string(),
                status: s.as_u16(),
            }),
        }
    }

    pub async fn put_string(&self, key: &str, value: &str) -> RunnerResult<()> {
        let url = self.key_url(key);
        debug!(key = %key, "Writing key to consul");

        let resp = self
            .client
            .put(&url)
            .body(value.to_string())
            .send()
            .await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(RunnerError::ConsulRequestFailed {
                key: key.to_string(),
                status: resp.status().as_u16(),
            })
        }
    }

    pub async fn delete(&self, key: &str) -> RunnerResult<()> {
        let url = self.key_url(key);
        debug!(key = %key, "Deleting key from consul");

        let resp = self.client.delete(&url).send().await?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(RunnerError::ConsulRequestFailed {
                key: key.to_string(),
                status: resp.status().as_u16(),
            })
        }
    }
}

fn normalize_address(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
