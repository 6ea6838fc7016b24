//! AWS credential resolution for the credential template helpers.
//!
//! Rendered as a Redshift `COPY`/`UNLOAD` credentials clause.

use aws_config::environment::EnvironmentVariableCredentialsProvider;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::imds::Client as ImdsClient;
use aws_config::meta::credentials::CredentialsProviderChain;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_smithy_types::error::display::DisplayErrorContext;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AwsCredentials {
    pub fn to_credentials_clause(&self) -> String {
        format!(
            "CREDENTIALS 'aws_access_key_id={};aws_secret_access_key={}'",
            self.access_key_id, self.secret_access_key
        )
    }
}

impl From<&Credentials> for AwsCredentials {
    fn from(creds: &Credentials) -> Self {
        Self {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
        }
    }
}

/// Looks up credentials from the environment, a shared credentials file or
/// the EC2 instance metadata service, using the AWS SDK providers.
#[derive(Debug, Clone, Default)]
pub struct CredentialResolver {
    metadata_endpoint: Option<String>,
    shared_credentials_file: Option<PathBuf>,
}

impl CredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = Some(endpoint.into());
        self
    }

    /// Reads profiles from `path` instead of `~/.aws/credentials`.
    pub fn with_shared_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.shared_credentials_file = Some(path.into());
        self
    }

    pub async fn env_credentials(&self) -> RunnerResult<AwsCredentials> {
        resolve("EnvironmentVariable", EnvironmentVariableCredentialsProvider::new()).await
    }

    /// An empty profile name falls back to `AWS_PROFILE`, then `default`.
    pub async fn profile_credentials(&self, profile: &str) -> RunnerResult<AwsCredentials> {
        resolve("ProfileFile", self.profile_provider(profile)).await
    }

    pub async fn ec2_role_credentials(&self) -> RunnerResult<AwsCredentials> {
        resolve("Ec2InstanceMetadata", self.imds_provider()?).await
    }

    /// Tries the environment, then the shared profile, then the EC2 role.
    pub async fn chain_credentials(&self, profile: &str) -> RunnerResult<AwsCredentials> {
        let chain = CredentialsProviderChain::first_try(
            "Environment",
            EnvironmentVariableCredentialsProvider::new(),
        )
        .or_else("Profile", self.profile_provider(profile))
        .or_else("Ec2InstanceMetadata", self.imds_provider()?);

        resolve("CredentialsProviderChain", chain).await
    }

    fn profile_provider(&self, profile: &str) -> ProfileFileCredentialsProvider {
        let mut builder = ProfileFileCredentialsProvider::builder();
        if !profile.is_empty() {
            builder = builder.profile_name(profile);
        }
        if let Some(path) = &self.shared_credentials_file {
            builder = builder.profile_files(
                ProfileFiles::builder()
                    .with_file(ProfileFileKind::Credentials, path)
                    .build(),
            );
        }
        builder.build()
    }

    fn imds_provider(&self) -> RunnerResult<ImdsCredentialsProvider> {
        let mut builder = ImdsCredentialsProvider::builder();
        if let Some(endpoint) = &self.metadata_endpoint {
            let client = ImdsClient::builder()
                .endpoint(endpoint)
                .map_err(|e| RunnerError::CredentialsNotFound {
                    provider: "Ec2InstanceMetadata".to_string(),
                    message: format!("invalid metadata endpoint '{}': {}", endpoint, e),
                })?
                .build();
            builder = builder.imds_client(client);
        }
        Ok(builder.build())
    }
}

async fn resolve<P>(provider_name: &str, provider: P) -> RunnerResult<AwsCredentials>
where
    P: ProvideCredentials,
{
    debug!(provider = provider_name, "Resolving AWS credentials");
    let creds = provider
        .provide_credentials()
        .await
        .map_err(|e| RunnerError::CredentialsNotFound {
            provider: provider_name.to_string(),
            message: DisplayErrorContext(&e).to_string(),
        })?;
    Ok(AwsCredentials::from(&creds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_credentials_clause() {
        let creds = AwsCredentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
        };
        assert_eq!(
            creds.to_credentials_clause(),
            "CREDENTIALS 'aws_access_key_id=AKIA;aws_secret_access_key=secret'"
        );
    }

    #[test]
    fn test_from_sdk_credentials() {
        let sdk = Credentials::from_keys("ASIA1", "s3cr3t", Some("session".to_string()));
        let creds = AwsCredentials::from(&sdk);
        assert_eq!(creds.access_key_id, "ASIA1");
        assert_eq!(creds.secret_access_key, "s3cr3t");
    }

    #[tokio::test]
    async fn test_profile_credentials() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[default]\naws_access_key_id = default-key\naws_secret_access_key = default-secret\n\n[etl]\naws_access_key_id=etl-key\naws_secret_access_key=etl-secret"
        )
        .unwrap();

        let resolver = CredentialResolver::new().with_shared_credentials_file(file.path());

        let etl = resolver.profile_credentials("etl").await.unwrap();
        assert_eq!(etl.access_key_id, "etl-key");
        assert_eq!(etl.secret_access_key, "etl-secret");

        let err = resolver.profile_credentials("fake-profile").await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::CredentialsNotFound { ref provider, .. } if provider == "ProfileFile"
        ));
    }

    #[tokio::test]
    async fn test_ec2_role_unavailable() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = CredentialResolver::new().with_metadata_endpoint(server.uri());
        assert!(matches!(
            resolver.ec2_role_credentials().await,
            Err(RunnerError::CredentialsNotFound { .. })
        ));
    }
}
