use crate::storage::BackendKind;
use crate::{ArtifactError, ArtifactStore, ArtifactStoreBuilder, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the Google application credentials file.
pub const GOOGLE_CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Environment variable whose presence signals AWS credentials.
pub const AWS_ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: BackendKind,
    /// Bucket name for object stores, directory for the local backend.
    #[serde(default)]
    pub bucket_or_path: String,
    #[serde(default)]
    pub credentials: CredentialsSource,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl StoreConfig {
    pub fn builder(&self) -> ArtifactStoreBuilder {
        let mut builder = ArtifactStoreBuilder::new()
            .backend(self.backend.as_str())
            .location(self.bucket_or_path.clone())
            .credentials(self.credentials.clone());

        if let Some(region) = &self.region {
            builder = builder.region(region.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint.clone());
        }
        builder
    }

    pub async fn build(&self) -> Result<ArtifactStore> {
        self.builder().build().await
    }
}

/// Where backend credentials come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsSource {
    /// Use credentials discoverable in the process environment, falling back
    /// to anonymous access when there are none.
    #[default]
    Environment,
    Anonymous,
    ServiceAccount { path: PathBuf },
}

/// Credentials after the environment has been consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCredentials {
    Anonymous,
    /// The backend client reads its credentials from the environment itself.
    Environment,
    /// Application default credentials file (service account or user).
    ApplicationCredentials(PathBuf),
    ServiceAccount(PathBuf),
}

impl ResolvedCredentials {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, ResolvedCredentials::Anonymous)
    }
}

impl CredentialsSource {
    pub fn resolve(&self, kind: BackendKind) -> Result<ResolvedCredentials> {
        self.resolve_with(kind, |key| std::env::var(key).ok())
    }

    /// Resolves against an injected environment lookup.
    pub fn resolve_with<F>(&self, kind: BackendKind, lookup: F) -> Result<ResolvedCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        match (self, kind) {
            (_, BackendKind::Local | BackendKind::Memory) => Ok(ResolvedCredentials::Anonymous),
            (CredentialsSource::Anonymous, _) => Ok(ResolvedCredentials::Anonymous),
            (CredentialsSource::Environment, BackendKind::Gcs) => {
                Ok(match present(GOOGLE_CREDENTIALS_ENV) {
                    Some(path) => ResolvedCredentials::ApplicationCredentials(PathBuf::from(path)),
                    None => ResolvedCredentials::Anonymous,
                })
            }
            (CredentialsSource::Environment, BackendKind::S3) => {
                Ok(match present(AWS_ACCESS_KEY_ENV) {
                    Some(_) => ResolvedCredentials::Environment,
                    None => ResolvedCredentials::Anonymous,
                })
            }
            (CredentialsSource::ServiceAccount { path }, BackendKind::Gcs) => {
                Ok(ResolvedCredentials::ServiceAccount(path.clone()))
            }
            (CredentialsSource::ServiceAccount { .. }, other) => Err(ArtifactError::Config(
                format!("service account credentials are not supported for {} backend", other),
            )),
        }
    }
}
