use castore_core::{ArtifactError, BackendKind, Result, StoreConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    /// Deadline applied to each command, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend: Option<String>,
    pub location: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Loads `path` (optional), then `CASTORE__*` environment variables, then
    /// the command line overrides.
    pub fn load(path: &str, overrides: &ConfigOverrides) -> Result<Self> {
        // Flags accept any case; the file format only knows lowercase names.
        let backend = overrides
            .backend
            .as_deref()
            .map(BackendKind::parse)
            .transpose()?
            .map(|kind| kind.as_str().to_string());

        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("CASTORE").separator("__"))
            .set_override_option("store.backend", backend)
            .and_then(|builder| {
                builder.set_override_option("store.bucket_or_path", overrides.location.clone())
            })
            .and_then(|builder| {
                builder.set_override_option("timeout_secs", overrides.timeout_secs)
            })
            .map_err(|e| ArtifactError::Config(e.to_string()))?
            .build()
            .map_err(|e| ArtifactError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ArtifactError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
