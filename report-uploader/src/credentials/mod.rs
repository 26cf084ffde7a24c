//! Credential sourcing
//!
//! Every deployment flavour (plain variables, a single JSON secret, a mounted
//! secrets file) ends up as the same [`CredentialSet`]. Pick the provider with
//! `CREDENTIALS_SOURCE`.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::types::{PipelineError, PipelineResult};

/// Variable holding the whole credential set as one JSON document
pub const JSON_CREDENTIALS_VAR: &str = "ALL_CREDENTIALS";

/// Credentials and bucket coordinates for one run
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CredentialSet {
    /// AWS access key id
    pub access_key_id: String,
    /// AWS secret access key
    pub secret_access_key: String,
    /// AWS region of the bucket
    pub region: String,
    /// Destination bucket
    pub bucket_name: String,
    /// API key for the automation service (triggered mode only)
    pub api_key: Option<String>,
    /// Agent to launch (triggered mode only)
    pub agent_id: Option<String>,
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("bucket_name", &self.bucket_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("agent_id", &self.agent_id)
            .finish()
    }
}

impl CredentialSet {
    /// Checks that every field needed for storage access is present
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` naming every empty field
    pub fn validate(&self) -> PipelineResult<()> {
        let missing: Vec<&str> = [
            ("access key id", &self.access_key_id),
            ("secret access key", &self.secret_access_key),
            ("region", &self.region),
            ("bucket name", &self.bucket_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Configuration(format!(
                "missing credentials: {}",
                missing.join(", ")
            )))
        }
    }

    /// Returns the API key and agent id needed to launch a remote job
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if either is unset or empty
    pub fn require_launch_credentials(&self) -> PipelineResult<(&str, &str)> {
        let api_key = non_empty(self.api_key.as_deref()).ok_or_else(|| {
            PipelineError::Configuration("missing API key for job launch".to_string())
        })?;
        let agent_id = non_empty(self.agent_id.as_deref()).ok_or_else(|| {
            PipelineError::Configuration("missing agent id for job launch".to_string())
        })?;

        Ok((api_key, agent_id))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A source of credential sets
pub trait CredentialProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Reads the raw credential set without validating it
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` or `PipelineError::Parse` if the source is unreadable
    fn credentials(&self) -> PipelineResult<CredentialSet>;

    /// Reads and validates the credential set
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if any required field is empty
    fn load(&self) -> PipelineResult<CredentialSet> {
        let credentials = self.credentials()?;
        credentials.validate()?;
        debug!(
            "Loaded credentials from {} for bucket {} in {}",
            self.name(),
            credentials.bucket_name,
            credentials.region
        );
        Ok(credentials)
    }
}

/// Reads the conventional AWS and automation-service variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialProvider;

impl CredentialProvider for EnvCredentialProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn credentials(&self) -> PipelineResult<CredentialSet> {
        let var = |name: &str| env::var(name).unwrap_or_default();

        Ok(CredentialSet {
            access_key_id: var("AWS_ACCESS_KEY_ID"),
            secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            region: var("AWS_REGION"),
            bucket_name: var("S3_BUCKET_NAME"),
            api_key: env::var("PHANTOMBUSTER_API_KEY").ok(),
            agent_id: env::var("PHANTOMBUSTER_AGENT_ID").ok(),
        })
    }
}

/// Reads one variable holding the credential set as JSON
#[derive(Debug, Clone)]
pub struct JsonCredentialProvider {
    var: String,
}

impl JsonCredentialProvider {
    /// Creates a provider reading the given variable
    #[must_use]
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for JsonCredentialProvider {
    fn default() -> Self {
        Self::new(JSON_CREDENTIALS_VAR)
    }
}

impl CredentialProvider for JsonCredentialProvider {
    fn name(&self) -> &'static str {
        "json variable"
    }

    fn credentials(&self) -> PipelineResult<CredentialSet> {
        let raw = env::var(&self.var).map_err(|_| {
            PipelineError::Configuration(format!("{} environment variable not set", self.var))
        })?;

        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Parse(format!("{} is not valid JSON: {e}", self.var)))
    }
}

/// Reads a JSON secrets file shaped like the JSON variable
#[derive(Debug, Clone)]
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    /// Creates a provider reading the given file
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for FileCredentialProvider {
    fn name(&self) -> &'static str {
        "secrets file"
    }

    fn credentials(&self) -> PipelineResult<CredentialSet> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot read credentials file {}: {e}",
                self.path.display()
            ))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            PipelineError::Parse(format!("{} is not valid JSON: {e}", self.path.display()))
        })
    }
}

/// Which provider to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// [`EnvCredentialProvider`]
    #[default]
    Env,
    /// [`JsonCredentialProvider`]
    Json,
    /// [`FileCredentialProvider`]
    File,
}

impl FromStr for CredentialSource {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "env" => Ok(Self::Env),
            "json" => Ok(Self::Json),
            "file" => Ok(Self::File),
            other => Err(PipelineError::Configuration(format!(
                "unknown credentials source: {other}"
            ))),
        }
    }
}

/// Builds the provider selected by `CREDENTIALS_SOURCE`
///
/// # Errors
///
/// Returns `PipelineError::Configuration` for an unknown source or a file
/// source without `CREDENTIALS_FILE`
pub fn provider_from_env() -> PipelineResult<Box<dyn CredentialProvider>> {
    let source: CredentialSource = env::var("CREDENTIALS_SOURCE")
        .unwrap_or_default()
        .parse()?;

    Ok(match source {
        CredentialSource::Env => Box::new(EnvCredentialProvider),
        CredentialSource::Json => Box::new(JsonCredentialProvider::default()),
        CredentialSource::File => {
            let path = env::var("CREDENTIALS_FILE").map_err(|_| {
                PipelineError::Configuration(
                    "CREDENTIALS_FILE environment variable not set".to_string(),
                )
            })?;
            Box::new(FileCredentialProvider::new(path))
        }
    })
}
