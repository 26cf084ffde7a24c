//! Source resolution: where the CSV and JSON bytes of a run come from

mod http;
mod launcher;
mod report;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use mime::Mime;
use tracing::{error, info};

pub use http::{http_client, HttpFetcher, PayloadFetcher};
pub use launcher::{
    await_output, download_url, launch_with_retry, JobLauncher, LaunchConfig, LaunchOutcome,
    PhantomLauncher, API_KEY_HEADER,
};
pub use report::{
    csv_url_pattern, extract_csv_url, find_latest_report, load_report, save_descriptor, Report,
    ReportConfig,
};

#[cfg(any(test, feature = "test-utils"))]
pub use http::mock as fetch_mock;
#[cfg(any(test, feature = "test-utils"))]
pub use launcher::mock as launch_mock;

use crate::config::RunConfig;
use crate::credentials::CredentialSet;
use crate::types::{PipelineError, PipelineResult};

/// Declared format of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// Comma separated rows with a header line
    Csv,
    /// Any JSON document
    Json,
}

impl ContentKind {
    /// File extension used in destination keys
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    /// Content type sent with uploads
    #[must_use]
    pub fn mime(self) -> Mime {
        match self {
            Self::Csv => mime::TEXT_CSV,
            Self::Json => mime::APPLICATION_JSON,
        }
    }

    /// Guesses the kind from a file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => f.write_str("CSV"),
            Self::Json => f.write_str("JSON"),
        }
    }
}

/// Bytes fetched for one run, tagged with their format and origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Declared format
    pub kind: ContentKind,
    /// Raw body
    pub bytes: Bytes,
    /// URL or local path the bytes came from
    pub source: String,
}

impl Payload {
    /// Creates a payload
    #[must_use]
    pub fn new(kind: ContentKind, bytes: impl Into<Bytes>, source: impl Into<String>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
            source: source.into(),
        }
    }
}

/// How the run finds its payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceMode {
    /// `CSV_URL` and `JSON_URL` from configuration
    #[default]
    Direct,
    /// CSV link pulled out of the newest local report
    Extract,
    /// Launch the remote job and read its output descriptor
    Trigger,
}

impl FromStr for SourceMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "direct" => Ok(Self::Direct),
            "extract" => Ok(Self::Extract),
            "trigger" => Ok(Self::Trigger),
            other => Err(PipelineError::Configuration(format!(
                "unknown source mode: {other}"
            ))),
        }
    }
}

/// Outcome of resolving one payload; each is uploaded or reported on its own
#[derive(Debug)]
pub struct Resolved {
    /// Format the payload was expected in
    pub kind: ContentKind,
    /// The payload, or why it could not be obtained
    pub payload: PipelineResult<Payload>,
}

impl Resolved {
    fn new(kind: ContentKind, payload: PipelineResult<Payload>) -> Self {
        Self { kind, payload }
    }
}

/// Produces the payloads of a run according to its [`SourceMode`]
pub struct SourceResolver<'a> {
    config: &'a RunConfig,
    fetcher: &'a dyn PayloadFetcher,
    launcher: &'a dyn JobLauncher,
}

impl<'a> SourceResolver<'a> {
    /// Creates a resolver
    #[must_use]
    pub fn new(
        config: &'a RunConfig,
        fetcher: &'a dyn PayloadFetcher,
        launcher: &'a dyn JobLauncher,
    ) -> Self {
        Self {
            config,
            fetcher,
            launcher,
        }
    }

    /// Checks everything the selected mode needs, without touching the network
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` for any missing URL, credential or pattern
    pub fn check_config(&self, credentials: &CredentialSet) -> PipelineResult<()> {
        match self.config.mode {
            SourceMode::Direct => {
                required_url(self.config.csv_url.as_deref(), "CSV_URL")?;
                required_url(self.config.json_url.as_deref(), "JSON_URL")?;
            }
            SourceMode::Extract => {
                if self.config.report.pattern.trim().is_empty() {
                    return Err(PipelineError::Configuration(
                        "report file pattern is empty".to_string(),
                    ));
                }
                csv_url_pattern(&self.config.report.host_domain)?;
            }
            SourceMode::Trigger => {
                credentials.require_launch_credentials()?;
                if self.config.launch.api_base_url.trim().is_empty() {
                    return Err(PipelineError::Configuration(
                        "job API base URL is empty".to_string(),
                    ));
                }
                if !self.config.launch.download_url_pointer.starts_with('/') {
                    return Err(PipelineError::Configuration(format!(
                        "download URL pointer must start with '/': {}",
                        self.config.launch.download_url_pointer
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves and fetches the run's payloads, CSV first
    ///
    /// # Errors
    ///
    /// Configuration errors and failures shared by every payload of the run
    /// (no report file, job launch failure) are returned directly; failures
    /// specific to one payload are carried in its [`Resolved`]
    pub async fn resolve(
        &self,
        credentials: &CredentialSet,
        at: DateTime<Utc>,
    ) -> PipelineResult<Vec<Resolved>> {
        self.check_config(credentials)?;

        match self.config.mode {
            SourceMode::Direct => Ok(self.resolve_direct().await),
            SourceMode::Extract => self.resolve_extracted().await,
            SourceMode::Trigger => self.resolve_triggered(credentials, at).await,
        }
    }

    async fn resolve_direct(&self) -> Vec<Resolved> {
        let mut resolved = Vec::with_capacity(2);
        for (kind, url, name) in [
            (ContentKind::Csv, self.config.csv_url.as_deref(), "CSV_URL"),
            (ContentKind::Json, self.config.json_url.as_deref(), "JSON_URL"),
        ] {
            let payload = match required_url(url, name) {
                Ok(url) => self.fetcher.fetch(url, kind).await,
                Err(e) => Err(e),
            };
            resolved.push(Resolved::new(kind, payload));
        }
        resolved
    }

    async fn resolve_extracted(&self) -> PipelineResult<Vec<Resolved>> {
        let report_config = &self.config.report;
        let path = find_latest_report(&report_config.dir, &report_config.pattern)?;
        let report = load_report(&path).await?;

        let csv = match extract_csv_url(
            &report.document,
            &report_config.url_field,
            &report_config.host_domain,
        ) {
            Ok(url) => {
                info!("Found CSV link in {}: {}", path.display(), url);
                self.fetcher.fetch(&url, ContentKind::Csv).await
            }
            Err(e) => {
                error!("Failed to extract CSV link from {}: {}", path.display(), e);
                Err(e)
            }
        };

        let json = Payload::new(
            ContentKind::Json,
            report.bytes,
            path.display().to_string(),
        );

        Ok(vec![
            Resolved::new(ContentKind::Csv, csv),
            Resolved::new(ContentKind::Json, Ok(json)),
        ])
    }

    async fn resolve_triggered(
        &self,
        credentials: &CredentialSet,
        at: DateTime<Utc>,
    ) -> PipelineResult<Vec<Resolved>> {
        let launch_config = &self.config.launch;
        let (api_key, agent_id) = credentials.require_launch_credentials()?;

        let container_id =
            launch_with_retry(self.launcher, api_key, agent_id, launch_config).await?;
        let descriptor = await_output(self.launcher, api_key, &container_id, launch_config).await?;
        info!("Job output received for container {}", container_id);

        let (path, rendered) = save_descriptor(&self.config.report.dir, at, &descriptor).await?;

        let csv = match download_url(&descriptor, &launch_config.download_url_pointer) {
            Ok(url) => self.fetcher.fetch(&url, ContentKind::Csv).await,
            Err(e) => Err(e),
        };
        let json = Payload::new(ContentKind::Json, rendered, path.display().to_string());

        Ok(vec![
            Resolved::new(ContentKind::Csv, csv),
            Resolved::new(ContentKind::Json, Ok(json)),
        ])
    }
}

fn required_url<'u>(url: Option<&'u str>, name: &str) -> PipelineResult<&'u str> {
    url.map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| PipelineError::Configuration(format!("Missing {name} environment variable")))
}
