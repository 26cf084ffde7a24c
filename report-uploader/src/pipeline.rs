//! Resolve → transform → upload, once per payload

use std::path::Path;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::credentials::CredentialSet;
use crate::source::{ContentKind, JobLauncher, Payload, PayloadFetcher, SourceResolver};
use crate::storage::ObjectStore;
use crate::transform;
use crate::types::{PipelineError, PipelineResult};
use crate::writer::{DestinationWriter, WriteReport};

/// What happened to one payload of a run
#[derive(Debug)]
pub struct PayloadSummary {
    /// Payload format
    pub kind: ContentKind,
    /// Per-key results, when the payload got as far as uploading
    pub report: Option<WriteReport>,
    /// Why the payload never reached the writer
    pub error: Option<String>,
}

impl PayloadSummary {
    /// True when the payload was written to every key
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.report.as_ref().is_some_and(WriteReport::is_success)
    }
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// One entry per resolved payload
    pub payloads: Vec<PayloadSummary>,
    /// Failure shared by the whole run, e.g. no report file
    pub error: Option<String>,
}

impl RunSummary {
    /// True when nothing failed; the process exits nonzero otherwise
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.payloads.iter().all(PayloadSummary::is_success)
    }

    /// Process exit code for this run
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

/// One configured run of the pipeline
pub struct Pipeline<'a> {
    config: &'a RunConfig,
    credentials: &'a CredentialSet,
    resolver: SourceResolver<'a>,
    writer: DestinationWriter<'a>,
}

impl<'a> Pipeline<'a> {
    /// Wires the pipeline stages together
    #[must_use]
    pub fn new(
        config: &'a RunConfig,
        credentials: &'a CredentialSet,
        fetcher: &'a dyn PayloadFetcher,
        launcher: &'a dyn JobLauncher,
        store: &'a dyn ObjectStore,
    ) -> Self {
        Self {
            config,
            credentials,
            resolver: SourceResolver::new(config, fetcher, launcher),
            writer: DestinationWriter::new(store),
        }
    }

    /// Runs the pipeline with `at` as the timestamp of every versioned key
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` before any network call when
    /// credentials or mode settings are incomplete. Every other failure is
    /// logged and recorded in the returned summary.
    pub async fn run(&self, at: DateTime<Utc>) -> PipelineResult<RunSummary> {
        self.credentials.validate()?;
        self.resolver.check_config(self.credentials)?;

        info!(
            "Starting {:?} run into bucket {} ({})",
            self.config.mode, self.credentials.bucket_name, self.credentials.region
        );

        let resolved = match self.resolver.resolve(self.credentials, at).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Failed to resolve payloads: {}", e);
                return Ok(RunSummary {
                    payloads: Vec::new(),
                    error: Some(e.to_string()),
                });
            }
        };

        let mut summary = RunSummary::default();
        for entry in resolved {
            let payload_summary = match entry.payload {
                Ok(payload) => self.process(payload, at).await,
                Err(e) => {
                    error!("Error fetching {}: {}", entry.kind, e);
                    PayloadSummary {
                        kind: entry.kind,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            summary.payloads.push(payload_summary);
        }

        if summary.is_success() {
            info!("Run finished: all payloads uploaded");
        } else {
            warn!("Run finished with failures");
        }

        Ok(summary)
    }

    async fn process(&self, payload: Payload, at: DateTime<Utc>) -> PayloadSummary {
        let kind = payload.kind;

        let payload = if kind == ContentKind::Csv && self.config.transform_csv {
            let tag = transform::source_tag(
                self.config.source_tag.as_deref(),
                &self.config.default_source_label,
            );
            match transform::apply(payload, &tag) {
                Ok(payload) => {
                    info!("Added source='{}' column to CSV", tag);
                    payload
                }
                Err(e) => {
                    error!("Error transforming CSV: {}", e);
                    return PayloadSummary {
                        kind,
                        report: None,
                        error: Some(e.to_string()),
                    };
                }
            }
        } else {
            payload
        };

        let keys = self.config.layout.keys_for(kind, at, self.config.targets);
        if keys.is_empty() {
            warn!("No destination keys enabled for {}", kind);
        }

        PayloadSummary {
            kind,
            report: Some(self.writer.write(&payload, &keys).await),
            error: None,
        }
    }
}

/// Uploads one local file to one key
///
/// # Errors
///
/// Returns `PipelineError::Configuration` for an empty key,
/// `PipelineError::NotFound` if the file cannot be read and
/// `PipelineError::Transfer` if the write fails
pub async fn upload_local_file(store: &dyn ObjectStore, path: &Path, key: &str) -> PipelineResult<()> {
    let key = key.trim_start_matches('/');
    if key.trim().is_empty() {
        return Err(PipelineError::Configuration(
            "destination key is empty".to_string(),
        ));
    }

    let body = tokio::fs::read(path).await.map_err(|e| {
        PipelineError::NotFound(format!("cannot read {}: {e}", path.display()))
    })?;

    let content_type = ContentKind::from_path(path)
        .map_or(mime::APPLICATION_OCTET_STREAM, ContentKind::mime);

    match store.put_object(key, body.into(), content_type.as_ref()).await {
        Ok(()) => {
            info!(
                "Uploaded {} to s3://{}/{}",
                path.display(),
                store.bucket(),
                key
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Error uploading {} to s3://{}/{}: {}",
                path.display(),
                store.bucket(),
                key,
                e
            );
            Err(e.into())
        }
    }
}
