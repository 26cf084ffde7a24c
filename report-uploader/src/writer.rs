//! Destination writer
//!
//! Every key is attempted even when an earlier one failed; the report
//! carries the outcome of each and the run fails if any write did.

use std::fmt;

use tracing::{debug, error, info};

use crate::source::Payload;
use crate::storage::ObjectStore;

/// Lifecycle of one destination write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// Not attempted yet
    Pending,
    /// Write in flight
    Uploading,
    /// Write acknowledged by the store
    Uploaded,
    /// Write rejected; terminal, never retried
    Failed(String),
}

impl UploadState {
    /// Whether no further transition can happen
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Uploaded | Self::Failed(_))
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Uploading => f.write_str("uploading"),
            Self::Uploaded => f.write_str("uploaded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Final state of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOutcome {
    /// Destination key
    pub key: String,
    /// Terminal state reached
    pub state: UploadState,
}

/// Outcomes of writing one payload to all of its keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// One entry per key, in write order
    pub outcomes: Vec<KeyOutcome>,
}

impl WriteReport {
    /// Keys that were written
    pub fn uploaded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.state == UploadState::Uploaded)
            .map(|outcome| outcome.key.as_str())
    }

    /// Keys that failed, with the reason
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match &outcome.state {
            UploadState::Failed(reason) => Some((outcome.key.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// True when every key was written
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|outcome| outcome.state == UploadState::Uploaded)
    }
}

/// Writes payloads to their destination keys, one after the other
pub struct DestinationWriter<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> DestinationWriter<'a> {
    /// Creates a writer over `store`
    #[must_use]
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Writes `payload` to each key; a failed key does not stop the others
    pub async fn write(&self, payload: &Payload, keys: &[String]) -> WriteReport {
        let bucket = self.store.bucket();
        let content_type = payload.kind.mime();
        let mut outcomes = Vec::with_capacity(keys.len());

        for key in keys {
            let mut state = UploadState::Pending;
            debug!("s3://{}/{} is {}", bucket, key, state);

            state = UploadState::Uploading;
            debug!("s3://{}/{} is {}", bucket, key, state);

            state = match self
                .store
                .put_object(key, payload.bytes.clone(), content_type.as_ref())
                .await
            {
                Ok(()) => {
                    info!(
                        "Uploaded {} from {} to s3://{}/{}",
                        payload.kind, payload.source, bucket, key
                    );
                    UploadState::Uploaded
                }
                Err(e) => {
                    error!(
                        "Error uploading {} from {} to s3://{}/{}: {}",
                        payload.kind, payload.source, bucket, key, e
                    );
                    UploadState::Failed(e.to_string())
                }
            };

            outcomes.push(KeyOutcome {
                key: key.clone(),
                state,
            });
        }

        WriteReport { outcomes }
    }
}
