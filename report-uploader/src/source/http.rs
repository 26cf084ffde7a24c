//! HTTP download of payloads

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_tracing::TracingMiddleware;
use tracing::{debug, info};

use super::{ContentKind, Payload};
use crate::types::{PipelineError, PipelineResult};

/// Downloads a payload from a URL
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    /// Fetches the body at `url`
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Transfer` on network failure or a non-success status
    async fn fetch(&self, url: &str, kind: ContentKind) -> PipelineResult<Payload>;
}

/// Builds the traced HTTP client shared by the fetcher and the job launcher
///
/// # Errors
///
/// Returns `PipelineError::Configuration` if the client cannot be built
pub fn http_client(timeout: Duration) -> PipelineResult<ClientWithMiddleware> {
    let reqwest_client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Configuration(format!("Failed to create HTTP client: {e}")))?;

    Ok(ClientBuilder::new(reqwest_client)
        .with(TracingMiddleware::default())
        .build())
}

/// [`PayloadFetcher`] backed by `reqwest`
#[derive(Clone)]
pub struct HttpFetcher {
    http_client: ClientWithMiddleware,
}

impl HttpFetcher {
    /// Creates a fetcher on top of an existing client
    #[must_use]
    pub const fn new(http_client: ClientWithMiddleware) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl PayloadFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, kind: ContentKind) -> PipelineResult<Payload> {
        info!("Downloading {} from: {}", kind, url);

        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Transfer(format!(
                "GET {url} returned HTTP {status}"
            )));
        }

        let bytes = response.bytes().await?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url);

        Ok(Payload::new(kind, bytes, url))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! In-memory fetcher that records every URL it is asked for

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::{ContentKind, Payload, PayloadFetcher};
    use crate::types::{PipelineError, PipelineResult};

    /// Serves canned bodies; unknown URLs fail like a 404
    #[derive(Default)]
    pub struct MockFetcher {
        bodies: HashMap<String, Bytes>,
        requested: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        /// Creates a fetcher with no bodies
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Registers the body served for `url`
        #[must_use]
        pub fn with_body(mut self, url: &str, body: impl Into<Bytes>) -> Self {
            self.bodies.insert(url.to_string(), body.into());
            self
        }

        /// URLs requested so far, in order
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PayloadFetcher for MockFetcher {
        async fn fetch(&self, url: &str, kind: ContentKind) -> PipelineResult<Payload> {
            self.requested.lock().unwrap().push(url.to_string());
            self.bodies
                .get(url)
                .map(|body| Payload::new(kind, body.clone(), url))
                .ok_or_else(|| PipelineError::Transfer(format!("GET {url} returned HTTP 404")))
        }
    }
}
