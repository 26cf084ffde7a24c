//! Remote job launch for triggered runs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::types::{PipelineError, PipelineResult};

/// Header carrying the automation service API key
pub const API_KEY_HEADER: &str = "X-Phantombuster-Key-1";

/// Settings for launching a job and reading its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Base URL of the automation service API
    pub api_base_url: String,
    /// JSON pointer to the CSV download link inside the output descriptor
    pub download_url_pointer: String,
    /// Launch attempts when the API answers 429; 1 disables retrying
    pub launch_attempts: u32,
    /// Wait before the first launch retry, doubled after each one
    pub launch_retry_delay: Duration,
    /// Output fetches while the job has not produced output; 1 disables polling
    pub fetch_attempts: u32,
    /// Wait between output fetches
    pub fetch_delay: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.phantombuster.com/api/v2".to_string(),
            download_url_pointer: "/csvURL".to_string(),
            launch_attempts: 1,
            launch_retry_delay: Duration::from_secs(10),
            fetch_attempts: 1,
            fetch_delay: Duration::from_secs(20),
        }
    }
}

/// Result of one launch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The job started in the given container
    Started(String),
    /// The API refused the launch with HTTP 429
    RateLimited,
}

/// Starts remote jobs and reads their output descriptors
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Starts `agent_id`
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Transfer` on network failure or an unexpected status
    async fn launch(&self, api_key: &str, agent_id: &str) -> PipelineResult<LaunchOutcome>;

    /// Reads the output descriptor of a container
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Transfer` on network failure or a non-success status
    async fn fetch_output(&self, api_key: &str, container_id: &str) -> PipelineResult<Value>;
}

#[derive(Serialize)]
struct LaunchRequest<'a> {
    id: &'a str,
}

/// [`JobLauncher`] talking to the `PhantomBuster` v2 API
#[derive(Clone)]
pub struct PhantomLauncher {
    http_client: ClientWithMiddleware,
    api_base_url: String,
}

impl PhantomLauncher {
    /// Creates a launcher for the API at `api_base_url`
    #[must_use]
    pub fn new(http_client: ClientWithMiddleware, api_base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl JobLauncher for PhantomLauncher {
    async fn launch(&self, api_key: &str, agent_id: &str) -> PipelineResult<LaunchOutcome> {
        let url = format!("{}/agents/launch", self.api_base_url);
        let response = self
            .http_client
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(&LaunchRequest { id: agent_id })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(LaunchOutcome::RateLimited);
        }
        if !status.is_success() {
            return Err(PipelineError::Transfer(format!(
                "agent launch returned HTTP {status}"
            )));
        }

        let body: Value = serde_json::from_slice(&response.bytes().await?)?;
        container_id(&body).map(LaunchOutcome::Started)
    }

    async fn fetch_output(&self, api_key: &str, container_id: &str) -> PipelineResult<Value> {
        let url = format!("{}/containers/fetch-output", self.api_base_url);
        let response = self
            .http_client
            .get(url)
            .query(&[("id", container_id)])
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Transfer(format!(
                "output fetch for container {container_id} returned HTTP {status}"
            )));
        }

        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

/// Reads `containerId` from a launch response; the API has sent both strings and numbers
fn container_id(body: &Value) -> PipelineResult<String> {
    match body.get("containerId") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(PipelineError::NotFound(
            "launch response has no containerId".to_string(),
        )),
    }
}

/// Launches a job, retrying on HTTP 429 with a doubling delay
///
/// # Errors
///
/// Returns `PipelineError::Transfer` when every attempt was rate limited,
/// or the first non-429 failure
pub async fn launch_with_retry(
    launcher: &dyn JobLauncher,
    api_key: &str,
    agent_id: &str,
    config: &LaunchConfig,
) -> PipelineResult<String> {
    let attempts = config.launch_attempts.max(1);
    let mut delay = config.launch_retry_delay;

    info!("Launching agent with ID: {}", agent_id);

    for attempt in 1..=attempts {
        match launcher.launch(api_key, agent_id).await? {
            LaunchOutcome::Started(container_id) => {
                info!("Launched agent, container ID: {}", container_id);
                return Ok(container_id);
            }
            LaunchOutcome::RateLimited if attempt < attempts => {
                warn!(
                    "Rate limit hit. Retrying in {}s... ({}/{})",
                    delay.as_secs(),
                    attempt,
                    attempts
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            LaunchOutcome::RateLimited => {}
        }
    }

    Err(PipelineError::Transfer(format!(
        "agent launch rate limited after {attempts} attempt(s)"
    )))
}

/// Fetches a container's output descriptor
///
/// With a single attempt the first descriptor is returned as is. With more,
/// fetching repeats while its `output` is null.
///
/// # Errors
///
/// Returns `PipelineError::NotFound` if output is still null after the last attempt
pub async fn await_output(
    launcher: &dyn JobLauncher,
    api_key: &str,
    container_id: &str,
    config: &LaunchConfig,
) -> PipelineResult<Value> {
    let attempts = config.fetch_attempts.max(1);

    for attempt in 1..=attempts {
        let descriptor = launcher.fetch_output(api_key, container_id).await?;
        let ready = !matches!(descriptor.get("output"), Some(Value::Null));

        if ready || attempts == 1 {
            return Ok(descriptor);
        }

        if attempt < attempts {
            info!(
                "Output empty, retrying in {}s... ({}/{})",
                config.fetch_delay.as_secs(),
                attempt,
                attempts
            );
            tokio::time::sleep(config.fetch_delay).await;
        }
    }

    Err(PipelineError::NotFound(format!(
        "output of container {container_id} not ready after {attempts} attempts"
    )))
}

/// Reads the CSV download link from an output descriptor
///
/// # Errors
///
/// Returns `PipelineError::NotFound` if the pointer does not resolve to a non-empty string
pub fn download_url(descriptor: &Value, pointer: &str) -> PipelineResult<String> {
    descriptor
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::NotFound(format!("job output has no download URL at {pointer}"))
        })
}

#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    //! Scripted launcher

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{JobLauncher, LaunchOutcome};
    use crate::types::{PipelineError, PipelineResult};

    /// Replays queued launch outcomes and descriptors
    #[derive(Default)]
    pub struct MockLauncher {
        launches: Mutex<VecDeque<LaunchOutcome>>,
        outputs: Mutex<VecDeque<Value>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockLauncher {
        /// Creates a launcher with nothing queued
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues the next launch outcome
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn with_launch(self, outcome: LaunchOutcome) -> Self {
            self.launches.lock().unwrap().push_back(outcome);
            self
        }

        /// Queues the next output descriptor
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn with_output(self, descriptor: Value) -> Self {
            self.outputs.lock().unwrap().push_back(descriptor);
            self
        }

        /// Calls made so far, as `launch:<agent>` or `fetch:<container>`
        ///
        /// # Panics
        ///
        /// Panics if the lock is poisoned
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobLauncher for MockLauncher {
        async fn launch(&self, _api_key: &str, agent_id: &str) -> PipelineResult<LaunchOutcome> {
            self.calls.lock().unwrap().push(format!("launch:{agent_id}"));
            self.launches
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| PipelineError::Transfer("no launch scripted".to_string()))
        }

        async fn fetch_output(&self, _api_key: &str, container_id: &str) -> PipelineResult<Value> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("fetch:{container_id}"));
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| PipelineError::Transfer("no output scripted".to_string()))
        }
    }
}
