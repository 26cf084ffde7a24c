//! Environment configuration for different deployment stages

use std::env;
use std::time::Duration;

use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion, Region};
use aws_credential_types::Credentials;

use crate::credentials::CredentialSet;
use crate::types::{PipelineError, PipelineResult};

/// Default HTTP client timeout for downloads and job API calls
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (uses `LocalStack`)
    Development,
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if `APP_ENV` contains an invalid value
    pub fn from_env() -> PipelineResult<Self> {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "production".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            _ => Err(PipelineError::Configuration(format!(
                "Invalid environment: {env}"
            ))),
        }
    }

    /// Whether logs should be emitted as JSON
    #[must_use]
    pub const fn json_logs(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }

    /// Endpoint used when no explicit AWS endpoint is configured
    #[must_use]
    pub fn default_aws_endpoint_url(&self) -> Option<String> {
        match self {
            Self::Production | Self::Staging => None,
            Self::Development => Some("http://localhost:4566".to_string()),
        }
    }
}

/// Deployment settings, read once at start-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Deployment stage from `APP_ENV`
    pub environment: Environment,
    /// Explicit `AWS_ENDPOINT_URL`, if any
    pub aws_endpoint_url: Option<String>,
    /// Timeout applied to every HTTP request made by the resolver
    pub http_timeout: Duration,
}

impl Settings {
    /// Reads `APP_ENV`, `AWS_ENDPOINT_URL` and `HTTP_TIMEOUT_SECS`
    ///
    /// An unparseable timeout falls back to the default.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if `APP_ENV` contains an invalid value
    pub fn from_env() -> PipelineResult<Self> {
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let secs = env::var("HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Ok(Self {
            environment: Environment::from_env()?,
            aws_endpoint_url,
            http_timeout: Duration::from_secs(secs),
        })
    }

    /// Returns the endpoint URL to use for AWS services
    ///
    /// `AWS_ENDPOINT_URL` wins in every environment; development falls back to `LocalStack`.
    #[must_use]
    pub fn override_aws_endpoint_url(&self) -> Option<String> {
        self.aws_endpoint_url
            .clone()
            .or_else(|| self.environment.default_aws_endpoint_url())
    }

    /// AWS configuration built from an explicit credential set
    ///
    /// SDK retries are disabled: a failed write is reported, never retried.
    pub async fn aws_config(&self, credentials: &CredentialSet) -> aws_config::SdkConfig {
        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(120))
            .build();

        let static_credentials = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            "report-uploader",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(static_credentials)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeout_config);

        if let Some(endpoint_url) = self.override_aws_endpoint_url() {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader.load().await
    }

    /// AWS S3 service configuration
    pub async fn s3_client_config(&self, credentials: &CredentialSet) -> aws_sdk_s3::Config {
        let aws_config = self.aws_config(credentials).await;
        let s3_config: aws_sdk_s3::Config = (&aws_config).into();
        let mut builder = s3_config.to_builder();

        // Override "force path style" to true for compatibility with LocalStack
        // https://github.com/awslabs/aws-sdk-rust/discussions/874
        if self.override_aws_endpoint_url().is_some() {
            builder.set_force_path_style(Some(true));
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn settings(environment: Environment, aws_endpoint_url: Option<&str>) -> Settings {
        Settings {
            environment,
            aws_endpoint_url: aws_endpoint_url.map(str::to_string),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    #[test]
    #[serial]
    fn test_environment_from_env() {
        env::remove_var("APP_ENV");
        assert_eq!(Environment::from_env().unwrap(), Environment::Production);

        env::set_var("APP_ENV", "Development ");
        assert_eq!(Environment::from_env().unwrap(), Environment::Development);

        env::set_var("APP_ENV", "staging");
        assert_eq!(Environment::from_env().unwrap(), Environment::Staging);

        env::remove_var("APP_ENV");
    }

    #[test]
    #[serial]
    fn test_invalid_environment_is_configuration_error() {
        env::set_var("APP_ENV", "invalid");

        let err = Environment::from_env().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Configuration error: Invalid environment: invalid");
        assert!(Settings::from_env().is_err());

        env::remove_var("APP_ENV");
    }

    #[test]
    fn test_endpoint_override() {
        assert_eq!(
            settings(Environment::Production, None).override_aws_endpoint_url(),
            None
        );
        assert_eq!(
            settings(Environment::Development, None)
                .override_aws_endpoint_url()
                .as_deref(),
            Some("http://localhost:4566")
        );
        assert_eq!(
            settings(Environment::Production, Some("http://minio:9000"))
                .override_aws_endpoint_url()
                .as_deref(),
            Some("http://minio:9000")
        );
    }

    #[test]
    #[serial]
    fn test_settings_read_once() {
        env::set_var("APP_ENV", "staging");
        env::set_var("AWS_ENDPOINT_URL", "http://minio:9000");
        env::set_var("HTTP_TIMEOUT_SECS", "5");

        let settings = Settings::from_env().unwrap();

        env::remove_var("AWS_ENDPOINT_URL");
        env::set_var("HTTP_TIMEOUT_SECS", "90");
        assert_eq!(settings.environment, Environment::Staging);
        assert_eq!(settings.http_timeout, Duration::from_secs(5));
        assert_eq!(
            settings.override_aws_endpoint_url().as_deref(),
            Some("http://minio:9000")
        );

        env::set_var("HTTP_TIMEOUT_SECS", "soon");
        env::set_var("AWS_ENDPOINT_URL", "  ");
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.http_timeout, Duration::from_secs(60));
        assert_eq!(settings.aws_endpoint_url, None);

        env::remove_var("APP_ENV");
        env::remove_var("AWS_ENDPOINT_URL");
        env::remove_var("HTTP_TIMEOUT_SECS");
    }
}
