//! Run configuration, read once from the environment at start-up

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::keys::{KeyLayout, KeyTargets};
use crate::source::{LaunchConfig, ReportConfig, SourceMode};
use crate::types::PipelineResult;

/// Label used when `DATA_SOURCE` is unset
pub const DEFAULT_SOURCE_LABEL: &str = "unknown";

/// Everything a run needs besides credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// How payloads are found
    pub mode: SourceMode,
    /// CSV location in direct mode
    pub csv_url: Option<String>,
    /// JSON location in direct mode
    pub json_url: Option<String>,
    /// Value of the appended `source` column
    pub source_tag: Option<String>,
    /// Fallback when `source_tag` is unset or blank
    pub default_source_label: String,
    /// Whether CSV payloads get the `source` column
    pub transform_csv: bool,
    /// Key prefix and category
    pub layout: KeyLayout,
    /// Versioned and/or latest keys
    pub targets: KeyTargets,
    /// Local report handling
    pub report: ReportConfig,
    /// Remote job handling
    pub launch: LaunchConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Direct,
            csv_url: None,
            json_url: None,
            source_tag: None,
            default_source_label: DEFAULT_SOURCE_LABEL.to_string(),
            transform_csv: true,
            layout: KeyLayout::default(),
            targets: KeyTargets::default(),
            report: ReportConfig::default(),
            launch: LaunchConfig::default(),
        }
    }
}

impl RunConfig {
    /// Reads the configuration from environment variables
    ///
    /// Unparseable numbers and booleans fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` for an unknown `SOURCE_MODE`
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();
        let report_defaults = defaults.report;
        let launch_defaults = defaults.launch;

        Ok(Self {
            mode: env::var("SOURCE_MODE").unwrap_or_default().parse()?,
            csv_url: optional("CSV_URL"),
            json_url: optional("JSON_URL"),
            source_tag: optional("DATA_SOURCE"),
            default_source_label: string_or("DEFAULT_SOURCE_LABEL", defaults.default_source_label),
            transform_csv: flag_or("TRANSFORM_CSV", defaults.transform_csv),
            layout: KeyLayout::new(
                string_or("S3_KEY_PREFIX", defaults.layout.prefix),
                string_or("S3_KEY_CATEGORY", defaults.layout.category),
            ),
            targets: KeyTargets {
                versioned: flag_or("WRITE_VERSIONED", defaults.targets.versioned),
                latest: flag_or("WRITE_LATEST", defaults.targets.latest),
            },
            report: ReportConfig {
                dir: optional("REPORT_DIR").map_or(report_defaults.dir, PathBuf::from),
                pattern: string_or("REPORT_GLOB", report_defaults.pattern),
                url_field: string_or("REPORT_URL_FIELD", report_defaults.url_field),
                host_domain: string_or("CSV_HOST_DOMAIN", report_defaults.host_domain),
            },
            launch: LaunchConfig {
                api_base_url: string_or("PHANTOM_API_BASE_URL", launch_defaults.api_base_url),
                download_url_pointer: string_or(
                    "DOWNLOAD_URL_POINTER",
                    launch_defaults.download_url_pointer,
                ),
                launch_attempts: number_or("LAUNCH_ATTEMPTS", launch_defaults.launch_attempts),
                launch_retry_delay: secs_or(
                    "LAUNCH_RETRY_DELAY_SECS",
                    launch_defaults.launch_retry_delay,
                ),
                fetch_attempts: number_or("FETCH_OUTPUT_ATTEMPTS", launch_defaults.fetch_attempts),
                fetch_delay: secs_or("FETCH_OUTPUT_DELAY_SECS", launch_defaults.fetch_delay),
            },
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn string_or(name: &str, default: String) -> String {
    optional(name).unwrap_or(default)
}

fn flag_or(name: &str, default: bool) -> bool {
    optional(name).map_or(default, |value| {
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        }
    })
}

fn number_or(name: &str, default: u32) -> u32 {
    optional(name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_or(name: &str, default: Duration) -> Duration {
    optional(name)
        .and_then(|value| value.trim().parse().ok())
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SOURCE_MODE",
        "CSV_URL",
        "JSON_URL",
        "DATA_SOURCE",
        "DEFAULT_SOURCE_LABEL",
        "TRANSFORM_CSV",
        "S3_KEY_PREFIX",
        "S3_KEY_CATEGORY",
        "WRITE_VERSIONED",
        "WRITE_LATEST",
        "REPORT_DIR",
        "REPORT_GLOB",
        "REPORT_URL_FIELD",
        "CSV_HOST_DOMAIN",
        "PHANTOM_API_BASE_URL",
        "DOWNLOAD_URL_POINTER",
        "LAUNCH_ATTEMPTS",
        "LAUNCH_RETRY_DELAY_SECS",
        "FETCH_OUTPUT_ATTEMPTS",
        "FETCH_OUTPUT_DELAY_SECS",
    ];

    fn clear() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        assert_eq!(RunConfig::from_env().unwrap(), RunConfig::default());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear();
        env::set_var("SOURCE_MODE", "trigger");
        env::set_var("CSV_URL", "https://x/r.csv");
        env::set_var("DATA_SOURCE", "LinkedIn");
        env::set_var("TRANSFORM_CSV", "false");
        env::set_var("S3_KEY_PREFIX", "exports");
        env::set_var("WRITE_VERSIONED", "no");
        env::set_var("REPORT_DIR", "/tmp/reports");
        env::set_var("FETCH_OUTPUT_ATTEMPTS", "30");
        env::set_var("FETCH_OUTPUT_DELAY_SECS", "20");
        env::set_var("LAUNCH_ATTEMPTS", "many");

        let config = RunConfig::from_env().unwrap();
        assert_eq!(config.mode, SourceMode::Trigger);
        assert_eq!(config.csv_url.as_deref(), Some("https://x/r.csv"));
        assert_eq!(config.json_url, None);
        assert_eq!(config.source_tag.as_deref(), Some("LinkedIn"));
        assert!(!config.transform_csv);
        assert_eq!(config.layout, KeyLayout::new("exports", "data"));
        assert!(!config.targets.versioned);
        assert!(config.targets.latest);
        assert_eq!(config.report.dir, PathBuf::from("/tmp/reports"));
        assert_eq!(config.launch.fetch_attempts, 30);
        assert_eq!(config.launch.fetch_delay, Duration::from_secs(20));
        assert_eq!(config.launch.launch_attempts, 1);

        clear();
    }

    #[test]
    #[serial]
    fn test_unknown_mode_is_configuration_error() {
        clear();
        env::set_var("SOURCE_MODE", "poll");
        assert!(RunConfig::from_env().unwrap_err().is_fatal());
        clear();
    }

    #[test]
    #[serial]
    fn test_blank_url_is_unset() {
        clear();
        env::set_var("JSON_URL", "   ");
        assert_eq!(RunConfig::from_env().unwrap().json_url, None);
        clear();
    }
}
