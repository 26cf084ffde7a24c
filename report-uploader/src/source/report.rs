//! Local job reports
//!
//! Triggered runs leave their output descriptor on disk as
//! `phantom_output_<timestamp>.json`; extraction runs pick the newest one and
//! pull the CSV link out of its log text.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::keys::timestamp_token;
use crate::types::{PipelineError, PipelineResult};

/// Where reports live and how to read them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    /// Directory scanned for reports and receiving new descriptors
    pub dir: PathBuf,
    /// File name glob, relative to `dir`
    pub pattern: String,
    /// Top-level key (or JSON pointer when it starts with `/`) holding the text to search
    pub url_field: String,
    /// Domain that hosts the CSV exports; subdomains match too
    pub host_domain: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            pattern: "phantom_output_*.json".to_string(),
            url_field: "output".to_string(),
            host_domain: "phantombooster.com".to_string(),
        }
    }
}

/// A report read from disk
#[derive(Debug, Clone)]
pub struct Report {
    /// File the report was read from
    pub path: PathBuf,
    /// Raw file contents
    pub bytes: Bytes,
    /// Parsed contents
    pub document: Value,
}

/// Finds the most recently modified file matching `pattern` inside `dir`
///
/// # Errors
///
/// Returns `PipelineError::Configuration` for an invalid glob and
/// `PipelineError::NotFound` when nothing matches
pub fn find_latest_report(dir: &Path, pattern: &str) -> PipelineResult<PathBuf> {
    let full_pattern = dir.join(pattern);
    let escaped = Path::new(&glob::Pattern::escape(&dir.to_string_lossy())).join(pattern);
    let entries = glob::glob(&escaped.to_string_lossy()).map_err(|e| {
        PipelineError::Configuration(format!("invalid report pattern {pattern}: {e}"))
    })?;

    let newest = entries
        .filter_map(Result::ok)
        .filter_map(|path| {
            let metadata = std::fs::metadata(&path).ok()?;
            if !metadata.is_file() {
                return None;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, path))
        })
        .max_by(|(a_time, a_path), (b_time, b_path)| {
            a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
        })
        .map(|(_, path)| path);

    newest.ok_or_else(|| {
        PipelineError::NotFound(format!(
            "no report matching {} found",
            full_pattern.display()
        ))
    })
}

/// Reads and parses a report file
///
/// # Errors
///
/// Returns `PipelineError::NotFound` if the file cannot be read and
/// `PipelineError::Parse` if it is not JSON
pub async fn load_report(path: &Path) -> PipelineResult<Report> {
    let raw = tokio::fs::read(path).await.map_err(|e| {
        PipelineError::NotFound(format!("cannot read report {}: {e}", path.display()))
    })?;
    let document: Value = serde_json::from_slice(&raw)?;

    info!("Loaded report: {}", path.display());

    Ok(Report {
        path: path.to_path_buf(),
        bytes: Bytes::from(raw),
        document,
    })
}

/// Builds the regex matching CSV links hosted under `host_domain`
///
/// # Errors
///
/// Returns `PipelineError::Configuration` if the pattern cannot be compiled
pub fn csv_url_pattern(host_domain: &str) -> PipelineResult<Regex> {
    let host = if host_domain.trim().is_empty() {
        r"[A-Za-z0-9.-]+".to_string()
    } else {
        format!(
            r"(?:[A-Za-z0-9-]+\.)*{}",
            regex::escape(host_domain.trim())
        )
    };

    Regex::new(&format!(r#"https?://{host}/[^\s"'<>]*?\.csv\b"#))
        .map_err(|e| PipelineError::Configuration(format!("invalid CSV host pattern: {e}")))
}

/// Extracts the first CSV link from `field` of a report
///
/// # Errors
///
/// Returns `PipelineError::NotFound` if the field is absent or holds no matching link
pub fn extract_csv_url(document: &Value, field: &str, host_domain: &str) -> PipelineResult<String> {
    let value = if field.starts_with('/') {
        document.pointer(field)
    } else {
        document.get(field)
    }
    .filter(|value| !value.is_null())
    .ok_or_else(|| PipelineError::NotFound(format!("report has no `{field}` field")))?;

    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };

    let pattern = csv_url_pattern(host_domain)?;
    let url = pattern
        .find(&text)
        .map(|found| found.as_str().to_string())
        .ok_or_else(|| {
            PipelineError::NotFound(format!(
                "no CSV link on {host_domain} in report field `{field}`"
            ))
        })?;

    debug!("Extracted CSV URL from report: {}", url);
    Ok(url)
}

/// Writes a job output descriptor next to earlier reports
///
/// # Errors
///
/// Returns `PipelineError::Transfer` if the file cannot be written
pub async fn save_descriptor(
    dir: &Path,
    at: DateTime<Utc>,
    descriptor: &Value,
) -> PipelineResult<(PathBuf, Bytes)> {
    let rendered = serde_json::to_vec_pretty(descriptor)?;
    let path = dir.join(format!("phantom_output_{}.json", timestamp_token(at)));

    let write = async {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, &rendered).await
    };
    write.await.map_err(|e| {
        PipelineError::Transfer(format!("cannot write report {}: {e}", path.display()))
    })?;

    info!("Output saved locally as {}", path.display());
    Ok((path, Bytes::from(rendered)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_extracts_exact_csv_url() {
        let report = json!({
            "status": "finished",
            "output": "Scraping done.\nResults saved at https://host.example.com/x/y/result.csv and JSON too.\n"
        });
        assert_eq!(
            extract_csv_url(&report, "output", "example.com").unwrap(),
            "https://host.example.com/x/y/result.csv"
        );
    }

    #[test]
    fn test_first_link_wins_and_other_hosts_ignored() {
        let report = json!({
            "output": "mirror https://evil.test/a.csv then https://cache1.example.com/a/first.csv, https://cache1.example.com/b/second.csv"
        });
        assert_eq!(
            extract_csv_url(&report, "output", "example.com").unwrap(),
            "https://cache1.example.com/a/first.csv"
        );
    }

    #[test]
    fn test_missing_link_is_not_found() {
        let report = json!({ "output": "https://host.example.com/x/y/result.json" });
        let err = extract_csv_url(&report, "output", "example.com").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let err = extract_csv_url(&json!({ "status": "running" }), "output", "example.com")
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));

        let err = extract_csv_url(&json!({ "output": null }), "output", "example.com").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[test]
    fn test_pointer_fields_and_nested_values() {
        let report = json!({
            "container": { "log": ["start", "file: https://s3.example.com/r.csv"] }
        });
        assert_eq!(
            extract_csv_url(&report, "/container/log", "example.com").unwrap(),
            "https://s3.example.com/r.csv"
        );
    }

    #[test]
    fn test_domain_is_escaped() {
        let report = json!({ "output": "https://hostXexampleYcom/r.csv" });
        assert!(extract_csv_url(&report, "output", "host.example.com").is_err());
    }

    #[test]
    fn test_latest_report_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("phantom_output_a.json");
        let newer = dir.path().join("phantom_output_b.json");
        std::fs::write(&newer, "{}").unwrap();
        std::fs::write(&older, "{}").unwrap();
        std::fs::write(dir.path().join("unrelated.json"), "{}").unwrap();

        let past = SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(
            find_latest_report(dir.path(), "phantom_output_*.json").unwrap(),
            newer
        );
    }

    #[test]
    fn test_report_dir_with_glob_characters() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("runs[1]*?");
        std::fs::create_dir(&dir).unwrap();
        let report = dir.join("phantom_output_a.json");
        std::fs::write(&report, "{}").unwrap();

        assert_eq!(
            find_latest_report(&dir, "phantom_output_*.json").unwrap(),
            report
        );
    }

    #[test]
    fn test_no_report_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_latest_report(dir.path(), "phantom_output_*.json").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_saved_descriptor_is_found_and_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let descriptor = json!({ "output": "https://a.example.com/out.csv" });

        let (path, bytes) = save_descriptor(dir.path(), at, &descriptor).await.unwrap();
        assert!(path.ends_with("phantom_output_2024-01-02_03-04-05.json"));

        let found = find_latest_report(dir.path(), "phantom_output_*.json").unwrap();
        let report = load_report(&found).await.unwrap();
        assert_eq!(report.bytes, bytes);
        assert_eq!(report.document, descriptor);
    }

    #[tokio::test]
    async fn test_malformed_report_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phantom_output_bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = load_report(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }
}
