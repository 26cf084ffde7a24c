//! Destination key layout

use chrono::{DateTime, Utc};

use crate::source::ContentKind;

/// UTC timestamp format embedded in versioned keys
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Renders the timestamp token used by versioned keys and report files
#[must_use]
pub fn timestamp_token(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Which keys a payload is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTargets {
    /// Write `result_<timestamp>.<ext>`
    pub versioned: bool,
    /// Write `latest.<ext>`
    pub latest: bool,
}

impl Default for KeyTargets {
    fn default() -> Self {
        Self {
            versioned: true,
            latest: true,
        }
    }
}

/// `{prefix}/{category}/{file}` key builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    /// Leading path segment, e.g. `phantombuster`
    pub prefix: String,
    /// Second path segment, e.g. `data`
    pub category: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            prefix: "phantombuster".to_string(),
            category: "data".to_string(),
        }
    }
}

impl KeyLayout {
    /// Creates a layout; empty segments are skipped when joining
    #[must_use]
    pub fn new(prefix: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            category: category.into(),
        }
    }

    /// Key unique to the second the run started in
    #[must_use]
    pub fn versioned(&self, kind: ContentKind, at: DateTime<Utc>) -> String {
        self.join(&format!(
            "result_{}.{}",
            timestamp_token(at),
            kind.extension()
        ))
    }

    /// Key overwritten by every run
    #[must_use]
    pub fn latest(&self, kind: ContentKind) -> String {
        self.join(&format!("latest.{}", kind.extension()))
    }

    /// All keys selected by `targets`, versioned first
    #[must_use]
    pub fn keys_for(&self, kind: ContentKind, at: DateTime<Utc>, targets: KeyTargets) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if targets.versioned {
            keys.push(self.versioned(kind, at));
        }
        if targets.latest {
            keys.push(self.latest(kind));
        }
        keys
    }

    fn join(&self, file: &str) -> String {
        [self.prefix.as_str(), self.category.as_str(), file]
            .iter()
            .map(|segment| segment.trim_matches('/'))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, secs).unwrap()
    }

    #[test]
    fn test_key_shapes() {
        let layout = KeyLayout::default();
        assert_eq!(
            layout.versioned(ContentKind::Csv, at(7)),
            "phantombuster/data/result_2024-03-09_14-05-07.csv"
        );
        assert_eq!(
            layout.latest(ContentKind::Json),
            "phantombuster/data/latest.json"
        );
    }

    #[test]
    fn test_distinct_seconds_give_distinct_keys() {
        let layout = KeyLayout::default();
        assert_ne!(
            layout.versioned(ContentKind::Csv, at(1)),
            layout.versioned(ContentKind::Csv, at(2))
        );
    }

    #[test]
    fn test_same_second_collides() {
        let layout = KeyLayout::default();
        let first = at(3) + chrono::Duration::milliseconds(10);
        let second = at(3) + chrono::Duration::milliseconds(900);
        assert_eq!(
            layout.versioned(ContentKind::Json, first),
            layout.versioned(ContentKind::Json, second)
        );
    }

    #[test]
    fn test_versioned_and_latest_never_overlap() {
        let layout = KeyLayout::default();
        let keys = layout.keys_for(ContentKind::Csv, at(0), KeyTargets::default());
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }

    #[test]
    fn test_targets_and_empty_segments() {
        let layout = KeyLayout::new("/exports/", "");
        let keys = layout.keys_for(
            ContentKind::Csv,
            at(0),
            KeyTargets {
                versioned: false,
                latest: true,
            },
        );
        assert_eq!(keys, vec!["exports/latest.csv".to_string()]);

        let none = layout.keys_for(
            ContentKind::Csv,
            at(0),
            KeyTargets {
                versioned: false,
                latest: false,
            },
        );
        assert!(none.is_empty());
    }
}
