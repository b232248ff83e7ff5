//! User configuration: feed sources, filters, naming, and pacing knobs.
//!
//! Stored as JSON in the platform config directory. Every field has a default
//! so older config files keep deserializing as fields are added.

use crate::error::{SyncError, SyncResult};
use crate::models::CalendarSource;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Location path prefix all managed records live under.
    pub page_prefix: String,
    /// Optional text prepended to every record headline.
    pub title_prefix: String,
    /// Days before today to include.
    pub days_past: i64,
    /// Days after today to include.
    pub days_future: i64,
    /// Events reconciled per batch.
    pub batch_size: usize,
    /// Pause between batches, in milliseconds.
    pub batch_delay_ms: u64,
    /// Pause after each store mutation, in milliseconds.
    pub mutation_delay_ms: u64,
    /// Case-insensitive regexes; matching titles are dropped.
    pub exclusion_patterns: Vec<String>,
    pub calendars: Vec<CalendarSource>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_prefix: "calendar".to_string(),
            title_prefix: String::new(),
            days_past: 30,
            days_future: 30,
            batch_size: 50,
            batch_delay_ms: 500,
            mutation_delay_ms: 50,
            exclusion_patterns: Vec::new(),
            calendars: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Default on-disk path, under the platform config directory.
    pub fn default_path() -> SyncResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| SyncError::config("Could not determine config directory"))?;
        Ok(base.join("icalsync").join("config.json"))
    }

    /// Load from a JSON file. A missing file yields the defaults; a present
    /// but unreadable or malformed file is an error worth surfacing.
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| SyncError::config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> SyncResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::config(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, raw)
            .map_err(|e| SyncError::config(format!("Failed to write {}: {}", path.display(), e)))?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.page_prefix.trim().is_empty() {
            return Err(SyncError::config("page_prefix cannot be empty"));
        }
        if self.days_past < 0 || self.days_future < 0 {
            return Err(SyncError::config("date window days cannot be negative"));
        }
        if self.batch_size == 0 {
            return Err(SyncError::config("batch_size must be at least 1"));
        }
        for calendar in &self.calendars {
            if calendar.display_name.trim().is_empty() {
                return Err(SyncError::config("calendar display name cannot be empty"));
            }
            validate_feed_url(&calendar.feed_url)?;
        }
        Ok(())
    }
}

/// Validate a feed URL before it is ever fetched: HTTPS only, real host, no
/// local addresses. `webcal://` is common in exported subscribe links and is
/// accepted as an alias for HTTPS.
pub fn validate_feed_url(feed_url: &str) -> SyncResult<()> {
    if feed_url.trim().is_empty() {
        return Err(SyncError::config("Feed URL cannot be empty"));
    }

    let normalized = feed_url
        .strip_prefix("webcal://")
        .map(|rest| format!("https://{}", rest))
        .unwrap_or_else(|| feed_url.to_string());

    let parsed = Url::parse(&normalized)
        .map_err(|e| SyncError::config(format!("Invalid feed URL '{}': {}", feed_url, e)))?;

    if parsed.scheme() != "https" {
        return Err(SyncError::config(format!(
            "Feed URL must use HTTPS, got '{}://'",
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| SyncError::config(format!("Feed URL '{}' has no host", feed_url)))?;

    if host == "localhost"
        || host.starts_with("127.")
        || host.starts_with("192.168.")
        || host.starts_with("10.")
        || host.starts_with("172.16.")
    {
        return Err(SyncError::config(
            "Feed URL cannot point to localhost or local network addresses",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.page_prefix, "calendar");
        assert_eq!(config.days_past, 30);
        assert_eq!(config.days_future, 30);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_delay_ms, 500);
        assert!(config.calendars.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.page_prefix, "calendar");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = SyncConfig::default();
        config.title_prefix = "TODO".to_string();
        config.exclusion_patterns.push("^Busy$".to_string());
        config
            .calendars
            .push(CalendarSource::new("Work", "https://cal.example/feed.ics"));
        config.save(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded.title_prefix, "TODO");
        assert_eq!(loaded.exclusion_patterns, vec!["^Busy$"]);
        assert_eq!(loaded.calendars.len(), 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"title_prefix": "NOW"}"#).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded.title_prefix, "NOW");
        assert_eq!(loaded.batch_size, 50);
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SyncConfig::load(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SyncConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.days_past = -1;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.page_prefix = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.calendars.push(CalendarSource::new("Work", "not-a-url"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_feed_url() {
        assert!(validate_feed_url("https://cal.example/feed.ics").is_ok());
        assert!(validate_feed_url("webcal://cal.example/feed.ics").is_ok());
        assert!(validate_feed_url("http://cal.example/feed.ics").is_err());
        assert!(validate_feed_url("").is_err());
        assert!(validate_feed_url("https://localhost/feed.ics").is_err());
        assert!(validate_feed_url("https://192.168.1.4/feed.ics").is_err());
        assert!(validate_feed_url("cal.example/feed.ics").is_err());
    }
}
