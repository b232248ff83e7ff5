use crate::models::NormalizedEvent;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Conditional-request state for one feed URL.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_hash: Option<u64>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// In-memory fetch cache, keyed by feed URL. Holds conditional-request
/// validators plus a side cache of the last parsed events per feed, so a
/// not-modified response never forces a reparse. Lives for the process;
/// resetting on restart is acceptable.
#[derive(Debug, Default)]
pub struct FeedCache {
    entries: HashMap<String, CacheEntry>,
    parsed: HashMap<String, Vec<NormalizedEvent>>,
}

impl FeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    pub fn entry_mut(&mut self, url: &str) -> &mut CacheEntry {
        self.entries.entry(url.to_string()).or_default()
    }

    pub fn parsed_events(&self, url: &str) -> Option<&[NormalizedEvent]> {
        self.parsed.get(url).map(Vec::as_slice)
    }

    pub fn store_parsed_events(&mut self, url: &str, events: Vec<NormalizedEvent>) {
        self.parsed.insert(url.to_string(), events);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.parsed.clear();
    }
}
