//! Feed fetching over HTTP, always through the host's forwarding proxy.
//!
//! Every request carries the conditional headers we have validators for, and
//! every full response is additionally content-hashed: plenty of origins
//! ignore `If-None-Match` yet keep serving identical bytes, and the hash
//! comparison catches those.

use crate::error::{SyncError, SyncResult};
use crate::models::CalendarSource;
use crate::utils::fnv1a_64;
use chrono::Utc;
use log::{debug, info};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use std::time::Duration;

pub mod cache;

pub use cache::{CacheEntry, FeedCache};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("icalsync/", env!("CARGO_PKG_VERSION"));

/// Result of one fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Raw feed text. Empty when the response was a not-modified
    /// short-circuit; consult the parsed-events side cache instead.
    pub content: String,
    /// Whether the feed content differs from the previous fetch.
    pub changed: bool,
    /// True when the origin answered 304 and no body was transferred.
    pub from_cache: bool,
}

pub struct FeedClient {
    client: reqwest::Client,
}

/// `<proxy base without trailing slash>/<feed url>`, the forwarding
/// convention the host proxy expects.
fn compose_proxy_url(proxy_base: &str, feed_url: &str) -> String {
    format!("{}/{}", proxy_base.trim_end_matches('/'), feed_url)
}

impl FeedClient {
    pub fn new() -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch one feed. The proxy base address comes from the host at call
    /// time; its absence is a precondition failure for this component only.
    pub async fn fetch(
        &self,
        cache: &mut FeedCache,
        proxy_base: &str,
        source: &CalendarSource,
        force_refresh: bool,
    ) -> SyncResult<FetchOutcome> {
        if proxy_base.trim().is_empty() {
            return Err(SyncError::MissingProxy);
        }

        let url = &source.feed_url;
        let request_url = compose_proxy_url(proxy_base, url);

        let mut request = self.client.get(&request_url);
        if !force_refresh {
            if let Some(entry) = cache.entry(url) {
                if let Some(etag) = &entry.etag {
                    request = request.header(IF_NONE_MATCH, etag);
                }
                if let Some(last_modified) = &entry.last_modified {
                    request = request.header(IF_MODIFIED_SINCE, last_modified);
                }
            }
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!("Feed '{}' not modified (304)", source.display_name);
            cache.entry_mut(url).fetched_at = Some(Utc::now());
            return Ok(FetchOutcome {
                content: String::new(),
                changed: false,
                from_cache: true,
            });
        }

        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: url.clone(),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let content = response.text().await?;

        // Catch browser-URL mistakes early: an HTML page is never a feed.
        if content.trim_start().starts_with("<!DOCTYPE") || content.trim_start().starts_with("<html")
        {
            return Err(SyncError::feed_parse(format!(
                "'{}' returned HTML instead of a calendar feed; use the iCal export address",
                source.display_name
            )));
        }

        let hash = fnv1a_64(&content);
        let previous_hash = cache.entry(url).and_then(|e| e.content_hash);
        let changed = force_refresh || previous_hash != Some(hash);

        let entry = cache.entry_mut(url);
        entry.etag = etag;
        entry.last_modified = last_modified;
        entry.content_hash = Some(hash);
        entry.fetched_at = Some(Utc::now());

        info!(
            "Fetched {} bytes from '{}' (changed: {})",
            content.len(),
            source.display_name,
            changed
        );

        Ok(FetchOutcome {
            content,
            changed,
            from_cache: false,
        })
    }
}
