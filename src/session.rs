//! The sync run orchestrator.
//!
//! One `Syncer` lives for the process and owns the fetch cache. Runs are
//! strictly serialized: a second `run` while one is in flight fails fast with
//! `SyncInProgress` instead of queueing, because two interleaved
//! reconciliations against the same store corrupt each other's stale sweeps.
//!
//! Per-source and per-location failures degrade into report counters; only a
//! missing proxy, an overlapping run, or an unreachable store abort the run.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::feed::{FeedCache, FeedClient};
use crate::models::{CalendarSource, NormalizedEvent, SyncProgress, SyncReport};
use crate::reconcile::Reconciler;
use crate::scheduler::{self, DesiredEvent};
use crate::store::Store;
use crate::utils::logging;
use crate::{filter, naming, parser};
use chrono::Utc;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct Syncer {
    config: SyncConfig,
    client: FeedClient,
    cache: Mutex<FeedCache>,
    in_progress: AtomicBool,
}

/// Releases the in-progress flag on drop, so every exit path of `run`,
/// including early error returns, unlocks the next run.
#[derive(Debug)]
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Syncer {
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: FeedClient::new()?,
            cache: Mutex::new(FeedCache::new()),
            in_progress: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Drop all cached validators and parsed feeds; the next run refetches
    /// and reparses everything.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    fn begin(&self) -> SyncResult<RunGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(RunGuard {
            flag: &self.in_progress,
        })
    }

    /// Execute one full sync: fetch and parse every configured feed, filter,
    /// route events to their locations, reconcile in batches, then sweep
    /// locations no feed produces anymore.
    pub async fn run<S, F>(
        &self,
        store: &S,
        proxy_base: &str,
        force_refresh: bool,
        observer: &mut F,
    ) -> SyncResult<SyncReport>
    where
        S: Store,
        F: FnMut(SyncProgress),
    {
        let _guard = self.begin()?;
        if proxy_base.trim().is_empty() {
            return Err(SyncError::MissingProxy);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut report = SyncReport::new(started_at);

        let mut desired: Vec<DesiredEvent> = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            for source in &self.config.calendars {
                let source_clock = Instant::now();
                let events = match self
                    .collect_source(&mut cache, proxy_base, source, force_refresh)
                    .await
                {
                    Ok(events) => events,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        logging::log_error_with_context(&e, &source.display_name);
                        report.sources_failed += 1;
                        continue;
                    }
                };
                logging::log_feed_sync(
                    &source.display_name,
                    events.len(),
                    source_clock.elapsed().as_millis() as u64,
                );

                let events =
                    filter::exclude_by_title(events, &self.config.exclusion_patterns).await;
                let events = filter::within_date_window(
                    events,
                    self.config.days_past,
                    self.config.days_future,
                    Utc::now(),
                )
                .await;

                report.events_seen += events.len();
                for event in events {
                    let location = naming::target_location(
                        &self.config.page_prefix,
                        &source.display_name,
                        &event.identity,
                    );
                    desired.push(DesiredEvent {
                        calendar_name: source.display_name.clone(),
                        location,
                        event,
                    });
                }
            }
        }

        let desired_paths = scheduler::desired_locations(&desired);
        let mut reconciler = Reconciler::new(
            store,
            Duration::from_millis(self.config.mutation_delay_ms),
        );

        let (totals, locations_failed) = scheduler::run_batches(
            &mut reconciler,
            desired,
            &self.config.title_prefix,
            self.config.batch_size,
            Duration::from_millis(self.config.batch_delay_ms),
            observer,
        )
        .await;

        report.created = totals.created;
        report.updated = totals.updated;
        report.deleted = totals.deleted;
        report.duplicates = totals.duplicates;
        report.locations_failed = locations_failed;

        // An unlistable store is fatal; individual stale locations failing
        // to purge are not.
        let (swept, sweep_failed) = reconciler
            .sweep_stale_locations(&self.config.page_prefix, &desired_paths)
            .await?;
        report.deleted += swept;
        report.locations_failed += sweep_failed;

        report.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            "Sync done in {}ms: {} seen, {} created, {} updated, {} deleted, {} duplicates, {} source failures, {} location failures",
            report.duration_ms,
            report.events_seen,
            report.created,
            report.updated,
            report.deleted,
            report.duplicates,
            report.sources_failed,
            report.locations_failed,
        );
        Ok(report)
    }

    /// Fetch one source and return its normalized events, reusing the parsed
    /// side cache when the feed content has not changed.
    async fn collect_source(
        &self,
        cache: &mut FeedCache,
        proxy_base: &str,
        source: &CalendarSource,
        force_refresh: bool,
    ) -> SyncResult<Vec<NormalizedEvent>> {
        let outcome = self
            .client
            .fetch(cache, proxy_base, source, force_refresh)
            .await?;

        if !outcome.changed {
            if let Some(events) = cache.parsed_events(&source.feed_url) {
                debug!(
                    "Feed '{}' unchanged, reusing {} parsed events",
                    source.display_name,
                    events.len()
                );
                return Ok(events.to_vec());
            }
        }
        if outcome.content.is_empty() {
            // 304 with no parsed cache to fall back on. Rare; the next full
            // response repopulates it.
            return Ok(Vec::new());
        }

        let events = parser::parse_feed(&outcome.content, &source.display_name).await;
        cache.store_parsed_events(&source.feed_url, events.clone());
        Ok(events)
    }
}
