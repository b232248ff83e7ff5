//! The reconciliation engine.
//!
//! Per target location: read the existing records once, key them by the
//! `ical-id` property recovered from their text, then walk the desired events
//! and emit the minimal create/update/delete set. The `ical-id` property is
//! the only durable link between a stored record and its feed event; root
//! headlines legitimately change across runs (date formatting, title edits,
//! prefix changes) and store node ids are ephemeral.
//!
//! Child property blocks are reconciled by their leading `key::` token:
//! changed values are updated, missing keys are created, and keys no longer
//! desired are left in place. That last part reproduces the historical
//! behavior existing data relies on - an event that drops its location keeps
//! the stale `ical-location` block indefinitely.

use crate::models::NormalizedEvent;
use crate::render::{self, RecordContent, PROP_ID};
use crate::store::{BlockNode, NewBlock, Store, StoreError};
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use crate::utils::Yielder;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Mutation loops yield back to the host this often.
const MUTATION_YIELD_EVERY: usize = 3;

/// Counters for one reconciliation pass. `updated` counts records, not
/// individual block mutations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTotals {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub duplicates: usize,
}

impl ReconcileTotals {
    pub fn absorb(&mut self, other: ReconcileTotals) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.duplicates += other.duplicates;
    }
}

/// Recover a stored record's event identity by scanning its own text and its
/// children's text for an `ical-id` property. Records without one are
/// invisible to reconciliation and fall to the stale sweep.
pub fn extract_record_identity(node: &BlockNode) -> Option<String> {
    if let Some(value) = render::property_value(&node.text, PROP_ID) {
        return Some(value.to_string());
    }
    node.children
        .iter()
        .find_map(|child| render::property_value(&child.text, PROP_ID))
        .map(str::to_string)
}

/// Run-scoped reconciliation state. Construct one per sync run: the location
/// id cache papers over read-after-write windows within a run and must never
/// outlive it, and the per-location seen sets keep first-occurrence-wins
/// dedup correct when one location's events arrive across several batches.
pub struct Reconciler<'a, S: Store> {
    store: &'a S,
    mutation_delay: Duration,
    retry: RetryConfig,
    location_ids: HashMap<String, String>,
    seen: HashMap<String, HashSet<String>>,
    yielder: Yielder,
}

impl<'a, S: Store> Reconciler<'a, S> {
    pub fn new(store: &'a S, mutation_delay: Duration) -> Self {
        Self {
            store,
            mutation_delay,
            retry: RetryConfig::default(),
            location_ids: HashMap::new(),
            seen: HashMap::new(),
            yielder: Yielder::new(MUTATION_YIELD_EVERY),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reconcile one location against a slice of desired events, already in
    /// most-recent-first order so the duplicate closest to "now" wins.
    pub async fn reconcile_location(
        &mut self,
        path: &str,
        calendar_display_name: &str,
        title_prefix: &str,
        desired: &[NormalizedEvent],
    ) -> Result<ReconcileTotals, StoreError> {
        let existing = match self.lookup_location(path).await? {
            Some(id) => match self.store.get_children(&id).await {
                Ok(children) => children,
                Err(StoreError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => Vec::new(),
        };

        let by_identity: HashMap<String, &BlockNode> = existing
            .iter()
            .filter_map(|node| extract_record_identity(node).map(|id| (id, node)))
            .collect();

        let mut totals = ReconcileTotals::default();
        let mut seen = self.seen.remove(path).unwrap_or_default();

        for event in desired {
            if !seen.insert(event.identity.clone()) {
                // Date-varying exports of a recurring series collapse to one
                // UID; the first (most recent) occurrence already won.
                debug!("Duplicate identity '{}' at {}", event.identity, path);
                totals.duplicates += 1;
                continue;
            }

            let content = render::render_record(event, calendar_display_name, title_prefix);
            match by_identity.get(&event.identity) {
                Some(node) => {
                    if self.update_record(node, &content).await? {
                        totals.updated += 1;
                    }
                }
                None => {
                    let order = existing.len() + totals.created;
                    self.create_record(path, &content, order).await?;
                    totals.created += 1;
                }
            }
        }

        // Stale sweep: anything whose identity was never seen this run goes,
        // as do records with no recoverable identity and surplus copies of a
        // seen identity. Copies appear when a create's success was reported
        // as a timeout and retried; only the canonical record, the one the
        // update path targeted, survives.
        for node in &existing {
            let keep = extract_record_identity(node)
                .map(|id| {
                    seen.contains(&id)
                        && by_identity.get(&id).map_or(false, |canon| canon.id == node.id)
                })
                .unwrap_or(false);
            if !keep {
                self.delete_with_retry(&node.id).await?;
                totals.deleted += 1;
            }
        }

        self.seen.insert(path.to_string(), seen);
        Ok(totals)
    }

    /// Remove every record from locations under the prefix that no current
    /// feed produces at all. Handles a calendar or event set disappearing
    /// between runs. Returns (records deleted, locations failed); only the
    /// prefix listing itself is allowed to fail the caller.
    pub async fn sweep_stale_locations(
        &mut self,
        prefix: &str,
        desired_paths: &HashSet<String>,
    ) -> Result<(usize, usize), StoreError> {
        let list_prefix = format!("{}/", prefix);
        let paths = self.store.list_locations_with_prefix(&list_prefix).await?;

        let mut deleted = 0;
        let mut failed = 0;
        for path in paths {
            if desired_paths.contains(&path) {
                continue;
            }
            match self.purge_location(&path).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Swept {} stale records from {}", count, path);
                    }
                    deleted += count;
                }
                Err(e) => {
                    warn!("Failed to sweep stale location {}: {}", path, e);
                    failed += 1;
                }
            }
        }
        Ok((deleted, failed))
    }

    async fn purge_location(&mut self, path: &str) -> Result<usize, StoreError> {
        let Some(id) = self.lookup_location(path).await? else {
            return Ok(0);
        };
        let children = match self.store.get_children(&id).await {
            Ok(children) => children,
            Err(StoreError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let count = children.len();
        for node in children {
            self.delete_with_retry(&node.id).await?;
        }
        Ok(count)
    }

    /// Bring one existing record in line with its desired content. Returns
    /// whether any mutation was issued.
    async fn update_record(
        &mut self,
        node: &BlockNode,
        content: &RecordContent,
    ) -> Result<bool, StoreError> {
        let mut mutated = false;

        if node.text != content.root_text {
            self.update_with_retry(&node.id, &content.root_text).await?;
            mutated = true;
        }

        let children_by_key: HashMap<&str, &BlockNode> = node
            .children
            .iter()
            .filter_map(|child| render::property_key(&child.text).map(|key| (key, child)))
            .collect();

        let mut appended = 0;
        for (key, value) in &content.properties {
            let text = RecordContent::property_text(key, value);
            match children_by_key.get(key.as_str()) {
                Some(child) => {
                    if child.text != text {
                        self.update_with_retry(&child.id, &text).await?;
                        mutated = true;
                    }
                }
                None => {
                    let order = node.children.len() + appended;
                    self.create_with_retry(&node.id, order, NewBlock::leaf(text)).await?;
                    appended += 1;
                    mutated = true;
                }
            }
        }
        // Existing property keys absent from the desired set are kept.

        Ok(mutated)
    }

    async fn create_record(
        &mut self,
        path: &str,
        content: &RecordContent,
        order: usize,
    ) -> Result<(), StoreError> {
        let location_id = self.ensure_location(path).await?;
        let block = NewBlock {
            text: content.root_text.clone(),
            children: content
                .properties
                .iter()
                .map(|(key, value)| NewBlock::leaf(RecordContent::property_text(key, value)))
                .collect(),
        };
        self.create_with_retry(&location_id, order, block).await?;
        Ok(())
    }

    /// Location id lookup with the run-scoped cache in front, without
    /// creating anything.
    async fn lookup_location(&mut self, path: &str) -> Result<Option<String>, StoreError> {
        if let Some(id) = self.location_ids.get(path) {
            return Ok(Some(id.clone()));
        }
        match self.store.get_location_id(path).await? {
            Some(id) => {
                self.location_ids.insert(path.to_string(), id.clone());
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    async fn ensure_location(&mut self, path: &str) -> Result<String, StoreError> {
        if let Some(id) = self.lookup_location(path).await? {
            return Ok(id);
        }
        let id = self.store.create_location(path).await?;
        self.location_ids.insert(path.to_string(), id.clone());
        Ok(id)
    }

    async fn create_with_retry(
        &mut self,
        parent_id: &str,
        order: usize,
        block: NewBlock,
    ) -> Result<String, StoreError> {
        let id = retry_with_backoff(
            &self.retry,
            || self.store.create_node(parent_id, order, block.clone()),
            StoreError::is_not_found,
        )
        .await?;
        self.pace().await;
        Ok(id)
    }

    async fn update_with_retry(&mut self, id: &str, text: &str) -> Result<(), StoreError> {
        retry_with_backoff(
            &self.retry,
            || self.store.update_node(id, text),
            StoreError::is_not_found,
        )
        .await?;
        self.pace().await;
        Ok(())
    }

    async fn delete_with_retry(&mut self, id: &str) -> Result<(), StoreError> {
        retry_with_backoff(
            &self.retry,
            || self.store.delete_node(id),
            StoreError::is_not_found,
        )
        .await?;
        self.pace().await;
        Ok(())
    }

    /// Rate-limit courtesy pause plus cooperative yield after every mutation.
    async fn pace(&mut self) {
        if !self.mutation_delay.is_zero() {
            tokio::time::sleep(self.mutation_delay).await;
        }
        self.yielder.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedEvent;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn reconciler(store: &MemoryStore) -> Reconciler<'_, MemoryStore> {
        Reconciler::new(store, Duration::ZERO).with_retry_config(fast_retry())
    }

    fn event(identity: &str, title: &str) -> NormalizedEvent {
        NormalizedEvent {
            identity: identity.to_string(),
            title: title.to_string(),
            description: None,
            location: None,
            primary_url: None,
            meeting: None,
            start: Some(Utc.with_ymd_and_hms(2026, 8, 25, 9, 0, 0).unwrap()),
            end: None,
            attendees: Vec::new(),
        }
    }

    const PATH: &str = "calendar/work/abc123";

    #[tokio::test]
    async fn test_creates_record_with_properties() {
        let store = MemoryStore::new();
        let mut recon = reconciler(&store);

        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();
        assert_eq!(totals.created, 1);

        let page = store.get_location_id(PATH).await.unwrap().unwrap();
        let records = store.get_children(&page).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "[[August 25th, 2026]] Standup #work");
        assert_eq!(records[0].children[0].text, "ical-id:: a");
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let store = MemoryStore::new();
        let desired = [event("a", "Standup"), event("b", "Planning")];

        let mut recon = reconciler(&store);
        recon.reconcile_location(PATH, "Work", "", &desired).await.unwrap();

        store.reset_mutation_counts().await;
        // Fresh reconciler, as every run constructs one.
        let mut recon = reconciler(&store);
        let totals = recon.reconcile_location(PATH, "Work", "", &desired).await.unwrap();

        assert_eq!(totals, ReconcileTotals::default());
        assert_eq!(store.mutation_counts().await.total(), 0);
    }

    #[tokio::test]
    async fn test_title_change_is_single_root_update() {
        let store = MemoryStore::new();
        let mut recon = reconciler(&store);
        recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();

        store.reset_mutation_counts().await;
        let mut recon = reconciler(&store);
        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup (moved)")])
            .await
            .unwrap();

        assert_eq!(totals.updated, 1);
        assert_eq!(totals.created, 0);
        assert_eq!(totals.deleted, 0);
        let counts = store.mutation_counts().await;
        assert_eq!(counts.updates, 1);
        assert_eq!(counts.creates, 0);
        assert_eq!(counts.deletes, 0);
    }

    #[tokio::test]
    async fn test_duplicates_collapse_first_wins() {
        let store = MemoryStore::new();
        let mut recon = reconciler(&store);

        // Most-recent-first input order: the first occurrence must win.
        let desired = [event("a", "March instance"), event("a", "January instance")];
        let totals = recon.reconcile_location(PATH, "Work", "", &desired).await.unwrap();

        assert_eq!(totals.created, 1);
        assert_eq!(totals.duplicates, 1);

        let page = store.get_location_id(PATH).await.unwrap().unwrap();
        let records = store.get_children(&page).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].text.contains("March instance"));
    }

    #[tokio::test]
    async fn test_stale_record_deleted() {
        let store = MemoryStore::new();
        let mut recon = reconciler(&store);
        recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup"), event("b", "Old")])
            .await
            .unwrap();

        let mut recon = reconciler(&store);
        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();

        assert_eq!(totals.deleted, 1);
        let page = store.get_location_id(PATH).await.unwrap().unwrap();
        let records = store.get_children(&page).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(extract_record_identity(&records[0]).as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_record_without_identity_swept() {
        let store = MemoryStore::new();
        let page = store.create_location(PATH).await.unwrap();
        store
            .create_node(&page, 0, NewBlock::leaf("a manually written note"))
            .await
            .unwrap();

        let mut recon = reconciler(&store);
        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();

        assert_eq!(totals.created, 1);
        assert_eq!(totals.deleted, 1);
    }

    #[tokio::test]
    async fn test_records_sharing_identity_collapse_to_one() {
        let store = MemoryStore::new();
        let page = store.create_location(PATH).await.unwrap();
        // Two copies of the same record, the residue of a create whose
        // success was reported as a timeout and then retried.
        for order in 0..2 {
            let copy = NewBlock {
                text: "[[August 25th, 2026]] Standup #work".to_string(),
                children: vec![NewBlock::leaf("ical-id:: a")],
            };
            store.create_node(&page, order, copy).await.unwrap();
        }

        let mut recon = reconciler(&store);
        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();

        assert_eq!(totals.created, 0);
        assert_eq!(totals.updated, 0);
        assert_eq!(totals.deleted, 1);

        let records = store.get_children(&page).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(extract_record_identity(&records[0]).as_deref(), Some("a"));

        // A second pass has nothing left to collapse.
        store.reset_mutation_counts().await;
        let mut recon = reconciler(&store);
        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();
        assert_eq!(totals, ReconcileTotals::default());
        assert_eq!(store.mutation_counts().await.total(), 0);
    }

    #[tokio::test]
    async fn test_property_update_and_stale_property_kept() {
        let store = MemoryStore::new();
        let mut with_location = event("a", "Standup");
        with_location.location = Some("Room 4".to_string());

        let mut recon = reconciler(&store);
        recon
            .reconcile_location(PATH, "Work", "", &[with_location])
            .await
            .unwrap();

        // Location dropped, description added.
        let mut changed = event("a", "Standup");
        changed.description = Some("agenda".to_string());

        let mut recon = reconciler(&store);
        let totals = recon.reconcile_location(PATH, "Work", "", &[changed]).await.unwrap();
        assert_eq!(totals.updated, 1);

        let page = store.get_location_id(PATH).await.unwrap().unwrap();
        let records = store.get_children(&page).await.unwrap();
        let texts: Vec<&str> = records[0].children.iter().map(|c| c.text.as_str()).collect();
        // New property created, dropped property intentionally retained.
        assert!(texts.contains(&"ical-desc:: agenda"));
        assert!(texts.contains(&"ical-location:: Room 4"));
    }

    #[tokio::test]
    async fn test_property_value_change_updates_in_place() {
        let store = MemoryStore::new();
        let mut first = event("a", "Standup");
        first.location = Some("Room 4".to_string());
        let mut recon = reconciler(&store);
        recon.reconcile_location(PATH, "Work", "", &[first]).await.unwrap();

        let mut moved = event("a", "Standup");
        moved.location = Some("Room 9".to_string());
        store.reset_mutation_counts().await;
        let mut recon = reconciler(&store);
        recon.reconcile_location(PATH, "Work", "", &[moved]).await.unwrap();

        let counts = store.mutation_counts().await;
        assert_eq!(counts.updates, 1);
        assert_eq!(counts.creates, 0);

        let page = store.get_location_id(PATH).await.unwrap().unwrap();
        let records = store.get_children(&page).await.unwrap();
        let texts: Vec<&str> = records[0].children.iter().map(|c| c.text.as_str()).collect();
        assert!(texts.contains(&"ical-location:: Room 9"));
        assert!(!texts.contains(&"ical-location:: Room 4"));
    }

    #[tokio::test]
    async fn test_cross_location_sweep() {
        let store = MemoryStore::new();
        let gone = "calendar/work/gone111";
        let mut recon = reconciler(&store);
        recon
            .reconcile_location(gone, "Work", "", &[event("old", "Cancelled thing")])
            .await
            .unwrap();
        recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();

        // Next run: only PATH is desired.
        let mut recon = reconciler(&store);
        recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();
        let desired: HashSet<String> = [PATH.to_string()].into();
        let (deleted, failed) = recon.sweep_stale_locations("calendar", &desired).await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(failed, 0);
        assert_eq!(store.record_count(gone).await, 0);
        assert_eq!(store.record_count(PATH).await, 1);
    }

    #[tokio::test]
    async fn test_emptied_location_has_zero_records() {
        let store = MemoryStore::new();
        let mut recon = reconciler(&store);
        recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();

        // The feed stops producing anything for this location.
        let mut recon = reconciler(&store);
        let (deleted, _) = recon
            .sweep_stale_locations("calendar", &HashSet::new())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.record_count(PATH).await, 0);
    }

    /// Store wrapper that fails the first N node creations with NotFound,
    /// simulating the read-after-write window right after a location is made.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    impl Store for FlakyStore {
        async fn get_children(&self, location_id: &str) -> Result<Vec<BlockNode>, StoreError> {
            self.inner.get_children(location_id).await
        }
        async fn get_location_id(&self, path: &str) -> Result<Option<String>, StoreError> {
            self.inner.get_location_id(path).await
        }
        async fn list_locations_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list_locations_with_prefix(prefix).await
        }
        async fn create_location(&self, path: &str) -> Result<String, StoreError> {
            self.inner.create_location(path).await
        }
        async fn create_node(
            &self,
            parent_id: &str,
            order: usize,
            block: NewBlock,
        ) -> Result<String, StoreError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::NotFound(parent_id.to_string()));
            }
            self.inner.create_node(parent_id, order, block).await
        }
        async fn update_node(&self, id: &str, text: &str) -> Result<(), StoreError> {
            self.inner.update_node(id, text).await
        }
        async fn delete_node(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete_node(id).await
        }
    }

    #[tokio::test]
    async fn test_create_retries_through_visibility_window() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(2),
        };
        let mut recon =
            Reconciler::new(&store, Duration::ZERO).with_retry_config(fast_retry());

        let totals = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await
            .unwrap();
        assert_eq!(totals.created, 1);
        assert_eq!(store.inner.record_count(PATH).await, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_location() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(10),
        };
        let mut recon =
            Reconciler::new(&store, Duration::ZERO).with_retry_config(fast_retry());

        let result = recon
            .reconcile_location(PATH, "Work", "", &[event("a", "Standup")])
            .await;
        assert!(result.is_err());
    }
}
