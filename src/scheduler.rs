//! Batch planning and pacing.
//!
//! The combined event list from every source is ordered most-recent-first,
//! cut into fixed-size batches, and each batch is reconciled location by
//! location with a pause between batches. Ordering before batching is what
//! makes duplicate collapse deterministic: the occurrence nearest to now is
//! always processed first no matter how the batches fall.

use crate::error::SyncError;
use crate::models::{NormalizedEvent, SyncProgress};
use crate::reconcile::{ReconcileTotals, Reconciler};
use crate::store::Store;
use log::{debug, warn};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// One event routed to its target location. The same location may appear
/// many times; grouping happens per batch.
#[derive(Debug, Clone)]
pub struct DesiredEvent {
    pub calendar_name: String,
    pub location: String,
    pub event: NormalizedEvent,
}

/// Every location the desired set writes to, for the stale-location sweep.
pub fn desired_locations(desired: &[DesiredEvent]) -> HashSet<String> {
    desired.iter().map(|d| d.location.clone()).collect()
}

/// Dated events sort most-recent-first; dateless events go last. The sort is
/// stable so same-instant events keep their feed order.
pub fn order_for_processing(desired: &mut [DesiredEvent]) {
    desired.sort_by_key(|d| Reverse(d.event.effective_date()));
}

/// Reconcile the full desired set in batches. Returns the mutation totals
/// and the number of distinct locations whose reconciliation failed; a
/// failed location never stops the remaining ones.
pub async fn run_batches<S, F>(
    reconciler: &mut Reconciler<'_, S>,
    mut desired: Vec<DesiredEvent>,
    title_prefix: &str,
    batch_size: usize,
    batch_delay: Duration,
    observer: &mut F,
) -> (ReconcileTotals, usize)
where
    S: Store,
    F: FnMut(SyncProgress),
{
    order_for_processing(&mut desired);

    let total = desired.len();
    let batch_size = batch_size.max(1);
    let num_batches = desired.chunks(batch_size).len();

    let mut totals = ReconcileTotals::default();
    let mut failed_locations: HashSet<String> = HashSet::new();
    let mut processed = 0;

    for (index, batch) in desired.chunks(batch_size).enumerate() {
        for (path, calendar_name, events) in group_by_location(batch) {
            match reconciler
                .reconcile_location(path, calendar_name, title_prefix, &events)
                .await
            {
                Ok(outcome) => totals.absorb(outcome),
                Err(e) => {
                    let failure = SyncError::location_failed(path, e.to_string());
                    warn!("{}", failure);
                    failed_locations.insert(path.to_string());
                }
            }
        }

        processed += batch.len();
        observer(SyncProgress { processed, total });
        debug!("Batch {}/{} done ({}/{} events)", index + 1, num_batches, processed, total);

        if index + 1 < num_batches && !batch_delay.is_zero() {
            tokio::time::sleep(batch_delay).await;
        }
    }

    (totals, failed_locations.len())
}

/// Group one batch by location, preserving the first-seen order of
/// locations and the event order within each.
fn group_by_location(batch: &[DesiredEvent]) -> Vec<(&str, &str, Vec<NormalizedEvent>)> {
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, &str, Vec<NormalizedEvent>)> = Vec::new();

    for item in batch {
        match index_of.get(item.location.as_str()) {
            Some(&i) => groups[i].2.push(item.event.clone()),
            None => {
                index_of.insert(&item.location, groups.len());
                groups.push((
                    &item.location,
                    &item.calendar_name,
                    vec![item.event.clone()],
                ));
            }
        }
    }
    groups
}
