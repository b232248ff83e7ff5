//! Composable event filters. Pure transformations: input lists are consumed,
//! new lists come back, and the only side effect is the cooperative yield
//! cadence shared with the rest of the pipeline.

use crate::models::NormalizedEvent;
use crate::utils::Yielder;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use regex::RegexBuilder;

const FILTER_YIELD_EVERY: usize = 50;

/// Drop every event whose title matches any of the given case-insensitive
/// patterns. An empty pattern list is a no-op, not an error; an invalid
/// pattern is skipped with a warning.
pub async fn exclude_by_title(
    events: Vec<NormalizedEvent>,
    patterns: &[String],
) -> Vec<NormalizedEvent> {
    if patterns.is_empty() {
        return events;
    }

    let compiled: Vec<_> = patterns
        .iter()
        .filter_map(|pattern| {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Ignoring invalid exclusion pattern '{}': {}", pattern, e);
                    None
                }
            }
        })
        .collect();

    if compiled.is_empty() {
        return events;
    }

    let mut kept = Vec::with_capacity(events.len());
    let mut yielder = Yielder::new(FILTER_YIELD_EVERY);
    for event in events {
        if !compiled.iter().any(|regex| regex.is_match(&event.title)) {
            kept.push(event);
        }
        yielder.tick().await;
    }
    kept
}

/// Keep events whose effective date falls inside the half-open window
/// `[startOfDay(now) - days_past, startOfDay(now) + days_future + 1day)`.
/// Events with neither start nor end are excluded; filtering on a date they
/// do not have is undefined, so the conservative choice is exclusion.
pub async fn within_date_window(
    events: Vec<NormalizedEvent>,
    days_past: i64,
    days_future: i64,
    now: DateTime<Utc>,
) -> Vec<NormalizedEvent> {
    let start_of_day = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc();
    let lower = start_of_day - Duration::days(days_past);
    let upper = start_of_day + Duration::days(days_future + 1);

    let mut kept = Vec::with_capacity(events.len());
    let mut yielder = Yielder::new(FILTER_YIELD_EVERY);
    for event in events {
        if let Some(date) = event.effective_date() {
            if date >= lower && date < upper {
                kept.push(event);
            }
        }
        yielder.tick().await;
    }
    kept
}
