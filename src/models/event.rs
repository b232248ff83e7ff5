use crate::models::MeetingLink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attendee pulled from an ATTENDEE property. At least one of the two
/// fields is always populated; entries with neither are dropped at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub display_name: Option<String>,
    pub address: Option<String>,
}

/// A feed event in uniform shape. Built fresh on every fetch+parse cycle and
/// never mutated afterwards; only the mutations derived from it persist.
///
/// `identity` is the feed's own UID, stable across exports of the same event.
/// Recurring-series exports may repeat it across instances; the reconciliation
/// engine deduplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub identity: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub primary_url: Option<String>,
    pub meeting: Option<MeetingLink>,
    /// Absent for all-day or malformed source events.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub attendees: Vec<Attendee>,
}

impl NormalizedEvent {
    /// The instant used for date filtering and sort order: start when present,
    /// otherwise end.
    pub fn effective_date(&self) -> Option<DateTime<Utc>> {
        self.start.or(self.end)
    }
}
