//! Event normalization: raw feed bytes in, `NormalizedEvent`s out.
//!
//! Partial success is the default outcome. A feed that fails to parse at the
//! top level yields an empty result; a single malformed VEVENT is skipped and
//! the rest of the feed still goes through. Only a missing UID drops an event
//! silently, because an event we cannot identify cannot be tracked across
//! runs.

use crate::models::{Attendee, NormalizedEvent};
use crate::utils::{self, Yielder};
use chrono::{DateTime, TimeZone, Utc};
use icalendar::{Calendar as IcsCalendar, Component, Event as IcsEvent, EventLike};
use log::{debug, warn};
use std::str::FromStr;

/// How many VEVENTs to walk between cooperative yields.
const PARSE_YIELD_EVERY: usize = 50;

/// Parse a raw ICS feed into normalized events. `source_name` only labels log
/// output; it has no effect on the result.
pub async fn parse_feed(raw: &str, source_name: &str) -> Vec<NormalizedEvent> {
    let calendar = match IcsCalendar::from_str(raw) {
        Ok(calendar) => calendar,
        Err(e) => {
            warn!("Failed to parse feed '{}': {}", source_name, e);
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let mut yielder = Yielder::new(PARSE_YIELD_EVERY);

    for component in &calendar.components {
        if let Some(ics_event) = component.as_event() {
            if let Some(event) = convert_event(ics_event) {
                events.push(event);
            }
        }
        yielder.tick().await;
    }

    debug!("Parsed {} events from feed '{}'", events.len(), source_name);
    events
}

fn convert_event(ics_event: &IcsEvent) -> Option<NormalizedEvent> {
    // Untracked events are useless to the reconciler.
    let identity = match ics_event.get_uid() {
        Some(uid) => uid.to_string(),
        None => {
            debug!("Skipping event without UID");
            return None;
        }
    };

    let title = ics_event.get_summary().unwrap_or("Untitled Event").to_string();
    let description = ics_event
        .get_description()
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    let location = ics_event
        .get_location()
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    let primary_url = ics_event
        .property_value("URL")
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let start = ics_event.get_start().as_ref().and_then(parse_ical_datetime);
    let end = ics_event.get_end().as_ref().and_then(parse_ical_datetime);

    let meeting = utils::extract_meeting_link(
        location.as_deref(),
        description.as_deref(),
        primary_url.as_deref(),
    );

    let attendees = extract_attendees(ics_event);

    Some(NormalizedEvent {
        identity,
        title,
        description,
        location,
        primary_url,
        meeting,
        start,
        end,
        attendees,
    })
}

/// Convert an ICS datetime with proper timezone handling. Date-only values
/// (all-day events) yield `None`; the data model carries no instant for them.
pub fn parse_ical_datetime(dt: &icalendar::DatePerhapsTime) -> Option<DateTime<Utc>> {
    match dt {
        icalendar::DatePerhapsTime::DateTime(dt) => match dt {
            // Already in UTC - no conversion needed
            icalendar::CalendarDateTime::Utc(dt) => Some(dt.naive_utc().and_utc()),

            // Floating time (no timezone specified) - interpret as local system time
            icalendar::CalendarDateTime::Floating(naive_dt) => chrono::Local
                .from_local_datetime(naive_dt)
                .single()
                .map(|local| local.with_timezone(&Utc)),

            // Time with explicit timezone - convert to UTC properly
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                if let Ok(tz) = chrono_tz::Tz::from_str(tzid) {
                    tz.from_local_datetime(date_time)
                        .single()
                        .map(|zoned| zoned.with_timezone(&Utc))
                } else {
                    warn!("Unrecognized timezone '{}', treating as local time", tzid);
                    chrono::Local
                        .from_local_datetime(date_time)
                        .single()
                        .map(|local| local.with_timezone(&Utc))
                }
            }
        },
        icalendar::DatePerhapsTime::Date(_) => None,
    }
}

fn extract_attendees(ics_event: &IcsEvent) -> Vec<Attendee> {
    ics_event
        .multi_properties()
        .get("ATTENDEE")
        .into_iter()
        .flatten()
        .filter_map(|prop| {
            let display_name = prop
                .params()
                .get("CN")
                .map(|param| param.value().trim_matches('"').to_string())
                .filter(|name| !name.is_empty());

            let raw = prop.value();
            let address = if raw.len() >= 7 && raw[..7].eq_ignore_ascii_case("mailto:") {
                &raw[7..]
            } else {
                raw
            };
            let address = if address.is_empty() {
                None
            } else {
                Some(address.to_string())
            };

            if display_name.is_none() && address.is_none() {
                return None;
            }
            Some(Attendee {
                display_name,
                address,
            })
        })
        .collect()
}
