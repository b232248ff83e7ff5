//! The persisted record format.
//!
//! Format compatibility matters: records written by earlier versions are
//! matched and rewritten in place, so every byte of the root line and the
//! property blocks must come out identically for identical input.
//!
//! ```text
//! <titlePrefix> [[<start date>]] <title> #<calendar tag>
//!   ical-id:: <raw event identity>
//!   ical-desc:: <description>                  (only if non-empty)
//!   ical-location:: <location>                 (only if non-empty)
//!   ical-meeting-url:: [**JOIN MEETING**](<url>)
//!   ical-url:: [link](<url>)
//!   ical-end:: [[<end date>]]                  (only if it differs from start)
//! ```

use crate::models::NormalizedEvent;
use crate::naming::sanitize_display_name;
use chrono::{DateTime, Datelike, Utc};

pub const PROP_ID: &str = "ical-id";
pub const PROP_DESC: &str = "ical-desc";
pub const PROP_LOCATION: &str = "ical-location";
pub const PROP_MEETING_URL: &str = "ical-meeting-url";
pub const PROP_URL: &str = "ical-url";
pub const PROP_END: &str = "ical-end";

/// The desired shape of one stored record: a root line plus ordered
/// `key:: value` property children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContent {
    pub root_text: String,
    pub properties: Vec<(String, String)>,
}

impl RecordContent {
    /// Child block text for a property pair.
    pub fn property_text(key: &str, value: &str) -> String {
        format!("{}:: {}", key, value)
    }
}

/// 11/12/13 take "th" regardless of last digit; otherwise the last digit
/// decides.
fn ordinal_suffix(day: u32) -> &'static str {
    if (11..=13).contains(&(day % 100)) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

/// `August 25th, 2026`
pub fn format_date(instant: &DateTime<Utc>) -> String {
    let day = instant.day();
    format!(
        "{} {}{}, {}",
        instant.format("%B"),
        day,
        ordinal_suffix(day),
        instant.year()
    )
}

/// Collapse line breaks and surrounding whitespace so free text fits in one
/// property line.
fn sanitize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the full desired record for an event. Pure; identical input yields
/// byte-identical output.
pub fn render_record(
    event: &NormalizedEvent,
    calendar_display_name: &str,
    title_prefix: &str,
) -> RecordContent {
    let mut segments: Vec<String> = Vec::with_capacity(4);
    if !title_prefix.is_empty() {
        segments.push(title_prefix.to_string());
    }
    // Events reaching the renderer normally carry a start; the end instant is
    // the fallback and dateless events simply omit the date link.
    if let Some(date) = event.start.as_ref().or(event.end.as_ref()) {
        segments.push(format!("[[{}]]", format_date(date)));
    }
    segments.push(event.title.clone());
    segments.push(format!("#{}", sanitize_display_name(calendar_display_name)));
    let root_text = segments.join(" ");

    let mut properties = vec![(PROP_ID.to_string(), event.identity.clone())];

    if let Some(desc) = event.description.as_deref() {
        let desc = sanitize_text(desc);
        if !desc.is_empty() {
            properties.push((PROP_DESC.to_string(), desc));
        }
    }
    if let Some(location) = event.location.as_deref() {
        let location = sanitize_text(location);
        if !location.is_empty() {
            properties.push((PROP_LOCATION.to_string(), location));
        }
    }
    if let Some(meeting) = &event.meeting {
        properties.push((
            PROP_MEETING_URL.to_string(),
            format!("[**JOIN MEETING**]({})", meeting.url),
        ));
    }
    if let Some(url) = event.primary_url.as_deref() {
        properties.push((PROP_URL.to_string(), format!("[link]({})", url)));
    }
    if let (Some(start), Some(end)) = (&event.start, &event.end) {
        if format_date(end) != format_date(start) {
            properties.push((PROP_END.to_string(), format!("[[{}]]", format_date(end))));
        }
    }

    RecordContent {
        root_text,
        properties,
    }
}

/// The leading `key` of a `key:: value` property block, if the text is one.
pub fn property_key(text: &str) -> Option<&str> {
    let (key, _) = text.split_once("::")?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some(key)
}

/// The value of a named property within a block's text, if present.
pub fn property_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let (found, value) = text.split_once("::")?;
    if found.trim() == key {
        Some(value.trim())
    } else {
        None
    }
}
