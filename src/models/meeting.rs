use serde::{Deserialize, Serialize};

/// A detected video-conferencing link, tagged with the provider whose pattern
/// matched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingLink {
    pub provider: String,
    pub url: String,
}
