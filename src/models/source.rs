use serde::{Deserialize, Serialize};

/// A user-configured calendar feed. Read-only to the sync core; lifecycle is
/// owned by configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSource {
    pub display_name: String,
    pub feed_url: String,
}

impl CalendarSource {
    pub fn new<N: Into<String>, U: Into<String>>(display_name: N, feed_url: U) -> Self {
        Self {
            display_name: display_name.into(),
            feed_url: feed_url.into(),
        }
    }
}
