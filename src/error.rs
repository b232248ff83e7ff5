use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Feed returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Feed parse error: {0}")]
    FeedParse(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No forwarding proxy address supplied by the host")]
    MissingProxy,

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Reconciliation failed for '{location}': {reason}")]
    LocationFailed { location: String, reason: String },
}

impl SyncError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn feed_parse<S: Into<String>>(msg: S) -> Self {
        Self::FeedParse(msg.into())
    }

    pub fn location_failed<S: Into<String>, R: Into<String>>(location: S, reason: R) -> Self {
        Self::LocationFailed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors abort the whole run; everything else is absorbed into
    /// per-source or per-location failure counters by the run loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingProxy | Self::SyncInProgress)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
