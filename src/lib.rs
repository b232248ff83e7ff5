// icalsync
// Reconciles iCal feeds into a hierarchical block store.
// Feed fetching goes through a host-supplied forwarding proxy; all writes are
// expressed as minimal create/update/delete mutations against the store.

pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod models;
pub mod naming;
pub mod parser;
pub mod reconcile;
pub mod render;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use feed::{FeedCache, FeedClient, FetchOutcome};
pub use models::*;
pub use reconcile::{ReconcileTotals, Reconciler};
pub use scheduler::DesiredEvent;
pub use session::Syncer;
pub use store::{BlockNode, MemoryStore, MutationCounts, NewBlock, Store, StoreError};
