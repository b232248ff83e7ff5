// Declare modules
pub mod event;
pub mod meeting;
pub mod source;
pub mod sync;

// Re-export all public types to flatten imports for external callers.
pub use event::{Attendee, NormalizedEvent};
pub use meeting::MeetingLink;
pub use source::CalendarSource;
pub use sync::{SyncProgress, SyncReport};
