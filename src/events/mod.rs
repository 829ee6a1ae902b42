//! Date/Event extraction and the per-user Event Store.

pub mod extract;
pub mod model;
pub mod store;

pub use extract::{ExtractedDate, extract_dates, find_dates};
pub use model::{DueReminder, Event, UpcomingEvent, fingerprint};
pub use store::EventStore;
