//! Event records and the views handed out by the store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum title length (characters) taken from the email subject.
pub const TITLE_CHARS: usize = 100;

/// Days-before-event at which a reminder fires.
pub const REMINDER_DAYS: [i64; 4] = [7, 3, 1, 0];

/// A calendar event discovered in an email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Fingerprint of (user, subject, date); unique per user.
    pub id: String,
    pub title: String,
    /// Serialized as `YYYY-MM-DD`.
    pub date: NaiveDate,
    /// The text the date was recognised from, e.g. `15 марта 2025`.
    pub original_date: String,
    pub created_at: DateTime<Utc>,
    pub reminder_sent: bool,
    pub email_preview: String,
}

impl Event {
    /// Whole days from `today` to the event (negative when past).
    pub fn days_from(&self, today: NaiveDate) -> i64 {
        (self.date - today).num_days()
    }
}

/// An event inside the requested window, with its distance from today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingEvent {
    #[serde(flatten)]
    pub event: Event,
    pub days_left: i64,
}

/// A reminder that should be delivered now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub user_id: i64,
    pub event: Event,
    pub days_until: i64,
}

/// Stable event id: the first 16 hex chars of SHA-256 over
/// `"{user_id}_{subject}_{date}"`.
///
/// Two emails with the same subject and date map to one id and therefore
/// one event.
pub fn fingerprint(user_id: i64, subject: &str, date: NaiveDate) -> String {
    let digest = Sha256::digest(format!("{user_id}_{subject}_{}", date.format("%Y-%m-%d")));
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
