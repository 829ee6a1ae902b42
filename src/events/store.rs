//! Event store: per-user event lists persisted as one JSON document.
//!
//! The document is a map of user id (as a string) to an array of events.
//! Every mutation rewrites the whole file; a failed write is logged and the
//! in-memory state stays authoritative until the next successful write.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::extract::find_dates;
use super::model::{DueReminder, Event, REMINDER_DAYS, TITLE_CHARS, UpcomingEvent, fingerprint};
use crate::error::PersistenceError;
use crate::mail::types::{PREVIEW_CHARS, truncate_chars};
use crate::store::JsonFile;

type EventMap = BTreeMap<i64, Vec<Event>>;

/// Durable user → events mapping with reminder bookkeeping.
pub struct EventStore {
    events: RwLock<EventMap>,
    file: JsonFile,
}

impl EventStore {
    /// Load the store from `path`. A missing file is an empty store; an
    /// unreadable one is logged and also starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let file = JsonFile::new(path);
        let events = match file.read::<BTreeMap<String, Vec<StoredEvent>>>() {
            Ok(Some(raw)) => normalize(raw),
            Ok(None) => EventMap::new(),
            Err(e) => {
                error!(error = %e, "Failed to load events, starting empty");
                EventMap::new()
            }
        };

        let total: usize = events.values().map(Vec::len).sum();
        info!(path = %file.path().display(), events = total, users = events.len(), "Event store loaded");

        Arc::new(Self {
            events: RwLock::new(events),
            file,
        })
    }

    /// Extract dates from subject + body and store one event per new date.
    ///
    /// Returns only the events that were not already present, so a second
    /// call with the same input returns nothing.
    pub async fn add_from_email(&self, user_id: i64, subject: &str, body: &str) -> Vec<Event> {
        let found = find_dates(&format!("{subject} {body}"));
        if found.is_empty() {
            return Vec::new();
        }

        let mut events = self.events.write().await;
        let list = events.entry(user_id).or_default();
        let mut added = Vec::new();

        for hit in found {
            let id = fingerprint(user_id, subject, hit.date);
            if list.iter().any(|e| e.id == id) {
                debug!(user_id, event_id = %id, "Event already known");
                continue;
            }
            let event = Event {
                id,
                title: truncate_chars(subject, TITLE_CHARS).to_string(),
                date: hit.date,
                original_date: hit.text,
                created_at: Utc::now(),
                reminder_sent: false,
                email_preview: truncate_chars(body, PREVIEW_CHARS).to_string(),
            };
            list.push(event.clone());
            added.push(event);
        }

        if !added.is_empty() {
            info!(user_id, count = added.len(), "Added events from email");
            self.persist(&events).await;
        }
        added
    }

    /// Events dated from today through `days` days ahead, earliest first.
    pub async fn upcoming(&self, user_id: i64, days: u32) -> Vec<UpcomingEvent> {
        self.upcoming_on(user_id, days, today()).await
    }

    pub async fn upcoming_on(&self, user_id: i64, days: u32, today: NaiveDate) -> Vec<UpcomingEvent> {
        let events = self.events.read().await;
        let Some(list) = events.get(&user_id) else {
            return Vec::new();
        };

        let mut upcoming: Vec<UpcomingEvent> = list
            .iter()
            .filter_map(|event| {
                let days_left = event.days_from(today);
                (0..=i64::from(days)).contains(&days_left).then(|| UpcomingEvent {
                    event: event.clone(),
                    days_left,
                })
            })
            .collect();
        upcoming.sort_by_key(|u| u.event.date);
        upcoming
    }

    /// Unsent reminders whose event is 7, 3, 1 or 0 days away.
    pub async fn due_for_reminder(&self) -> Vec<DueReminder> {
        self.due_for_reminder_on(today()).await
    }

    pub async fn due_for_reminder_on(&self, today: NaiveDate) -> Vec<DueReminder> {
        let events = self.events.read().await;
        let mut due = Vec::new();
        for (&user_id, list) in events.iter() {
            for event in list.iter().filter(|e| !e.reminder_sent) {
                let days_until = event.days_from(today);
                if REMINDER_DAYS.contains(&days_until) {
                    due.push(DueReminder {
                        user_id,
                        event: event.clone(),
                        days_until,
                    });
                }
            }
        }
        due
    }

    /// Flag an event's reminder as delivered. Returns false if not found.
    pub async fn mark_reminder_sent(&self, user_id: i64, event_id: &str) -> bool {
        let mut events = self.events.write().await;
        let Some(event) = events
            .get_mut(&user_id)
            .and_then(|list| list.iter_mut().find(|e| e.id == event_id))
        else {
            warn!(user_id, event_id, "Cannot mark reminder: event not found");
            return false;
        };

        event.reminder_sent = true;
        info!(user_id, event_id, "Reminder marked as sent");
        self.persist(&events).await;
        true
    }

    /// Delete one event. Returns false if it did not exist.
    pub async fn delete_event(&self, user_id: i64, event_id: &str) -> bool {
        let mut events = self.events.write().await;
        let Some(list) = events.get_mut(&user_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != event_id);
        if list.len() == before {
            return false;
        }
        if list.is_empty() {
            events.remove(&user_id);
        }
        info!(user_id, event_id, "Event deleted");
        self.persist(&events).await;
        true
    }

    /// All events of a user in insertion order.
    pub async fn user_events(&self, user_id: i64) -> Vec<Event> {
        self.events
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every event of a user. Returns how many were removed.
    pub async fn remove_user(&self, user_id: i64) -> usize {
        let mut events = self.events.write().await;
        let Some(removed) = events.remove(&user_id) else {
            return 0;
        };
        info!(user_id, count = removed.len(), "Removed all events of user");
        self.persist(&events).await;
        removed.len()
    }

    /// Remove events dated more than `days` days before today.
    pub async fn prune_older_than(&self, days: u32) -> usize {
        self.prune_older_than_on(days, today()).await
    }

    pub async fn prune_older_than_on(&self, days: u32, today: NaiveDate) -> usize {
        // A horizon reaching past the calendar's start keeps everything
        let cutoff = today
            .checked_sub_days(chrono::Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        let mut events = self.events.write().await;
        let mut removed = 0;

        for list in events.values_mut() {
            let before = list.len();
            list.retain(|e| e.date >= cutoff);
            removed += before - list.len();
        }
        events.retain(|_, list| !list.is_empty());

        if removed > 0 {
            info!(removed, %cutoff, "Pruned old events");
            self.persist(&events).await;
        }
        removed
    }

    pub async fn event_count(&self, user_id: i64) -> usize {
        self.events.read().await.get(&user_id).map_or(0, Vec::len)
    }

    pub async fn total_events(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    /// Write the current state, reporting failure to the caller.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let events = self.events.read().await;
        self.file.save(&*events).await
    }

    /// Runs under the write guard so documents land in mutation order.
    async fn persist(&self, events: &EventMap) {
        if let Err(e) = self.file.save(events).await {
            error!(error = %e, "Failed to save events, keeping in-memory state");
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// An event as found on disk, tolerant of older layouts.
#[derive(Debug, Deserialize)]
struct StoredEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    original_date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    reminder_sent: bool,
    #[serde(default)]
    email_preview: String,
}

fn normalize(raw: BTreeMap<String, Vec<StoredEvent>>) -> EventMap {
    let mut events = EventMap::new();

    for (key, stored) in raw {
        let Ok(user_id) = key.trim().parse::<i64>() else {
            warn!(key = %key, "Skipping events under non-numeric user key");
            continue;
        };

        let list: &mut Vec<Event> = events.entry(user_id).or_default();
        for s in stored {
            let resolved = [s.date.as_deref(), s.original_date.as_deref()]
                .into_iter()
                .flatten()
                .find_map(parse_stored_date);
            let Some(date) = resolved else {
                warn!(user_id, title = %s.title, "Dropping stored event without a usable date");
                continue;
            };

            let id = s.id.unwrap_or_else(|| fingerprint(user_id, &s.title, date));
            if list.iter().any(|e| e.id == id) {
                continue;
            }
            list.push(Event {
                id,
                original_date: s.original_date.unwrap_or_else(|| date.to_string()),
                title: s.title,
                date,
                created_at: s
                    .created_at
                    .as_deref()
                    .and_then(parse_created_at)
                    .unwrap_or_else(Utc::now),
                reminder_sent: s.reminder_sent,
                email_preview: s.email_preview,
            });
        }
    }

    events.retain(|_, list| !list.is_empty());
    events
}

/// Dates written by earlier versions: ISO, `DD.MM.YYYY`, `DD/MM/YYYY`,
/// or an ISO timestamp.
fn parse_stored_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

fn parse_created_at(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn iso(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    fn store(tmp: &TempDir) -> Arc<EventStore> {
        EventStore::load(tmp.path().join("events.json"))
    }

    const TODAY: (i32, u32, u32) = (2025, 3, 10);

    fn today() -> NaiveDate {
        day(TODAY.0, TODAY.1, TODAY.2)
    }

    /// Add an event `offset` days from the fixed test "today".
    async fn add_at(store: &EventStore, user: i64, subject: &str, offset: i64) -> Event {
        let date = today() + chrono::Duration::days(offset);
        let mut added = store
            .add_from_email(user, subject, &format!("due {}", iso(date)))
            .await;
        assert_eq!(added.len(), 1);
        added.remove(0)
    }

    #[tokio::test]
    async fn invoice_email_yields_two_events() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let added = store
            .add_from_email(1, "Invoice", "Оплата до 15.03.2025, см. также 2025-04-01")
            .await;
        let dates: Vec<String> = added.iter().map(|e| iso(e.date)).collect();
        assert_eq!(dates, vec!["2025-03-15", "2025-04-01"]);
        assert_ne!(added[0].id, added[1].id);
        assert_eq!(added[0].title, "Invoice");
        assert_eq!(added[0].original_date, "15.03.2025");
        assert!(!added[0].reminder_sent);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let first = store.add_from_email(1, "Invoice", "pay by 15.03.2025").await;
        let second = store.add_from_email(1, "Invoice", "pay by 15.03.2025").await;
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(store.event_count(1).await, 1);
    }

    #[tokio::test]
    async fn same_subject_and_date_merge_across_bodies() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.add_from_email(1, "Invoice", "first body 15.03.2025").await;
        let second = store.add_from_email(1, "Invoice", "other body 15 марта 2025").await;
        assert!(second.is_empty());

        // A different user gets their own event
        let other = store.add_from_email(2, "Invoice", "first body 15.03.2025").await;
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn invalid_date_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        assert!(store.add_from_email(1, "Bad", "31.02.2024").await.is_empty());
        assert!(store.user_events(1).await.is_empty());
        assert!(!tmp.path().join("events.json").exists());
    }

    #[tokio::test]
    async fn title_and_preview_truncated() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let subject = "т".repeat(150);
        let body = format!("{} 01.01.2030", "б".repeat(300));
        let added = store.add_from_email(1, &subject, &body).await;
        assert_eq!(added[0].title.chars().count(), TITLE_CHARS);
        assert_eq!(added[0].email_preview.chars().count(), PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn upcoming_window_is_inclusive() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        add_at(&store, 1, "yesterday", -1).await;
        add_at(&store, 1, "seven", 7).await;
        add_at(&store, 1, "today", 0).await;
        add_at(&store, 1, "eight", 8).await;
        add_at(&store, 1, "three", 3).await;

        let upcoming = store.upcoming_on(1, 7, today()).await;
        let titles: Vec<&str> = upcoming.iter().map(|u| u.event.title.as_str()).collect();
        assert_eq!(titles, vec!["today", "three", "seven"]);
        let days: Vec<i64> = upcoming.iter().map(|u| u.days_left).collect();
        assert_eq!(days, vec![0, 3, 7]);

        assert!(store.upcoming_on(99, 7, today()).await.is_empty());
    }

    #[tokio::test]
    async fn reminders_due_on_exact_days() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        for offset in [0, 1, 2, 3, 5, 7, 8, -1] {
            add_at(&store, 1, &format!("in {offset}"), offset).await;
        }

        let due = store.due_for_reminder_on(today()).await;
        let mut days: Vec<i64> = due.iter().map(|d| d.days_until).collect();
        days.sort();
        assert_eq!(days, vec![0, 1, 3, 7]);
        assert!(due.iter().all(|d| d.user_id == 1));
        assert!(due.iter().all(|d| d.event.days_from(today()) == d.days_until));
    }

    #[tokio::test]
    async fn marked_reminder_not_due_again() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let event = add_at(&store, 1, "week", 7).await;
        assert_eq!(store.due_for_reminder_on(today()).await.len(), 1);

        assert!(store.mark_reminder_sent(1, &event.id).await);
        assert!(store.due_for_reminder_on(today()).await.is_empty());
        assert!(!store.mark_reminder_sent(1, "missing").await);
        assert!(!store.mark_reminder_sent(2, &event.id).await);
    }

    #[tokio::test]
    async fn delete_and_remove_user() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let a = add_at(&store, 1, "a", 1).await;
        add_at(&store, 1, "b", 2).await;
        add_at(&store, 2, "c", 2).await;

        assert!(store.delete_event(1, &a.id).await);
        assert!(!store.delete_event(1, &a.id).await);
        assert_eq!(store.event_count(1).await, 1);

        assert_eq!(store.remove_user(1).await, 1);
        assert_eq!(store.remove_user(1).await, 0);
        assert_eq!(store.total_events().await, 1);
    }

    #[tokio::test]
    async fn prune_removes_only_old_events() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        add_at(&store, 1, "ancient", -31).await;
        add_at(&store, 1, "edge", -30).await;
        add_at(&store, 1, "future", 5).await;
        add_at(&store, 2, "old", -40).await;

        assert_eq!(store.prune_older_than_on(30, today()).await, 2);
        let titles: Vec<String> = store.user_events(1).await.into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["edge", "future"]);
        assert_eq!(store.event_count(2).await, 0);
        assert_eq!(store.prune_older_than_on(30, today()).await, 0);
    }

    #[tokio::test]
    async fn prune_with_huge_horizon_keeps_everything() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        add_at(&store, 1, "old", -400).await;
        add_at(&store, 1, "soon", 2).await;

        assert_eq!(store.prune_older_than_on(100_000_000, today()).await, 0);
        assert_eq!(store.prune_older_than_on(u32::MAX, today()).await, 0);
        assert_eq!(store.event_count(1).await, 2);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let event = {
            let store = store(&tmp);
            let event = add_at(&store, 42, "persist", 3).await;
            store.mark_reminder_sent(42, &event.id).await;
            event
        };

        let raw = std::fs::read_to_string(tmp.path().join("events.json")).unwrap();
        assert!(raw.contains("\"42\""));
        assert!(raw.contains(&format!("\"date\": \"{}\"", iso(event.date))));

        let reloaded = store(&tmp);
        let events = reloaded.user_events(42).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
        assert!(events[0].reminder_sent);
    }

    #[tokio::test]
    async fn legacy_document_normalized_on_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.json");
        std::fs::write(
            &path,
            r#"{
                "7": [
                    {"id": "a1", "title": "Dotted", "date": "15.03.2025", "original_date": "15.03.2025",
                     "created_at": "2025-03-01T10:00:00.123456", "reminder_sent": true, "email_preview": "p"},
                    {"id": "a2", "title": "Slashed", "date": "01/04/2025"},
                    {"id": "a3", "title": "Broken", "date": "soon"},
                    {"id": "a1", "title": "Duplicate", "date": "2025-03-15"},
                    {"title": "No id", "original_date": "2025-05-01"}
                ],
                "not-a-user": [{"id": "x", "title": "t", "date": "2025-01-01"}]
            }"#,
        )
        .unwrap();

        let store = EventStore::load(&path);
        let events = store.user_events(7).await;
        let dates: Vec<String> = events.iter().map(|e| iso(e.date)).collect();
        assert_eq!(dates, vec!["2025-03-15", "2025-04-01", "2025-05-01"]);
        assert!(events[0].reminder_sent);
        assert_eq!(events[0].created_at.to_rfc3339(), "2025-03-01T10:00:00.123456+00:00");
        assert_eq!(events[2].id, fingerprint(7, "No id", day(2025, 5, 1)));
        assert_eq!(store.total_events().await, 3);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = EventStore::load(&path);
        assert_eq!(store.total_events().await, 0);
        assert_eq!(store.add_from_email(1, "x", "01.01.2030").await.len(), 1);
    }

    #[tokio::test]
    async fn write_failure_keeps_memory_state() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let store = EventStore::load(blocker.join("events.json"));

        assert_eq!(store.add_from_email(1, "x", "01.01.2030").await.len(), 1);
        assert_eq!(store.event_count(1).await, 1);
        assert!(store.flush().await.is_err());
    }
}
