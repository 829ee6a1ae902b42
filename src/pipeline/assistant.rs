//! Mail assistant service. Ties sessions, decoding, extraction and storage
//! together for one user at a time.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use super::cache::EmailCache;
use crate::accounts::AccountStore;
use crate::config::{AppConfig, WebmailConfig};
use crate::decoder::MessageDecoder;
use crate::error::{Error, FetchError, Result};
use crate::events::{DueReminder, Event, EventStore, UpcomingEvent};
use crate::mail::session::MailConnector;
use crate::mail::types::{MailCredential, StructuredEmail};
use crate::notify::{EmailDelivery, Notifier};

/// Window used for the "upcoming" statistic.
const STATS_WINDOW_DAYS: u32 = 7;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Tunables of the assistant taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub fetch_limit: usize,
    pub retention_days: u32,
    pub webmail: WebmailConfig,
}

impl From<&AppConfig> for AssistantSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch_limit: config.fetch_limit,
            retention_days: config.retention_days,
            webmail: config.webmail.clone(),
        }
    }
}

/// A fetched message that could not be turned into an email.
#[derive(Debug)]
pub struct MessageFailure {
    /// Transient mailbox id of the message.
    pub id: String,
    pub error: Error,
}

/// An email processed during a check, with the events it produced.
#[derive(Debug, Clone)]
pub struct ProcessedEmail {
    pub email: StructuredEmail,
    pub new_events: Vec<Event>,
}

/// Outcome of checking one user's mailbox.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub processed: Vec<ProcessedEmail>,
    pub failures: Vec<MessageFailure>,
}

impl CheckReport {
    pub fn new_event_count(&self) -> usize {
        self.processed.iter().map(|p| p.new_events.len()).sum()
    }
}

/// Totals of one pass over all users.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub users_checked: usize,
    pub users_failed: usize,
    pub emails: usize,
    pub new_events: usize,
    pub message_failures: usize,
}

/// Per-user statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStats {
    pub total_events: usize,
    pub upcoming_week: usize,
    pub registered_users: usize,
}

/// The ingestion pipeline and its bookkeeping.
pub struct MailAssistant {
    accounts: Arc<AccountStore>,
    events: Arc<EventStore>,
    connector: Arc<dyn MailConnector>,
    decoder: MessageDecoder,
    notifier: Arc<dyn Notifier>,
    cache: EmailCache,
    settings: AssistantSettings,
}

impl MailAssistant {
    pub fn new(
        accounts: Arc<AccountStore>,
        events: Arc<EventStore>,
        connector: Arc<dyn MailConnector>,
        decoder: MessageDecoder,
        notifier: Arc<dyn Notifier>,
        settings: AssistantSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            accounts,
            events,
            connector,
            decoder,
            notifier,
            cache: EmailCache::new(),
            settings,
        })
    }

    pub fn accounts(&self) -> &Arc<AccountStore> {
        &self.accounts
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    /// Validate a credential with exactly one login, then store it.
    pub async fn register_user(&self, user_id: i64, credential: MailCredential) -> Result<()> {
        let connector = Arc::clone(&self.connector);
        let probe = credential.clone();
        tokio::task::spawn_blocking(move || connector.open(&probe).map(|session| session.close()))
            .await
            .map_err(|e| Error::Task(e.to_string()))??;

        self.accounts.upsert(user_id, &credential).await?;
        info!(user_id, login = %credential.login, "User registered");
        Ok(())
    }

    /// Fetch, decode and extract events from a user's unseen mail.
    ///
    /// Per-message failures are collected in the report; only failing to
    /// open the session fails the whole check.
    pub async fn check_user(&self, user_id: i64) -> Result<CheckReport> {
        let credential = self
            .accounts
            .credential(user_id)
            .await?
            .ok_or(Error::UnknownUser(user_id))?;

        let connector = Arc::clone(&self.connector);
        let decoder = self.decoder.clone();
        let limit = self.settings.fetch_limit;
        let fetched = tokio::task::spawn_blocking(move || {
            fetch_batch(connector.as_ref(), &credential, limit, &decoder)
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))??;

        let mut report = CheckReport::default();
        for item in fetched {
            match item {
                Ok(email) => {
                    let new_events = self
                        .events
                        .add_from_email(user_id, &email.subject, &email.full_body)
                        .await;
                    if let Some(replaced) = self.cache.insert(user_id, email.clone()).await {
                        self.decoder.spool().release(&replaced.attachments);
                    }
                    report.processed.push(ProcessedEmail { email, new_events });
                }
                Err(failure) => {
                    warn!(user_id, id = %failure.id, error = %failure.error, "Skipping message");
                    report.failures.push(failure);
                }
            }
        }

        debug!(
            user_id,
            emails = report.processed.len(),
            new_events = report.new_event_count(),
            failures = report.failures.len(),
            "Mailbox checked"
        );
        Ok(report)
    }

    /// Check every user with autocheck on and deliver what was found.
    ///
    /// Users are processed one after another; a failing user is logged and
    /// the scan moves on.
    pub async fn scan_all(&self) -> ScanSummary {
        let users = self.accounts.active_users(|s| s.autocheck).await;
        let mut summary = ScanSummary::default();

        for user_id in users {
            match self.check_user(user_id).await {
                Ok(report) => {
                    summary.users_checked += 1;
                    summary.emails += report.processed.len();
                    summary.new_events += report.new_event_count();
                    summary.message_failures += report.failures.len();
                    for processed in report.processed {
                        self.deliver(user_id, processed).await;
                    }
                }
                Err(e) => {
                    summary.users_failed += 1;
                    error!(user_id, error = %e, "Mail check failed");
                }
            }
        }

        if summary.emails > 0 || summary.users_failed > 0 {
            info!(
                users = summary.users_checked,
                failed = summary.users_failed,
                emails = summary.emails,
                new_events = summary.new_events,
                "Mail scan finished"
            );
        }
        summary
    }

    async fn deliver(&self, user_id: i64, processed: ProcessedEmail) {
        let delivery = EmailDelivery {
            message_link: self.settings.webmail.message_link(&processed.email),
            mailbox_link: self.settings.webmail.mailbox_link().map(str::to_string),
            email: processed.email,
            new_events: processed.new_events,
        };
        if let Err(e) = self.notifier.email_received(user_id, &delivery).await {
            error!(user_id, id = %delivery.email.id, error = %e, "Email delivery failed");
        }
    }

    /// Deliver due reminders; returns how many were delivered.
    pub async fn send_reminders(&self) -> usize {
        let due = self.events.due_for_reminder().await;
        self.deliver_reminders(due).await
    }

    pub async fn send_reminders_on(&self, today: NaiveDate) -> usize {
        let due = self.events.due_for_reminder_on(today).await;
        self.deliver_reminders(due).await
    }

    async fn deliver_reminders(&self, due: Vec<DueReminder>) -> usize {
        let mut sent = 0;
        for reminder in due {
            let wanted = self
                .accounts
                .settings(reminder.user_id)
                .await
                .is_some_and(|s| s.reminders);
            if !wanted {
                continue;
            }

            match self.notifier.reminder_due(&reminder).await {
                Ok(()) => {
                    self.events
                        .mark_reminder_sent(reminder.user_id, &reminder.event.id)
                        .await;
                    sent += 1;
                }
                Err(e) => warn!(
                    user_id = reminder.user_id,
                    event_id = %reminder.event.id,
                    error = %e,
                    "Reminder not delivered, will retry"
                ),
            }
        }
        sent
    }

    /// Apply the retention horizon to events and to spooled attachments.
    pub async fn prune(&self) -> usize {
        let horizon = Duration::from_secs(u64::from(self.settings.retention_days) * SECS_PER_DAY);
        let spool = self.decoder.spool().clone();
        match tokio::task::spawn_blocking(move || spool.sweep_older_than(horizon)).await {
            Ok(swept) if swept > 0 => debug!(swept, "Swept expired attachments"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Attachment sweep task failed"),
        }
        self.events.prune_older_than(self.settings.retention_days).await
    }

    /// Remove a user's credential, events, cached emails and their spooled
    /// attachments.
    pub async fn delete_account(&self, user_id: i64) -> bool {
        let existed = self.accounts.remove(user_id).await;
        let events = self.events.remove_user(user_id).await;
        let cached = self.cache.remove_user(user_id).await;
        let spool = self.decoder.spool();
        let released: usize = cached.iter().map(|e| spool.release(&e.attachments)).sum();
        info!(user_id, existed, events, cached = cached.len(), released, "Account deleted");
        existed
    }

    /// A previously delivered email, by transient id.
    pub async fn cached_email(&self, user_id: i64, id: &str) -> Option<StructuredEmail> {
        self.cache.get(user_id, id).await
    }

    pub async fn upcoming(&self, user_id: i64, days: u32) -> Vec<UpcomingEvent> {
        self.events.upcoming(user_id, days).await
    }

    pub async fn stats(&self, user_id: i64) -> UserStats {
        UserStats {
            total_events: self.events.event_count(user_id).await,
            upcoming_week: self.events.upcoming(user_id, STATS_WINDOW_DAYS).await.len(),
            registered_users: self.accounts.len().await,
        }
    }
}

/// One mailbox pass: open, list, fetch+decode each message, close.
///
/// Runs on a blocking thread. A broken connection ends the batch early;
/// the unfetched messages stay unseen for the next scan.
fn fetch_batch(
    connector: &dyn MailConnector,
    credential: &MailCredential,
    limit: usize,
    decoder: &MessageDecoder,
) -> std::result::Result<Vec<std::result::Result<StructuredEmail, MessageFailure>>, crate::error::ConnectionError> {
    let mut session = connector.open(credential)?;
    let handles = match session.list_unseen(limit) {
        Ok(handles) => handles,
        Err(e) => {
            session.close();
            return Err(e);
        }
    };

    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        let id = handle.seq.to_string();
        let raw = match session.fetch(handle) {
            Ok(raw) => raw,
            Err(FetchError::Connection(e)) => {
                out.push(Err(MessageFailure {
                    id,
                    error: Error::Connection(e),
                }));
                break;
            }
            Err(e) => {
                out.push(Err(MessageFailure { id, error: e.into() }));
                continue;
            }
        };

        match decoder.decode(&raw, &id) {
            Ok(mut email) => {
                email.uid = session.fetch_uid(handle);
                out.push(Ok(email));
            }
            Err(e) => out.push(Err(MessageFailure { id, error: e.into() })),
        }
    }

    session.close();
    Ok(out)
}
