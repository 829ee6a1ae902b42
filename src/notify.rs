//! Downstream notification contract.
//!
//! The assistant hands each processed email (with any new events) and each
//! due reminder to a [`Notifier`]. Formatting and delivery belong to the
//! front end implementing it.

use async_trait::async_trait;
use tracing::info;

use crate::error::NotifyError;
use crate::events::{DueReminder, Event};
use crate::mail::types::StructuredEmail;

/// One processed email ready for delivery.
#[derive(Debug, Clone)]
pub struct EmailDelivery {
    pub email: StructuredEmail,
    /// Events first discovered in this email.
    pub new_events: Vec<Event>,
    /// Direct webmail link to the message, when one can be built.
    pub message_link: Option<String>,
    /// Webmail mailbox link, when configured.
    pub mailbox_link: Option<String>,
}

/// Front-end delivery of assistant output to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one processed email.
    async fn email_received(&self, user_id: i64, delivery: &EmailDelivery) -> Result<(), NotifyError>;

    /// Deliver an event reminder. The reminder is only marked sent on `Ok`.
    async fn reminder_due(&self, reminder: &DueReminder) -> Result<(), NotifyError>;
}

/// Notifier that only writes to the log. Used by the standalone binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn email_received(&self, user_id: i64, delivery: &EmailDelivery) -> Result<(), NotifyError> {
        let email = &delivery.email;
        info!(
            user_id,
            id = %email.id,
            uid = ?email.uid,
            from = %email.from,
            subject = %email.subject,
            date = %email.date,
            attachments = email.attachments.len(),
            new_events = delivery.new_events.len(),
            link = delivery.message_link.as_deref().unwrap_or("-"),
            "New email"
        );
        for event in &delivery.new_events {
            info!(user_id, event_id = %event.id, date = %event.date, title = %event.title, "New event");
        }
        Ok(())
    }

    async fn reminder_due(&self, reminder: &DueReminder) -> Result<(), NotifyError> {
        let event = &reminder.event;
        if reminder.days_until == 0 {
            info!(user_id = reminder.user_id, event_id = %event.id, title = %event.title, "Event is today");
        } else {
            info!(
                user_id = reminder.user_id,
                event_id = %event.id,
                title = %event.title,
                date = %event.date.format("%d.%m.%Y"),
                days_left = reminder.days_until,
                "Event reminder"
            );
        }
        Ok(())
    }
}
