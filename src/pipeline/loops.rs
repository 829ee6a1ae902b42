//! Background loops: periodic mail scan and reminder delivery.
//!
//! Each loop runs on its own timer. Both return a `JoinHandle` and a
//! shutdown flag; setting the flag stops the loop at its next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::assistant::MailAssistant;

/// Scan all users' mailboxes every `interval`, starting immediately.
pub fn spawn_mail_scanner(
    assistant: Arc<MailAssistant>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Mail scanner started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mail scanner shutting down");
                return;
            }

            let summary = assistant.scan_all().await;
            debug!(?summary, "Scan tick done");
        }
    });

    (handle, shutdown_flag)
}

/// Prune old events and deliver due reminders every `interval`.
pub fn spawn_reminder_loop(
    assistant: Arc<MailAssistant>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Reminder loop started");
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Reminder loop shutting down");
                return;
            }

            let pruned = assistant.prune().await;
            let sent = assistant.send_reminders().await;
            if pruned > 0 || sent > 0 {
                info!(pruned, sent, "Reminder tick done");
            }
        }
    });

    (handle, shutdown_flag)
}
