//! Ingestion pipeline: mailbox checks, event extraction, delivery and the
//! background loops driving them.

pub mod assistant;
pub mod cache;
pub mod loops;

pub use assistant::{
    AssistantSettings, CheckReport, MailAssistant, MessageFailure, ProcessedEmail, ScanSummary,
    UserStats,
};
pub use cache::EmailCache;
pub use loops::{spawn_mail_scanner, spawn_reminder_loop};
