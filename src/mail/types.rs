//! Mail-side data types: structured emails, attachments and message handles.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Characters kept in `StructuredEmail::preview` before the ellipsis.
pub const PREVIEW_CHARS: usize = 200;

/// Characters kept in `StructuredEmail::excerpt` for downstream analysis.
pub const EXCERPT_CHARS: usize = 1000;

/// Attachments at or above this size are never held in memory.
pub const INLINE_ATTACHMENT_LIMIT: usize = 1024 * 1024;

/// Decrypted credentials for one mail account. Lives only in memory.
#[derive(Debug, Clone)]
pub struct MailCredential {
    pub login: String,
    pub password: SecretString,
    pub server_host: String,
    pub server_port: u16,
}

/// A message in the selected mailbox, addressed by sequence number.
///
/// Sequence numbers are only meaningful inside the session that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub seq: u32,
}

impl MessageHandle {
    pub fn new(seq: u32) -> Self {
        Self { seq }
    }
}

/// Metadata for one attachment of a decoded message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: usize,
    /// Where the payload was spooled, if spooling succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_ref: Option<PathBuf>,
    /// Payload kept in memory for attachments under 1 MiB.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

/// A fetched message reduced to the fields the assistant works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredEmail {
    /// Mailbox sequence number; not stable across sessions.
    pub id: String,
    /// Stable per-mailbox UID, when the server reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub subject: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub cc: String,
    /// `Date` header exactly as sent.
    pub date: String,
    /// `Date` header parsed, when it is valid RFC 2822.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// First 200 characters of the body, with `...` when cut.
    pub preview: String,
    /// First 1000 characters of the body.
    pub excerpt: String,
    pub full_body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl StructuredEmail {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// First `max` characters of `s` (char-boundary safe).
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Body preview: first 200 characters plus `...` when the body is longer.
pub fn preview_of(body: &str) -> String {
    let cut = truncate_chars(body, PREVIEW_CHARS);
    if cut.len() < body.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    }
}
