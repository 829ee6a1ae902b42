//! Message Decoder: raw RFC 822 bytes → [`StructuredEmail`].
//!
//! `mail-parser` does the MIME walk and transfer/charset decoding of part
//! bodies. Display headers are decoded from the raw bytes by [`header`] so a
//! broken encoded-word degrades to lossy text instead of vanishing.

pub mod attachment;
pub mod header;
pub mod html;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use crate::error::DecodeError;
use crate::mail::types::{
    Attachment, EXCERPT_CHARS, StructuredEmail, preview_of, truncate_chars,
};

pub use attachment::AttachmentSpool;

/// What a non-container part contributes to the decoded message.
enum PartRole {
    Attachment,
    PlainBody,
    HtmlBody,
    Other,
}

/// Decodes fetched messages and spools their attachments.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    spool: AttachmentSpool,
}

impl MessageDecoder {
    pub fn new(spool: AttachmentSpool) -> Self {
        Self { spool }
    }

    pub fn spool(&self) -> &AttachmentSpool {
        &self.spool
    }

    /// Decode one raw message. `id` is the transient mailbox identifier.
    pub fn decode(&self, raw: &[u8], id: &str) -> Result<StructuredEmail, DecodeError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty { id: id.to_string() });
        }
        let message = MessageParser::default()
            .parse(raw)
            .filter(|m| !m.parts.is_empty())
            .ok_or_else(|| DecodeError::Malformed { id: id.to_string() })?;

        let header = |name: &str| {
            header::raw_header(raw, name)
                .map(|v| header::decode_header(&v))
                .unwrap_or_default()
        };
        let date = header::raw_header(raw, "Date").unwrap_or_default();
        let timestamp = DateTime::parse_from_rfc2822(&date)
            .ok()
            .map(|d| d.with_timezone(&Utc));

        let mut plain: Option<String> = None;
        let mut html: Option<String> = None;
        let mut attachments: Vec<Attachment> = Vec::new();

        for part in &message.parts {
            match classify(part) {
                PartRole::Attachment => attachments.push(self.spool_part(part)),
                PartRole::PlainBody if plain.is_none() => {
                    plain = part_text(part).filter(|t| !t.trim().is_empty());
                }
                PartRole::HtmlBody if html.is_none() => {
                    html = part_text(part).filter(|t| !t.trim().is_empty());
                }
                _ => {}
            }
        }

        let full_body = plain
            .or_else(|| html.map(|h| html::html_to_text(&h)))
            .unwrap_or_default();

        debug!(
            id,
            parts = message.parts.len(),
            attachments = attachments.len(),
            body_chars = full_body.chars().count(),
            "Decoded message"
        );

        Ok(StructuredEmail {
            id: id.to_string(),
            uid: None,
            message_id: message.message_id().map(str::to_string),
            subject: header("Subject"),
            from: header("From"),
            to: header("To"),
            cc: header("Cc"),
            date,
            timestamp,
            preview: preview_of(&full_body),
            excerpt: truncate_chars(&full_body, EXCERPT_CHARS).to_string(),
            full_body,
            attachments,
        })
    }

    fn spool_part(&self, part: &MessagePart<'_>) -> Attachment {
        let filename = part.attachment_name().unwrap_or("attachment");
        self.spool.store(filename, &mime_type(part), part.contents())
    }
}

fn classify(part: &MessagePart<'_>) -> PartRole {
    let content_type = part.content_type();
    if let Some(ct) = content_type
        && ct.ctype().eq_ignore_ascii_case("multipart")
    {
        return PartRole::Other;
    }
    if matches!(part.body, PartType::Multipart(_)) {
        return PartRole::Other;
    }

    let disposed = part
        .content_disposition()
        .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"));
    if disposed || part.attachment_name().is_some() {
        return PartRole::Attachment;
    }

    // No Content-Type means text/plain
    let Some(ct) = content_type else {
        return PartRole::PlainBody;
    };
    if !ct.ctype().eq_ignore_ascii_case("text") {
        return PartRole::Other;
    }
    match ct.subtype() {
        None => PartRole::PlainBody,
        Some(sub) if sub.eq_ignore_ascii_case("plain") => PartRole::PlainBody,
        Some(sub) if sub.eq_ignore_ascii_case("html") => PartRole::HtmlBody,
        Some(_) => PartRole::Other,
    }
}

/// Decoded text of a body part; binary payloads fall back to lossy UTF-8.
fn part_text(part: &MessagePart<'_>) -> Option<String> {
    match &part.body {
        PartType::Text(text) | PartType::Html(text) => Some(text.to_string()),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        PartType::Message(_) | PartType::Multipart(_) => None,
    }
}

fn mime_type(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
            None => ct.ctype().to_ascii_lowercase(),
        },
        None => "application/octet-stream".to_string(),
    }
}
