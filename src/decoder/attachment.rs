//! Attachment spooling.
//!
//! Payloads of 1 MiB and more are written to their own file under the
//! spool directory; smaller ones stay in memory only. Spooled files are
//! released with their email or swept once older than the retention horizon.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::mail::types::{Attachment, INLINE_ATTACHMENT_LIMIT};

/// File name prefix of every spooled payload.
const SPOOL_PREFIX: &str = "att";

/// Writes large attachment payloads into a directory and describes them.
#[derive(Debug, Clone)]
pub struct AttachmentSpool {
    dir: PathBuf,
}

impl AttachmentSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Spool under `<os temp dir>/mail-assist`.
    pub fn temp() -> Self {
        Self::new(std::env::temp_dir().join("mail-assist"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store one payload and build its metadata.
    ///
    /// Spooling failures are logged and leave `storage_ref` empty; the
    /// attachment is still reported.
    pub fn store(&self, filename: &str, content_type: &str, payload: &[u8]) -> Attachment {
        let mut attachment = Attachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size_bytes: payload.len(),
            storage_ref: None,
            data: None,
        };
        if payload.len() < INLINE_ATTACHMENT_LIMIT {
            attachment.data = Some(payload.to_vec());
            return attachment;
        }

        match self.write_payload(filename, payload) {
            Ok(path) => {
                debug!(filename, path = %path.display(), size = payload.len(), "Spooled attachment");
                attachment.storage_ref = Some(path);
            }
            Err(e) => warn!(filename, error = %e, "Failed to spool attachment"),
        }
        attachment
    }

    /// Delete the spooled files of `attachments`. Returns how many went.
    pub fn release(&self, attachments: &[Attachment]) -> usize {
        attachments
            .iter()
            .filter_map(|a| a.storage_ref.as_deref())
            .filter(|path| path.starts_with(&self.dir))
            .filter(|path| match std::fs::remove_file(path) {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove spooled attachment");
                    false
                }
            })
            .count()
    }

    /// Delete spooled files last modified more than `max_age` ago.
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to read attachment spool");
                return 0;
            }
        };
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(SPOOL_PREFIX) {
                continue;
            }
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age);
            if !expired {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to sweep spooled attachment"),
            }
        }

        if removed > 0 {
            debug!(removed, dir = %self.dir.display(), "Swept attachment spool");
        }
        removed
    }

    fn write_payload(&self, filename: &str, payload: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let suffix = format!("_{}", sanitize_filename(filename));
        let mut file = tempfile::Builder::new()
            .prefix(SPOOL_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        file.write_all(payload)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

/// Keep a filename usable as a path suffix: no separators, no control chars.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    // Long names blow past filesystem limits
    crate::mail::types::truncate_chars(trimmed, 100).to_string()
}
