//! Webmail deep links for delivered emails.

use crate::config::WebmailConfig;
use crate::mail::types::StructuredEmail;

/// Webmail front ends with a known per-message URL scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WebmailKind {
    #[default]
    Generic,
    Roundcube,
    Squirrelmail,
    Iredmail,
}

impl WebmailKind {
    /// Case-insensitive; unknown names are treated as generic.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "roundcube" => Self::Roundcube,
            "squirrelmail" => Self::Squirrelmail,
            "iredmail" => Self::Iredmail,
            _ => Self::Generic,
        }
    }
}

impl WebmailConfig {
    /// Direct link to one message, when one can be built.
    ///
    /// An explicit `{uid}` template wins; otherwise the webmail flavour
    /// decides. Only SquirrelMail links by sequence id, everything else
    /// needs the stable UID.
    pub fn message_link(&self, email: &StructuredEmail) -> Option<String> {
        let base = self.base_url.trim_end_matches('/');

        if !self.message_url.is_empty()
            && let Some(uid) = email.uid
        {
            return Some(self.message_url.replace("{uid}", &uid.to_string()));
        }
        if base.is_empty() {
            return None;
        }

        match (self.kind, email.uid) {
            (WebmailKind::Roundcube, Some(uid)) => Some(format!(
                "{base}/?_task=mail&_action=show&_uid={uid}&_mbox=INBOX"
            )),
            (WebmailKind::Iredmail, Some(uid)) => Some(format!(
                "{base}/mail/?_task=mail&_action=show&_uid={uid}&_mbox=INBOX"
            )),
            (WebmailKind::Squirrelmail, _) if !email.id.is_empty() => Some(format!(
                "{base}/src/read_body.php?mailbox=INBOX&passed_id={}",
                email.id
            )),
            _ => None,
        }
    }

    /// Link to the mailbox itself, if a base URL is configured.
    pub fn mailbox_link(&self) -> Option<&str> {
        (!self.base_url.is_empty()).then_some(self.base_url.as_str())
    }
}
