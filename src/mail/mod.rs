//! Mail sessions over IMAP with implicit TLS, plus the mail-side data types.

pub mod protocol;
pub mod session;
pub mod types;

pub use session::{ImapConnector, ImapSession, MailConnector, MailSession};
pub use types::{Attachment, MailCredential, MessageHandle, StructuredEmail};
