//! Error types for Mail Assist.

use std::io;
use std::path::PathBuf;

/// Errors returned by assistant operations.
///
/// Configuration errors surface at startup on their own; persistence and
/// notification failures are logged where they happen and never escalate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("No mail account registered for user {0}")]
    UnknownUser(i64),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Anything that goes wrong opening or driving a mail session.
///
/// Authentication, network, TLS and protocol failures share this one type so
/// callers can decide about retries without caring which layer failed.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("Timed out talking to the mail server")]
    Timeout,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Cannot resolve mail server {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("Authentication failed for {login}")]
    AuthFailed { login: String },

    #[error("Server rejected {command}: {reason}")]
    Rejected { command: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server closed the connection")]
    Closed,
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(err),
        }
    }
}

/// Failure fetching one message from an open session.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Server returned no message body for #{seq}")]
    MissingBody { seq: u32 },

    #[error("Server rejected fetch of #{seq}: {reason}")]
    Rejected { seq: u32, reason: String },
}

/// A single message could not be turned into a `StructuredEmail`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message #{id} is empty")]
    Empty { id: String },

    #[error("Message #{id} is not a parseable RFC 822 message")]
    Malformed { id: String },
}

/// JSON document read/write failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error on {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Credential vault errors.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    #[error("Failed to encrypt secret")]
    Encrypt,

    #[error("Failed to decrypt secret: {0}")]
    Decrypt(String),

    #[error("Random number generator failure")]
    Random,
}

/// Delivery failures reported by a `Notifier`.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification to user {user_id}: {reason}")]
    SendFailed { user_id: i64, reason: String },
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
