//! Configuration, read once at startup from the environment (`.env` honoured).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::links::WebmailKind;

/// Default IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Where and how the webmail front end is reached, for deep links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebmailConfig {
    /// Mailbox landing page, e.g. `https://mail.example.com`.
    pub base_url: String,
    /// Message URL template containing `{uid}`.
    pub message_url: String,
    pub kind: WebmailKind,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub users_file: PathBuf,
    pub events_file: PathBuf,
    /// Directory attachments are spooled into.
    pub spool_dir: PathBuf,
    /// Base64 vault key. `None` means one has to be generated.
    pub master_key: Option<SecretString>,
    /// Server used when a registration does not name one.
    pub imap_host: String,
    pub imap_port: u16,
    /// Connect, read and write timeout of a mail session.
    pub imap_timeout: Duration,
    pub check_interval: Duration,
    pub reminder_interval: Duration,
    /// Unseen messages fetched per user per scan.
    pub fetch_limit: usize,
    /// Events dated further back than this many days are pruned.
    pub retention_days: u32,
    pub webmail: WebmailConfig,
    /// Directory for a daily rolling log file, if any.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = PathBuf::from(get("MAIL_ASSIST_DATA_DIR").unwrap_or_else(|| "./data".into()));
        let users_file = get("MAIL_ASSIST_USERS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("users_data.json"));
        let events_file = get("MAIL_ASSIST_EVENTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("events.json"));
        let spool_dir = get("MAIL_ASSIST_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("mail-assist"));

        let webmail = WebmailConfig {
            base_url: get("WEBMAIL_BASE_URL").unwrap_or_default(),
            message_url: get("WEBMAIL_MESSAGE_URL").unwrap_or_default(),
            kind: get("WEBMAIL_TYPE")
                .map(|t| WebmailKind::parse(&t))
                .unwrap_or_default(),
        };

        Ok(Self {
            data_dir,
            users_file,
            events_file,
            spool_dir,
            master_key: get("MASTER_KEY").map(SecretString::from),
            imap_host: get("IMAP_SERVER").unwrap_or_else(|| "localhost".into()),
            imap_port: parse_or(&get, "IMAP_PORT", DEFAULT_IMAP_PORT)?,
            imap_timeout: seconds(&get, "IMAP_TIMEOUT_SECS", 30)?,
            check_interval: seconds(&get, "CHECK_INTERVAL_SECS", 300)?,
            reminder_interval: seconds(&get, "REMINDER_INTERVAL_SECS", 3600)?,
            fetch_limit: positive(&get, "FETCH_LIMIT", 5)?,
            retention_days: parse_or(&get, "EVENT_RETENTION_DAYS", 30)?,
            webmail,
            log_dir: get("MAIL_ASSIST_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

/// A strictly positive count.
fn positive<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_or(get, key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn seconds(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    positive(get, key, default).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.users_file, PathBuf::from("./data/users_data.json"));
        assert_eq!(cfg.events_file, PathBuf::from("./data/events.json"));
        assert!(cfg.master_key.is_none());
        assert_eq!(cfg.imap_host, "localhost");
        assert_eq!(cfg.imap_port, 993);
        assert_eq!(cfg.imap_timeout, Duration::from_secs(30));
        assert_eq!(cfg.check_interval, Duration::from_secs(300));
        assert_eq!(cfg.reminder_interval, Duration::from_secs(3600));
        assert_eq!(cfg.fetch_limit, 5);
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.webmail, WebmailConfig::default());
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn files_follow_data_dir_unless_overridden() {
        let cfg = config(&[
            ("MAIL_ASSIST_DATA_DIR", "/var/lib/ma"),
            ("MAIL_ASSIST_EVENTS_FILE", "/tmp/ev.json"),
        ])
        .unwrap();
        assert_eq!(cfg.users_file, PathBuf::from("/var/lib/ma/users_data.json"));
        assert_eq!(cfg.events_file, PathBuf::from("/tmp/ev.json"));
    }

    #[test]
    fn explicit_values_parsed() {
        let cfg = config(&[
            ("MASTER_KEY", " abc "),
            ("IMAP_SERVER", "mail.example.com"),
            ("IMAP_PORT", "143"),
            ("CHECK_INTERVAL_SECS", "60"),
            ("FETCH_LIMIT", "20"),
            ("EVENT_RETENTION_DAYS", "0"),
            ("WEBMAIL_TYPE", "RoundCube"),
            ("WEBMAIL_BASE_URL", "https://mail.example.com"),
        ])
        .unwrap();
        assert_eq!(cfg.master_key.unwrap().expose_secret(), "abc");
        assert_eq!(cfg.imap_host, "mail.example.com");
        assert_eq!(cfg.imap_port, 143);
        assert_eq!(cfg.check_interval, Duration::from_secs(60));
        assert_eq!(cfg.fetch_limit, 20);
        assert_eq!(cfg.retention_days, 0);
        assert_eq!(cfg.webmail.kind, WebmailKind::Roundcube);
        assert_eq!(cfg.webmail.base_url, "https://mail.example.com");
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let cfg = config(&[("MASTER_KEY", ""), ("IMAP_PORT", "  ")]).unwrap();
        assert!(cfg.master_key.is_none());
        assert_eq!(cfg.imap_port, 993);
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = config(&[("IMAP_PORT", "99999")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "IMAP_PORT"));

        let err = config(&[("FETCH_LIMIT", "five")]).unwrap_err();
        assert!(err.to_string().contains("FETCH_LIMIT"));
    }

    #[test]
    fn zero_interval_rejected() {
        let err = config(&[("CHECK_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CHECK_INTERVAL_SECS"));
        assert!(config(&[("FETCH_LIMIT", "0")]).is_err());
    }
}
