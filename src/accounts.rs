//! Account store: user id → encrypted mail credential and settings.
//!
//! Persisted as one JSON document keyed by user id strings. Passwords are
//! only ever written in vault-encrypted form.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::VaultError;
use crate::mail::types::MailCredential;
use crate::store::JsonFile;
use crate::vault::CredentialVault;

fn yes() -> bool {
    true
}

/// Per-user switches for the background loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Include this user in periodic mail scans.
    #[serde(default = "yes")]
    pub autocheck: bool,
    /// Deliver event reminders to this user.
    #[serde(default = "yes")]
    pub reminders: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            autocheck: true,
            reminders: true,
        }
    }
}

/// One stored account as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountRecord {
    login: String,
    password_encrypted: String,
    /// Missing in records written before custom servers were supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server_port: Option<u16>,
    #[serde(default = "yes")]
    active: bool,
    #[serde(default)]
    settings: UserSettings,
}

/// Registered users and their credentials.
pub struct AccountStore {
    accounts: RwLock<BTreeMap<i64, AccountRecord>>,
    file: JsonFile,
    vault: Arc<CredentialVault>,
    default_host: String,
    default_port: u16,
}

impl AccountStore {
    /// Load accounts from `path`. Records without a server use the defaults.
    pub fn load(
        path: impl Into<PathBuf>,
        vault: Arc<CredentialVault>,
        default_host: impl Into<String>,
        default_port: u16,
    ) -> Arc<Self> {
        let file = JsonFile::new(path);
        let accounts = match file.read::<BTreeMap<String, AccountRecord>>() {
            Ok(Some(raw)) => raw
                .into_iter()
                .filter_map(|(key, record)| match key.trim().parse::<i64>() {
                    Ok(id) => Some((id, record)),
                    Err(_) => {
                        warn!(key = %key, "Skipping account under non-numeric user key");
                        None
                    }
                })
                .collect(),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                error!(error = %e, "Failed to load accounts, starting empty");
                BTreeMap::new()
            }
        };

        info!(path = %file.path().display(), users = accounts.len(), "Account store loaded");

        Arc::new(Self {
            accounts: RwLock::new(accounts),
            file,
            vault,
            default_host: default_host.into(),
            default_port,
        })
    }

    /// Store (or replace) a user's credential. Existing settings are kept.
    pub async fn upsert(&self, user_id: i64, credential: &MailCredential) -> Result<(), VaultError> {
        let password_encrypted = self.vault.encrypt(&credential.password)?;

        let mut accounts = self.accounts.write().await;
        let settings = accounts
            .get(&user_id)
            .map(|r| r.settings)
            .unwrap_or_default();
        accounts.insert(
            user_id,
            AccountRecord {
                login: credential.login.clone(),
                password_encrypted,
                server_host: Some(credential.server_host.clone()),
                server_port: Some(credential.server_port),
                active: true,
                settings,
            },
        );

        info!(user_id, login = %credential.login, host = %credential.server_host, "Stored account");
        self.persist(&accounts).await;
        Ok(())
    }

    /// Decrypted credential for a user, if registered.
    pub async fn credential(&self, user_id: i64) -> Result<Option<MailCredential>, VaultError> {
        let accounts = self.accounts.read().await;
        let Some(record) = accounts.get(&user_id) else {
            return Ok(None);
        };

        let password: SecretString = self.vault.decrypt(&record.password_encrypted)?;
        Ok(Some(MailCredential {
            login: record.login.clone(),
            password,
            server_host: record
                .server_host
                .clone()
                .unwrap_or_else(|| self.default_host.clone()),
            server_port: record.server_port.unwrap_or(self.default_port),
        }))
    }

    /// Forget a user. Returns false if they were not registered.
    pub async fn remove(&self, user_id: i64) -> bool {
        let mut accounts = self.accounts.write().await;
        if accounts.remove(&user_id).is_none() {
            return false;
        }
        info!(user_id, "Removed account");
        self.persist(&accounts).await;
        true
    }

    pub async fn contains(&self, user_id: i64) -> bool {
        self.accounts.read().await.contains_key(&user_id)
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Active users whose settings satisfy `wanted`, in id order.
    pub async fn active_users(&self, wanted: impl Fn(&UserSettings) -> bool) -> Vec<i64> {
        self.accounts
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.active && wanted(&r.settings))
            .map(|(&id, _)| id)
            .collect()
    }

    pub async fn settings(&self, user_id: i64) -> Option<UserSettings> {
        self.accounts.read().await.get(&user_id).map(|r| r.settings)
    }

    /// Replace a user's settings. Returns false for unknown users.
    pub async fn update_settings(&self, user_id: i64, settings: UserSettings) -> bool {
        let mut accounts = self.accounts.write().await;
        let Some(record) = accounts.get_mut(&user_id) else {
            return false;
        };
        record.settings = settings;
        info!(user_id, autocheck = settings.autocheck, reminders = settings.reminders, "Updated settings");
        self.persist(&accounts).await;
        true
    }

    async fn persist(&self, accounts: &BTreeMap<i64, AccountRecord>) {
        if let Err(e) = self.file.save(accounts).await {
            error!(error = %e, "Failed to save accounts, keeping in-memory state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    fn vault() -> Arc<CredentialVault> {
        Arc::new(CredentialVault::from_bytes(&[7u8; 32]).unwrap())
    }

    fn credential(password: &str) -> MailCredential {
        MailCredential {
            login: "ivan@example.com".into(),
            password: SecretString::from(password.to_string()),
            server_host: "imap.example.com".into(),
            server_port: 993,
        }
    }

    fn store(tmp: &TempDir) -> Arc<AccountStore> {
        AccountStore::load(tmp.path().join("users.json"), vault(), "localhost", 993)
    }

    #[tokio::test]
    async fn upsert_then_read_back() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.upsert(5, &credential("пароль-123")).await.unwrap();
        let cred = store.credential(5).await.unwrap().unwrap();
        assert_eq!(cred.login, "ivan@example.com");
        assert_eq!(cred.password.expose_secret(), "пароль-123");
        assert_eq!(cred.server_host, "imap.example.com");
        assert_eq!(cred.server_port, 993);
        assert!(store.credential(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_never_contains_plaintext_password() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert(5, &credential("hunter2-secret")).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("users.json")).unwrap();
        assert!(raw.contains("\"5\""));
        assert!(raw.contains("password_encrypted"));
        assert!(!raw.contains("hunter2-secret"));
    }

    #[tokio::test]
    async fn reload_with_same_key() {
        let tmp = TempDir::new().unwrap();
        store(&tmp).upsert(5, &credential("s3cret")).await.unwrap();

        let reloaded = store(&tmp);
        let cred = reloaded.credential(5).await.unwrap().unwrap();
        assert_eq!(cred.password.expose_secret(), "s3cret");
    }

    #[tokio::test]
    async fn wrong_key_is_a_vault_error() {
        let tmp = TempDir::new().unwrap();
        store(&tmp).upsert(5, &credential("s3cret")).await.unwrap();

        let other = Arc::new(CredentialVault::from_bytes(&[9u8; 32]).unwrap());
        let reloaded = AccountStore::load(tmp.path().join("users.json"), other, "localhost", 993);
        assert!(reloaded.credential(5).await.is_err());
    }

    #[tokio::test]
    async fn legacy_record_uses_default_server() {
        let tmp = TempDir::new().unwrap();
        let v = vault();
        let encrypted = v.encrypt(&SecretString::from("old".to_string())).unwrap();
        std::fs::write(
            tmp.path().join("users.json"),
            format!(r#"{{"12": {{"login": "old@example.com", "password_encrypted": "{encrypted}", "active": true}}}}"#),
        )
        .unwrap();

        let store = AccountStore::load(tmp.path().join("users.json"), v, "mail.example.org", 143);
        let cred = store.credential(12).await.unwrap().unwrap();
        assert_eq!(cred.server_host, "mail.example.org");
        assert_eq!(cred.server_port, 143);
        assert_eq!(store.settings(12).await, Some(UserSettings::default()));
    }

    #[tokio::test]
    async fn settings_survive_credential_update() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert(1, &credential("a")).await.unwrap();

        let quiet = UserSettings {
            autocheck: false,
            reminders: true,
        };
        assert!(store.update_settings(1, quiet).await);
        assert!(!store.update_settings(2, quiet).await);

        store.upsert(1, &credential("b")).await.unwrap();
        assert_eq!(store.settings(1).await, Some(quiet));
    }

    #[tokio::test]
    async fn active_users_filtered_by_settings() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert(3, &credential("a")).await.unwrap();
        store.upsert(1, &credential("a")).await.unwrap();
        store.upsert(2, &credential("a")).await.unwrap();
        store
            .update_settings(
                2,
                UserSettings {
                    autocheck: false,
                    reminders: true,
                },
            )
            .await;

        assert_eq!(store.active_users(|s| s.autocheck).await, vec![1, 3]);
        assert_eq!(store.active_users(|s| s.reminders).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn remove_account() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.upsert(1, &credential("a")).await.unwrap();

        assert!(store.remove(1).await);
        assert!(!store.remove(1).await);
        assert!(store.is_empty().await);
        assert!(store.credential(1).await.unwrap().is_none());
    }
}
