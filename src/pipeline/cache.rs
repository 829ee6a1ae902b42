//! Process-lifetime cache of delivered emails, for "show full text" lookups.
//!
//! Keyed by (user, transient id). Entries live until the process exits,
//! they are replaced, or the user's account is deleted.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::mail::types::StructuredEmail;

#[derive(Default)]
pub struct EmailCache {
    emails: RwLock<HashMap<(i64, String), StructuredEmail>>,
}

impl EmailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the replaced email. A later session may
    /// reuse a sequence id for a different message; the newest wins.
    pub async fn insert(&self, user_id: i64, email: StructuredEmail) -> Option<StructuredEmail> {
        self.emails
            .write()
            .await
            .insert((user_id, email.id.clone()), email)
    }

    pub async fn get(&self, user_id: i64, id: &str) -> Option<StructuredEmail> {
        self.emails
            .read()
            .await
            .get(&(user_id, id.to_string()))
            .cloned()
    }

    /// Drop every cached email of a user and hand them back.
    pub async fn remove_user(&self, user_id: i64) -> Vec<StructuredEmail> {
        let mut emails = self.emails.write().await;
        let keys: Vec<_> = emails.keys().filter(|(owner, _)| *owner == user_id).cloned().collect();
        keys.into_iter().filter_map(|key| emails.remove(&key)).collect()
    }

    pub async fn len(&self) -> usize {
        self.emails.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.emails.read().await.is_empty()
    }
}
