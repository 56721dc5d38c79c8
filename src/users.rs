//! User directory
//!
//! Every interaction creates or refreshes the sender's record. Records are
//! never deleted; broadcast uses them as its recipient list.

use chrono::{DateTime, Utc};

use crate::models::{UserRecord, UsersDocument};
use crate::store::{Collection, Documents};

/// Identity of whoever sent an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Sender {
    pub fn new(id: i64, first_name: &str) -> Self {
        Self {
            id,
            first_name: first_name.to_string(),
            last_name: None,
            username: None,
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }
}

#[derive(Clone)]
pub struct UserDirectory {
    docs: Documents,
}

impl UserDirectory {
    pub fn new(docs: Documents) -> Self {
        Self { docs }
    }

    /// Create or refresh a user record
    pub fn touch(&self, sender: &Sender) -> UserRecord {
        self.touch_at(sender, Utc::now())
    }

    pub fn touch_at(&self, sender: &Sender, now: DateTime<Utc>) -> UserRecord {
        self.docs.update(Collection::Users, |doc: &mut UsersDocument| {
            let record = doc.users.entry(sender.id.to_string()).or_default();
            record.user_id = sender.id;
            record.first_name = sender.first_name.clone();
            record.last_name = sender.last_name.clone();
            record.username = sender.username.clone();
            record.last_active = now;
            record.clone()
        })
    }

    pub fn get(&self, user_id: i64) -> Option<UserRecord> {
        let doc: UsersDocument = self.docs.load(Collection::Users);
        doc.users.get(&user_id.to_string()).cloned()
    }

    /// Flag a user as linked to a web account; false if unknown
    pub fn mark_verified(&self, user_id: i64) -> bool {
        self.docs.update(Collection::Users, |doc: &mut UsersDocument| {
            match doc.users.get_mut(&user_id.to_string()) {
                Some(record) => {
                    record.verified = true;
                    true
                }
                None => false,
            }
        })
    }

    pub fn is_verified(&self, user_id: i64) -> bool {
        self.get(user_id).is_some_and(|u| u.verified)
    }

    /// Ids of every known user
    pub fn ids(&self) -> Vec<i64> {
        let doc: UsersDocument = self.docs.load(Collection::Users);
        doc.users.keys().filter_map(|k| k.parse().ok()).collect()
    }

    pub fn count(&self) -> usize {
        let doc: UsersDocument = self.docs.load(Collection::Users);
        doc.users.len()
    }

    /// Most recently active users first
    pub fn recent(&self, limit: usize) -> Vec<UserRecord> {
        let doc: UsersDocument = self.docs.load(Collection::Users);
        let mut users: Vec<UserRecord> = doc.users.into_values().collect();
        users.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        users.truncate(limit);
        users
    }
}
