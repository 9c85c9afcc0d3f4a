//! In-memory account store keyed by normalised email.

use std::time::SystemTime;

use cardex_core::{unix_seconds, AccountTier, Identity};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::SeedUser;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub account_tier: AccountTier,
    pub created_at: i64,
    pub last_login_at: Option<i64>,
}

impl UserRecord {
    /// A new free-tier account.
    pub fn new(
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        now: SystemTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            first_name,
            last_name,
            account_tier: AccountTier::Free,
            created_at: unix_seconds(now),
            last_login_at: None,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            subject_id: self.id.to_string(),
            email: self.email.clone(),
            account_tier: self.account_tier,
        }
    }
}

/// Trims and lowercases an email for use as a lookup key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: DashMap<String, UserRecord>,
    /// id -> email, written only after the email slot is claimed.
    ids: DashMap<Uuid, String>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &[SeedUser], now: SystemTime) -> Self {
        let store = Self::new();
        for user in seed {
            let mut record = UserRecord::new(
                normalize_email(&user.email),
                user.password_hash.clone(),
                user.first_name.clone(),
                user.last_name.clone(),
                now,
            );
            record.account_tier = user.account_tier;
            if store.insert(record).is_err() {
                tracing::warn!("Duplicate seed user ignored: {}", user.email);
            }
        }
        store
    }

    pub fn contains(&self, email: &str) -> bool {
        self.users.contains_key(email)
    }

    pub fn find(&self, email: &str) -> Option<UserRecord> {
        self.users.get(email).map(|r| r.value().clone())
    }

    pub fn find_by_id(&self, id: &str) -> Option<UserRecord> {
        let id = Uuid::parse_str(id).ok()?;
        let email = self.ids.get(&id)?.value().clone();
        self.find(&email)
    }

    /// Inserts `record` unless its email is already taken.
    pub fn insert(&self, record: UserRecord) -> Result<(), AppError> {
        match self.users.entry(record.email.clone()) {
            Entry::Occupied(_) => Err(AppError::Conflict("User already exists".to_string())),
            Entry::Vacant(slot) => {
                self.ids.insert(record.id, record.email.clone());
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub fn record_login(&self, email: &str, now: SystemTime) -> Option<UserRecord> {
        let mut entry = self.users.get_mut(email)?;
        entry.last_login_at = Some(unix_seconds(now));
        Some(entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }
}
