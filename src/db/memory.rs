// src/db/memory.rs
use super::{ProfileStore, UserStore, Versioned};
use crate::error::ApiError;
use crate::models::{StockProfile, User};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    profiles: HashMap<String, Versioned<StockProfile>>,
    users: HashMap<String, User>,
    users_by_email: HashMap<String, String>,
}

/// Process-local store. Every operation holds one lock, so the conditional
/// writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile_count(&self) -> usize {
        self.tables.lock().await.profiles.len()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn load(&self, symbol: &str) -> Result<Option<Versioned<StockProfile>>, ApiError> {
        Ok(self.tables.lock().await.profiles.get(symbol).cloned())
    }

    async fn insert_if_absent(&self, profile: &StockProfile) -> Result<bool, ApiError> {
        let mut tables = self.tables.lock().await;
        if tables.profiles.contains_key(&profile.symbol) {
            return Ok(false);
        }
        tables.profiles.insert(
            profile.symbol.clone(),
            Versioned {
                version: 1,
                value: profile.clone(),
            },
        );
        Ok(true)
    }

    async fn replace_if_version(
        &self,
        profile: &StockProfile,
        expected: i64,
    ) -> Result<bool, ApiError> {
        let mut tables = self.tables.lock().await;
        match tables.profiles.get_mut(&profile.symbol) {
            Some(stored) if stored.version == expected => {
                stored.version = expected + 1;
                stored.value = profile.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError> {
        Ok(self.tables.lock().await.users.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users_by_email
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn insert_if_email_free(&self, user: &User) -> Result<bool, ApiError> {
        let mut tables = self.tables.lock().await;
        if tables.users_by_email.contains_key(&user.email) {
            return Ok(false);
        }
        tables
            .users_by_email
            .insert(user.email.clone(), user.id.clone());
        tables.users.insert(user.id.clone(), user.clone());
        Ok(true)
    }
}
