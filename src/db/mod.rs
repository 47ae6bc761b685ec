// src/db/mod.rs
//! Storage ports for stock profiles and users.
//!
//! Both backends give the same guarantees: a symbol (or email) can only be
//! inserted once, and a profile write only lands if nobody else committed
//! since it was read.

pub mod memory;
pub mod scylla_store;

use crate::error::ApiError;
use crate::models::{StockProfile, User};
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::scylla_store::ScyllaStore;

/// A stored value together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: i64,
    pub value: T,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, symbol: &str) -> Result<Option<Versioned<StockProfile>>, ApiError>;

    /// Returns `true` when this call created the document.
    async fn insert_if_absent(&self, profile: &StockProfile) -> Result<bool, ApiError>;

    /// Compare-and-swap on the document version. Returns `true` when the
    /// write committed, after which the stored version is `expected + 1`.
    async fn replace_if_version(
        &self,
        profile: &StockProfile,
        expected: i64,
    ) -> Result<bool, ApiError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError>;

    /// Returns `false` without writing when the email is already taken.
    async fn insert_if_email_free(&self, user: &User) -> Result<bool, ApiError>;
}
