//! Identity cache.
//!
//! The resolver talks to the cache only through [`UserCache`]. A miss is a
//! distinguished outcome (`CacheError::Miss`), never an escalation.

pub mod memory;

pub use memory::MemoryUserCache;

use crate::error::CacheError;
use crate::models::{User, UserId};
use async_trait::async_trait;

#[async_trait]
pub trait UserCache: Send + Sync {
    async fn get(&self, id: UserId) -> Result<User, CacheError>;
    /// Stores `user` under its own id with the cache's fixed TTL.
    async fn set(&self, user: &User) -> Result<(), CacheError>;
}

pub(crate) fn cache_key(id: UserId) -> String {
    format!("user-{}", id)
}
