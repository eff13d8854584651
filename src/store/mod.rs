//! Persistent storage contracts consumed by the auth core and the handlers.
//!
//! Every method reports a clean miss as `StoreError::NotFound`.

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::models::{Post, Role, User, UserCredentials, UserId};
use async_trait::async_trait;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: UserId) -> Result<User, StoreError>;
    async fn get_credentials_by_email(&self, email: &str) -> Result<UserCredentials, StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Role, StoreError>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get_post(&self, id: i64) -> Result<Post, StoreError>;
    /// Optimistic update: succeeds only if `post.version` is current. Returns the new row.
    async fn update_post(&self, post: &Post) -> Result<Post, StoreError>;
    async fn delete_post(&self, id: i64) -> Result<(), StoreError>;
}
