//! Cache-aside identity lookup.
//!
//! A cache failure of any kind (error, timeout) degrades to a store read and
//! is only logged. A store failure is returned as-is. A successful call makes
//! at most one store read. The cache write runs on its own task, so it never
//! fails or delays the read.

use crate::cache::UserCache;
use crate::error::{CacheError, StoreError};
use crate::models::{User, UserId};
use crate::store::UserStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
    cache: Option<Arc<dyn UserCache>>,
    cache_timeout: Duration,
}

impl IdentityResolver {
    /// `cache = None` reads the store directly on every call.
    pub fn new(
        store: Arc<dyn UserStore>,
        cache: Option<Arc<dyn UserCache>>,
        cache_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            cache_timeout,
        }
    }

    pub fn uncached(store: Arc<dyn UserStore>) -> Self {
        Self::new(store, None, Duration::ZERO)
    }

    pub fn caching_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub async fn get(&self, id: UserId) -> Result<User, StoreError> {
        let Some(cache) = &self.cache else {
            return self.store.get_by_id(id).await;
        };

        match timeout(self.cache_timeout, cache.get(id)).await {
            Ok(Ok(user)) => {
                debug!(user_id = id, "User found in cache");
                return Ok(user);
            }
            Ok(Err(CacheError::Miss)) => {
                debug!(user_id = id, "User not found in cache, fetching from store");
            }
            Ok(Err(e)) => {
                warn!(user_id = id, error = %e, "Failed to fetch user from cache");
            }
            Err(_) => {
                warn!(
                    user_id = id,
                    timeout_ms = self.cache_timeout.as_millis() as u64,
                    "Cache read timed out, fetching from store"
                );
            }
        }

        let user = self.store.get_by_id(id).await?;

        // Detached so a slow cache never delays the caller; still bounded.
        let cache = cache.clone();
        let cached = user.clone();
        let budget = self.cache_timeout;
        tokio::spawn(async move {
            match timeout(budget, cache.set(&cached)).await {
                Ok(Ok(())) => debug!(user_id = cached.id, "Cached user"),
                Ok(Err(e)) => warn!(user_id = cached.id, error = %e, "Failed to cache user"),
                Err(_) => warn!(user_id = cached.id, "Cache write timed out"),
            }
        });

        Ok(user)
    }
}
