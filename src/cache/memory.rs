//! In-process identity cache using DashMap, with passive TTL expiry.

use super::{cache_key, UserCache};
use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::models::{User, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Serialized identity plus the instant it was written.
#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    stored_at: Instant,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
}

pub struct MemoryUserCache<C: Clock = SystemClock> {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    clock: Arc<C>,
    stats: CacheStats,
}

impl MemoryUserCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }
}

impl<C: Clock> MemoryUserCache<C> {
    pub fn with_clock(ttl: Duration, clock: Arc<C>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, id: UserId) -> Result<User, CacheError> {
        let key = cache_key(id);
        let now = self.clock.now();

        let payload = match self.entries.get(&key) {
            Some(entry) if now.duration_since(entry.stored_at) < self.ttl => entry.payload.clone(),
            Some(entry) => {
                drop(entry);
                // Expired entries are never returned.
                self.entries
                    .remove_if(&key, |_, e| now.duration_since(e.stored_at) >= self.ttl);
                return Err(CacheError::Miss);
            }
            None => return Err(CacheError::Miss),
        };

        Ok(serde_json::from_slice(&payload)?)
    }
}

#[async_trait]
impl<C: Clock> UserCache for MemoryUserCache<C> {
    async fn get(&self, id: UserId) -> Result<User, CacheError> {
        let result = self.lookup(id);
        match &result {
            Ok(_) => self.stats.hits.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn set(&self, user: &User) -> Result<(), CacheError> {
        let payload = serde_json::to_vec(user)?;
        self.entries.insert(
            cache_key(user.id),
            CacheEntry {
                payload,
                stored_at: self.clock.now(),
            },
        );
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
