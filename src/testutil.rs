//! Deterministic test doubles for the store, cache, token and clock seams.
//!
//! Each double counts its calls so tests can assert how many times the
//! pipeline reached the cache or the store.

use crate::auth::jwt::TokenService;
use crate::auth::models::Claims;
use crate::cache::UserCache;
use crate::clock::Clock;
use crate::error::{CacheError, StoreError, TokenError};
use crate::models::{Post, Role, User, UserCredentials, UserId};
use crate::store::{PostStore, RoleStore, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

/// Polls `cond` until it holds. Panics after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached within 5s");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn role(id: i64, name: &str, level: i32) -> Role {
    Role {
        id,
        name: name.to_string(),
        description: String::new(),
        level,
    }
}

/// A user with a fixed creation time, so fixtures compare equal across runs.
pub fn user(id: UserId, username: &str, role: Role) -> User {
    User {
        id,
        username: username.to_string(),
        email: format!("{}@example.com", username.to_lowercase()),
        created_at: DateTime::<Utc>::default(),
        role,
    }
}

#[derive(Default)]
pub struct MockUserStore {
    users: Mutex<HashMap<UserId, User>>,
    password_hashes: Mutex<HashMap<String, String>>,
    get_by_id_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MockUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: User) -> Self {
        self.users.lock().insert(user.id, user);
        self
    }

    /// Registers `user` along with a bcrypt hash for the token endpoint.
    pub fn with_credentials(self, user: User, password_hash: String) -> Self {
        self.password_hashes
            .lock()
            .insert(user.email.clone(), password_hash);
        self.with_user(user)
    }

    /// Every call fails with `StoreError::Timeout`.
    pub fn unavailable(self) -> Self {
        self.unavailable.store(true, Ordering::SeqCst);
        self
    }

    pub fn get_by_id_calls(&self) -> usize {
        self.get_by_id_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for MockUserStore {
    async fn get_by_id(&self, id: UserId) -> Result<User, StoreError> {
        self.get_by_id_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout);
        }
        self.users.lock().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_credentials_by_email(&self, email: &str) -> Result<UserCredentials, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout);
        }
        let password_hash = self
            .password_hashes
            .lock()
            .get(email)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let user = self
            .users
            .lock()
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        Ok(UserCredentials {
            user,
            password_hash,
        })
    }
}

#[derive(Default)]
pub struct MockRoleStore {
    roles: Mutex<HashMap<String, Role>>,
    get_by_name_calls: AtomicUsize,
}

impl MockRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(self, role: Role) -> Self {
        self.roles.lock().insert(role.name.clone(), role);
        self
    }

    pub fn get_by_name_calls(&self) -> usize {
        self.get_by_name_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleStore for MockRoleStore {
    async fn get_by_name(&self, name: &str) -> Result<Role, StoreError> {
        self.get_by_name_calls.fetch_add(1, Ordering::SeqCst);
        self.roles.lock().get(name).cloned().ok_or(StoreError::NotFound)
    }
}

#[derive(Default)]
pub struct MockPostStore {
    posts: Mutex<HashMap<i64, Post>>,
}

impl MockPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post(self, id: i64, owner: UserId, title: &str) -> Self {
        let post = Post {
            id,
            user_id: owner,
            title: title.to_string(),
            content: String::new(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            version: 0,
        };
        self.posts.lock().insert(id, post);
        self
    }

    pub fn contains(&self, id: i64) -> bool {
        self.posts.lock().contains_key(&id)
    }
}

#[async_trait]
impl PostStore for MockPostStore {
    async fn get_post(&self, id: i64) -> Result<Post, StoreError> {
        self.posts.lock().get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update_post(&self, post: &Post) -> Result<Post, StoreError> {
        let mut posts = self.posts.lock();
        let current = posts.get_mut(&post.id).ok_or(StoreError::NotFound)?;
        if current.version != post.version {
            return Err(StoreError::NotFound);
        }
        *current = Post {
            version: post.version + 1,
            ..post.clone()
        };
        Ok(current.clone())
    }

    async fn delete_post(&self, id: i64) -> Result<(), StoreError> {
        self.posts
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

/// Scripted identity cache.
#[derive(Default)]
pub struct MockUserCache {
    entries: Mutex<HashMap<UserId, User>>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    failing_reads: AtomicBool,
    failing_writes: AtomicBool,
    delay: Mutex<Option<Duration>>,
    write_delay: Mutex<Option<Duration>>,
}

impl MockUserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: User) -> Self {
        self.entries.lock().insert(user.id, user);
        self
    }

    /// Reads fail with `CacheError::Unavailable` instead of hitting or missing.
    pub fn failing_reads(self) -> Self {
        self.failing_reads.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_writes(self) -> Self {
        self.failing_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Every call sleeps this long before answering.
    pub fn slow(self, delay: Duration) -> Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Only writes sleep; reads answer immediately.
    pub fn slow_writes(self, delay: Duration) -> Self {
        *self.write_delay.lock() = Some(delay);
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl UserCache for MockUserCache {
    async fn get(&self, id: UserId) -> Result<User, CacheError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        self.entries.lock().get(&id).cloned().ok_or(CacheError::Miss)
    }

    async fn set(&self, user: &User) -> Result<(), CacheError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let write_delay = *self.write_delay.lock();
        if let Some(delay) = write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".to_string()));
        }
        self.entries.lock().insert(user.id, user.clone());
        Ok(())
    }
}

/// Hands out opaque sequential tokens and remembers the claims behind each.
#[derive(Default)]
pub struct StaticTokenService {
    issued: Mutex<HashMap<String, Claims>>,
}

impl StaticTokenService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims for `sub` that any verifier in these tests treats as current.
    pub fn claims(sub: UserId) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub,
            iss: "test_iss".to_string(),
            aud: "test_aud".to_string(),
            iat: now,
            nbf: now,
            exp: now + 3600,
        }
    }
}

impl TokenService for StaticTokenService {
    fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        let mut issued = self.issued.lock();
        let token = format!("static-token-{}", issued.len() + 1);
        issued.insert(token.clone(), claims.clone());
        Ok(token)
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self
            .issued
            .lock()
            .get(token)
            .cloned()
            .ok_or(TokenError::InvalidToken)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::ExpiredToken);
        }
        Ok(claims)
    }
}
