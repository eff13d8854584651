//! SQLite Store
//! Mission: Users, roles and posts behind a bounded connection pool
//!
//! Every query runs on the blocking pool under a per-query deadline. At most
//! `max_open_conns` connections exist at once; callers beyond that wait for a
//! permit, and the wait counts against the same deadline.

use super::{PostStore, RoleStore, UserStore};
use crate::config::DbConfig;
use crate::error::StoreError;
use crate::models::{Post, Role, User, UserCredentials, UserId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bcrypt::{hash, DEFAULT_COST};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    level INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    email TEXT UNIQUE NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    role_id INTEGER NOT NULL REFERENCES roles(id)
);

CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_posts_user ON posts(user_id);
"#;

/// Reference role ladder: (name, description, level).
pub const DEFAULT_ROLES: [(&str, &str, i32); 3] = [
    ("user", "Regular User", 10),
    ("moderator", "Moderator", 50),
    ("admin", "Administrator", 100),
];

const SELECT_USER: &str = "SELECT u.id, u.username, u.email, u.created_at,
        r.id, r.name, r.description, r.level, u.password_hash
     FROM users u JOIN roles r ON r.id = u.role_id";

const SELECT_POST: &str =
    "SELECT id, user_id, title, content, created_at, updated_at, version FROM posts";

struct Pool {
    path: String,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
    max_idle: usize,
}

impl Pool {
    fn open_connection(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn checkout(&self) -> rusqlite::Result<Connection> {
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }
        debug!(path = %self.path, "Opening new store connection");
        self.open_connection()
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// SQLite implementation of [`UserStore`], [`RoleStore`] and [`PostStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: Arc<Pool>,
    query_timeout: Duration,
    hash_cost: u32,
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply the schema.
    pub fn open(config: &DbConfig) -> Result<Self> {
        let pool = Pool {
            path: config.path.clone(),
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(config.max_open_conns.max(1))),
            max_idle: config.max_idle_conns,
        };

        let conn = pool
            .open_connection()
            .with_context(|| format!("Failed to open database at {}", config.path))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        pool.checkin(conn);

        info!(
            path = %config.path,
            max_open = config.max_open_conns,
            max_idle = config.max_idle_conns,
            "Store initialized"
        );

        Ok(Self {
            pool: Arc::new(pool),
            query_timeout: config.query_timeout,
            hash_cost: DEFAULT_COST,
        })
    }

    /// bcrypt cost for accounts created through [`SqliteStore::create_user`].
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let query = async move {
            let permit = pool
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| StoreError::PoolClosed)?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let conn = pool.checkout()?;
                let result = f(&conn);
                pool.checkin(conn);
                result
            })
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
        };

        match tokio::time::timeout(self.query_timeout, query).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    op,
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Store query timed out"
                );
                Err(StoreError::Timeout)
            }
        }
    }

    /// Insert the reference roles if missing.
    pub async fn seed_defaults(&self) -> Result<(), StoreError> {
        self.run("seed_defaults", |conn| {
            for (name, description, level) in DEFAULT_ROLES {
                conn.execute(
                    "INSERT OR IGNORE INTO roles (name, description, level) VALUES (?1, ?2, ?3)",
                    params![name, description, level],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Create an account with a bcrypt-hashed password and the named role.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role_name: &str,
    ) -> Result<User> {
        let password = password.to_string();
        let cost = self.hash_cost;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
            .await?
            .context("Failed to hash password")?;

        let username = username.to_string();
        let email = email.to_string();
        let role_name = role_name.to_string();
        let user = self
            .run("create_user", move |conn| {
                let role_id: i64 = conn
                    .query_row(
                        "SELECT id FROM roles WHERE name = ?1",
                        params![role_name],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or(StoreError::NotFound)?;

                conn.execute(
                    "INSERT INTO users (username, email, password_hash, created_at, role_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![username, email, password_hash, Utc::now(), role_id],
                )?;
                let id = conn.last_insert_rowid();

                conn.query_row(&format!("{SELECT_USER} WHERE u.id = ?1"), params![id], user_from_row)
                    .map_err(StoreError::from)
            })
            .await
            .context("Failed to insert user")?;

        info!(user_id = user.id, role = %user.role.name, "Created user");
        Ok(user)
    }

    pub async fn create_post(&self, user_id: UserId, title: &str, content: &str) -> Result<Post> {
        let title = title.to_string();
        let content = content.to_string();
        let post = self
            .run("create_post", move |conn| {
                let now = Utc::now();
                conn.execute(
                    "INSERT INTO posts (user_id, title, content, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![user_id, title, content, now],
                )?;
                let id = conn.last_insert_rowid();
                conn.query_row(&format!("{SELECT_POST} WHERE id = ?1"), params![id], post_from_row)
                    .map_err(StoreError::from)
            })
            .await
            .context("Failed to insert post")?;

        Ok(post)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
        role: Role {
            id: row.get(4)?,
            name: row.get(5)?,
            description: row.get(6)?,
            level: row.get(7)?,
        },
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        version: row.get(6)?,
    })
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn get_by_id(&self, id: UserId) -> Result<User, StoreError> {
        self.run("get_user", move |conn| {
            conn.query_row(&format!("{SELECT_USER} WHERE u.id = ?1"), params![id], user_from_row)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn get_credentials_by_email(&self, email: &str) -> Result<UserCredentials, StoreError> {
        let email = email.to_string();
        self.run("get_credentials", move |conn| {
            conn.query_row(
                &format!("{SELECT_USER} WHERE u.email = ?1"),
                params![email],
                |row| {
                    Ok(UserCredentials {
                        user: user_from_row(row)?,
                        password_hash: row.get(8)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
        .await
    }
}

#[async_trait]
impl RoleStore for SqliteStore {
    async fn get_by_name(&self, name: &str) -> Result<Role, StoreError> {
        let name = name.to_string();
        self.run("get_role", move |conn| {
            conn.query_row(
                "SELECT id, name, description, level FROM roles WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Role {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        level: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
        .await
    }
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn get_post(&self, id: i64) -> Result<Post, StoreError> {
        self.run("get_post", move |conn| {
            conn.query_row(&format!("{SELECT_POST} WHERE id = ?1"), params![id], post_from_row)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update_post(&self, post: &Post) -> Result<Post, StoreError> {
        let post = post.clone();
        self.run("update_post", move |conn| {
            let updated = conn.execute(
                "UPDATE posts SET title = ?1, content = ?2, updated_at = ?3, version = version + 1
                 WHERE id = ?4 AND version = ?5",
                params![post.title, post.content, Utc::now(), post.id, post.version],
            )?;
            // A stale version is reported the same way as a missing row.
            if updated == 0 {
                return Err(StoreError::NotFound);
            }
            conn.query_row(&format!("{SELECT_POST} WHERE id = ?1"), params![post.id], post_from_row)
                .map_err(StoreError::from)
        })
        .await
    }

    async fn delete_post(&self, id: i64) -> Result<(), StoreError> {
        self.run("delete_post", move |conn| {
            match conn.execute("DELETE FROM posts WHERE id = ?1", params![id])? {
                0 => Err(StoreError::NotFound),
                _ => Ok(()),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store(query_timeout: Duration) -> (SqliteStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let config = DbConfig {
            path: temp_file.path().to_str().unwrap().to_string(),
            max_open_conns: 2,
            max_idle_conns: 1,
            query_timeout,
        };
        let store = SqliteStore::open(&config).unwrap().with_hash_cost(4);
        (store, temp_file)
    }

    #[tokio::test]
    async fn test_seeded_roles_resolve_by_name() {
        let (store, _temp) = create_test_store(Duration::from_secs(5));
        store.seed_defaults().await.unwrap();
        store.seed_defaults().await.unwrap();

        let moderator = store.get_by_name("moderator").await.unwrap();
        assert_eq!(moderator.level, 50);
        assert!(matches!(
            store.get_by_name("superuser").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_create_and_get_user_with_role() {
        let (store, _temp) = create_test_store(Duration::from_secs(5));
        store.seed_defaults().await.unwrap();

        let created = store
            .create_user("alice", "alice@example.com", "password123", "moderator")
            .await
            .unwrap();

        let fetched = store.get_by_id(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.role.name, "moderator");

        let creds = store
            .get_credentials_by_email("alice@example.com")
            .await
            .unwrap();
        assert!(bcrypt::verify("password123", &creds.password_hash).unwrap());

        assert!(matches!(store.get_by_id(9999).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_create_user_with_unknown_role_fails() {
        let (store, _temp) = create_test_store(Duration::from_secs(5));
        store.seed_defaults().await.unwrap();

        let result = store
            .create_user("bob", "bob@example.com", "password123", "emperor")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_post_update_is_versioned() {
        let (store, _temp) = create_test_store(Duration::from_secs(5));
        store.seed_defaults().await.unwrap();
        let owner = store
            .create_user("carol", "carol@example.com", "password123", "user")
            .await
            .unwrap();

        let post = store.create_post(owner.id, "hello", "world").await.unwrap();
        assert_eq!(post.version, 0);

        let mut edit = post.clone();
        edit.title = "hello again".to_string();
        let updated = store.update_post(&edit).await.unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.title, "hello again");

        // Same stale version a second time.
        assert!(matches!(
            store.update_post(&edit).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_post() {
        let (store, _temp) = create_test_store(Duration::from_secs(5));
        store.seed_defaults().await.unwrap();
        let owner = store
            .create_user("dave", "dave@example.com", "password123", "user")
            .await
            .unwrap();
        let post = store.create_post(owner.id, "t", "c").await.unwrap();

        store.delete_post(post.id).await.unwrap();
        assert!(matches!(store.get_post(post.id).await, Err(StoreError::NotFound)));
        assert!(matches!(store.delete_post(post.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (store, _temp) = create_test_store(Duration::from_millis(50));
        let _a = store.pool.permits.clone().acquire_owned().await.unwrap();
        let _b = store.pool.permits.clone().acquire_owned().await.unwrap();

        assert!(matches!(store.get_by_id(1).await, Err(StoreError::Timeout)));
    }
}
