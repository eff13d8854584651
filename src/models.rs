//! Domain models shared by the stores, the auth pipeline and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a user. Globally unique and never reassigned.
pub type UserId = i64;

/// A named privilege tier. Higher `level` means more privileged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub level: i32,
}

impl Role {
    /// Role levels are totally ordered, so this is the only comparison authorization needs.
    pub fn satisfies(&self, required: &Role) -> bool {
        self.level >= required.level
    }
}

/// A resolved caller identity, as stored and as cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub role: Role,
}

/// A user row together with its password hash. Only the token endpoint sees this.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String, // bcrypt hash - never serialize
}

/// A post owned by a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

/// Successful responses are wrapped as `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, level: i32) -> Role {
        Role {
            id: level as i64,
            name: name.to_string(),
            description: String::new(),
            level,
        }
    }

    #[test]
    fn test_role_satisfies_is_level_comparison() {
        let user = role("user", 10);
        let moderator = role("moderator", 50);
        let admin = role("admin", 100);

        assert!(moderator.satisfies(&moderator));
        assert!(admin.satisfies(&moderator));
        assert!(!user.satisfies(&moderator));
    }

    #[test]
    fn test_user_json_embeds_role() {
        let user = User {
            id: 7,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            created_at: DateTime::<Utc>::default(),
            role: role("user", 10),
        };

        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"]["name"], "user");
        assert_eq!(json["role"]["level"], 10);

        let back: User = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }
}
