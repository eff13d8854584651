//! Process configuration, read once at startup and threaded through constructors.

use std::env;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: String,
    pub env: String,
    pub request_timeout: Duration,
    pub db: DbConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: String,
    pub max_open_conns: usize,
    pub max_idle_conns: usize,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    /// How long a cached identity stays valid.
    pub ttl: Duration,
    /// Upper bound on any single cache read or write.
    pub op_timeout: Duration,
}

/// Fixed-window rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Maximum admitted requests per key per window.
    pub requests_per_window: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub basic: BasicAuthConfig,
    pub token: TokenConfig,
}

/// Operator credential for Basic-protected endpoints.
#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expiry: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: "social_gate.db".to_string(),
            max_open_conns: 10,
            max_idle_conns: 10,
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(3 * 60 * 60),
            op_timeout: Duration::from_millis(100),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 20,
            window: Duration::from_secs(5),
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-change-in-production-minimum-32-characters".to_string(),
            issuer: "social-gate".to_string(),
            audience: "social-gate".to_string(),
            expiry: Duration::from_secs(72 * 60 * 60),
        }
    }
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment (and `.env` if present).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let db_defaults = DbConfig::default();
        let cache_defaults = CacheConfig::default();
        let rate_defaults = RateLimitConfig::default();
        let token_defaults = TokenConfig::default();
        let basic_defaults = BasicAuthConfig::default();

        Self {
            addr: string_var("ADDR", "0.0.0.0:8080"),
            env: string_var("ENV", "dev"),
            request_timeout: Duration::from_secs(parsed_var("REQUEST_TIMEOUT_SECS", 60)),
            db: DbConfig {
                path: string_var("DB_PATH", &db_defaults.path),
                max_open_conns: parsed_var("DB_MAX_OPEN_CONNS", db_defaults.max_open_conns)
                    .max(1),
                max_idle_conns: parsed_var("DB_MAX_IDLE_CONNS", db_defaults.max_idle_conns),
                query_timeout: Duration::from_millis(parsed_var("DB_QUERY_TIMEOUT_MS", 5_000)),
            },
            cache: CacheConfig {
                enabled: flag_var("CACHE_ENABLED", cache_defaults.enabled),
                ttl: Duration::from_secs(parsed_var(
                    "CACHE_TTL_SECS",
                    cache_defaults.ttl.as_secs(),
                )),
                op_timeout: Duration::from_millis(parsed_var("CACHE_OP_TIMEOUT_MS", 100)),
            },
            rate_limit: RateLimitConfig {
                enabled: flag_var("RATE_LIMITER_ENABLED", rate_defaults.enabled),
                requests_per_window: parsed_var(
                    "RATE_LIMITER_REQUESTS",
                    rate_defaults.requests_per_window,
                ),
                // A zero window resets on every request and never denies.
                window: Duration::from_secs(
                    parsed_var("RATE_LIMITER_WINDOW_SECS", rate_defaults.window.as_secs()).max(1),
                ),
            },
            auth: AuthConfig {
                basic: BasicAuthConfig {
                    username: string_var("AUTH_BASIC_USER", &basic_defaults.username),
                    password: string_var("AUTH_BASIC_PASS", &basic_defaults.password),
                },
                token: TokenConfig {
                    secret: string_var("AUTH_TOKEN_SECRET", &token_defaults.secret),
                    issuer: string_var("AUTH_TOKEN_ISSUER", &token_defaults.issuer),
                    audience: string_var("AUTH_TOKEN_AUDIENCE", &token_defaults.audience),
                    expiry: Duration::from_secs(parsed_var::<u64>("AUTH_TOKEN_EXP_HOURS", 72) * 3600),
                },
            },
        }
    }
}

fn string_var(key: &str, fallback: &str) -> String {
    env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn parsed_var<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(fallback)
}

fn flag_var(key: &str, fallback: bool) -> bool {
    env::var(key)
        .map(|v| parse_flag(&v))
        .unwrap_or(fallback)
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "on" | "ON")
}
