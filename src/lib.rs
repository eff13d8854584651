//! social-gate library
//!
//! Request authorization for a multi-tenant HTTP service: bearer tokens,
//! cache-aside identity lookup, ownership-or-role checks, and fixed-window
//! rate limiting. The binary in `main.rs` wires these into an axum server.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod models;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use api::{router, AppState};
pub use config::AppConfig;
pub use error::Rejection;
