//! Middleware for observability and rate limiting.
//!
//! This module provides:
//! - Request logging with latency tracking
//! - Fixed-window rate limiting per caller key

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{
    client_key, rate_limit_middleware, FixedWindowLimiter, RateDecision, RateLimiter, Unlimited,
};
