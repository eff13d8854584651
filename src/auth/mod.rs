//! Authentication Module
//! Mission: Bearer tokens, operator credentials, and the ownership-or-role checks

pub mod api;
pub mod credentials;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod pipeline;

pub use jwt::{JwtHandler, TokenService};
pub use middleware::{auth_middleware, basic_auth_middleware, CurrentUser};
pub use pipeline::{AuthPipeline, AuthorizationDecision, DecisionReason, Guard};
