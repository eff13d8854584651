//! Authentication and authorization pipeline.
//!
//! A request moves through
//! `RateCheck -> CredentialExtraction -> TokenVerification -> IdentityResolution -> Authorization`
//! and either continues with a resolved [`User`] or stops with a [`Rejection`].
//! The axum middleware in [`crate::auth::middleware`] drives these stages; the
//! pipeline itself holds no per-request state.

use crate::auth::credentials::{basic_credentials, bearer_token, OperatorCredentials};
use crate::auth::jwt::TokenService;
use crate::error::{retry_after_secs, Rejection, StoreError};
use crate::identity::{IdentityResolver, RoleCatalog};
use crate::middleware::rate_limit::{RateDecision, RateLimiter};
use crate::models::{User, UserId};
use axum::http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Pipeline stage, recorded on every rejection log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RateCheck,
    CredentialExtraction,
    TokenVerification,
    IdentityResolution,
    Authorization,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RateCheck => "rate_check",
            Stage::CredentialExtraction => "credential_extraction",
            Stage::TokenVerification => "token_verification",
            Stage::IdentityResolution => "identity_resolution",
            Stage::Authorization => "authorization",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an endpoint requires of its caller beyond being authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard<'a> {
    /// Caller owns the resource, or holds at least `required_role`.
    OwnershipOrRole {
        owner_id: UserId,
        required_role: &'a str,
    },
    /// Caller is the addressed user, or holds at least `required_role`.
    SelfOrRole {
        target_id: UserId,
        required_role: &'a str,
    },
}

impl<'a> Guard<'a> {
    fn subject(&self) -> UserId {
        match *self {
            Guard::OwnershipOrRole { owner_id, .. } => owner_id,
            Guard::SelfOrRole { target_id, .. } => target_id,
        }
    }

    fn required_role(&self) -> &'a str {
        match *self {
            Guard::OwnershipOrRole { required_role, .. }
            | Guard::SelfOrRole { required_role, .. } => required_role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    OwnerMatch,
    RoleSufficient,
    RoleInsufficient,
}

/// Derived per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub granted: bool,
    pub reason: DecisionReason,
}

impl AuthorizationDecision {
    fn grant(reason: DecisionReason) -> Self {
        Self {
            granted: true,
            reason,
        }
    }

    fn deny() -> Self {
        Self {
            granted: false,
            reason: DecisionReason::RoleInsufficient,
        }
    }
}

pub struct AuthPipeline {
    tokens: Arc<dyn TokenService>,
    identities: IdentityResolver,
    roles: RoleCatalog,
    limiter: Arc<dyn RateLimiter>,
    operator: OperatorCredentials,
}

impl AuthPipeline {
    pub fn new(
        tokens: Arc<dyn TokenService>,
        identities: IdentityResolver,
        roles: RoleCatalog,
        limiter: Arc<dyn RateLimiter>,
        operator: OperatorCredentials,
    ) -> Self {
        Self {
            tokens,
            identities,
            roles,
            limiter,
            operator,
        }
    }

    pub fn tokens(&self) -> &Arc<dyn TokenService> {
        &self.tokens
    }

    /// Start -> RateChecked.
    pub fn admit(&self, key: &str) -> Result<(), Rejection> {
        match self.limiter.allow(key) {
            RateDecision::Allowed { .. } => Ok(()),
            RateDecision::Denied { retry_after } => {
                warn!(
                    stage = %Stage::RateCheck,
                    key,
                    retry_after_secs = retry_after_secs(retry_after),
                    "Rate limit exceeded"
                );
                Err(Rejection::RateLimited { retry_after })
            }
        }
    }

    /// Basic entry point. A missing, undecodable or wrong credential all
    /// yield `UnauthorizedBasic` so the client is re-prompted.
    pub fn authenticate_operator(&self, headers: &HeaderMap) -> Result<(), Rejection> {
        let accepted = match basic_credentials(headers) {
            Some((username, password)) => self.operator.matches(&username, &password),
            None => false,
        };

        if accepted {
            Ok(())
        } else {
            warn!(stage = %Stage::CredentialExtraction, "Operator credential rejected");
            Err(Rejection::UnauthorizedBasic)
        }
    }

    /// Bearer entry point: credential, token, then identity.
    ///
    /// Every failure after the header parses is reported as `Unauthorized`;
    /// the cause is only logged.
    pub async fn authenticate_bearer(&self, headers: &HeaderMap) -> Result<User, Rejection> {
        let token = bearer_token(headers).map_err(|rejection| {
            warn!(
                stage = %Stage::CredentialExtraction,
                reason = rejection.reason(),
                "Bearer credential rejected"
            );
            rejection
        })?;

        let claims = self.tokens.verify(token).map_err(|e| {
            warn!(stage = %Stage::TokenVerification, error = %e, "Token rejected");
            Rejection::Unauthorized
        })?;

        let user = self.identities.get(claims.sub).await.map_err(|e| {
            warn!(
                stage = %Stage::IdentityResolution,
                user_id = claims.sub,
                error = %e,
                "Token subject could not be resolved"
            );
            Rejection::Unauthorized
        })?;

        debug!(user_id = user.id, role = %user.role.name, "Authenticated caller");
        Ok(user)
    }

    /// IdentityResolved -> Authorized, without turning a denial into a rejection.
    ///
    /// An owner or self match never consults the role catalog.
    pub async fn authorize(
        &self,
        caller: &User,
        guard: Guard<'_>,
    ) -> Result<AuthorizationDecision, Rejection> {
        if caller.id == guard.subject() {
            return Ok(AuthorizationDecision::grant(DecisionReason::OwnerMatch));
        }

        let required_role = guard.required_role();
        let required = self.roles.get_by_name(required_role).await.map_err(|e| {
            error!(
                stage = %Stage::Authorization,
                role = required_role,
                error = %e,
                "Failed to load required role"
            );
            match e {
                StoreError::NotFound => Rejection::NotFound,
                _ => Rejection::Internal,
            }
        })?;

        if caller.role.satisfies(&required) {
            Ok(AuthorizationDecision::grant(DecisionReason::RoleSufficient))
        } else {
            Ok(AuthorizationDecision::deny())
        }
    }

    /// [`Self::authorize`], with a denial mapped to `Forbidden`.
    pub async fn enforce(&self, caller: &User, guard: Guard<'_>) -> Result<(), Rejection> {
        let decision = self.authorize(caller, guard).await?;
        if decision.granted {
            debug!(user_id = caller.id, reason = ?decision.reason, "Access granted");
            return Ok(());
        }

        let rejection = Rejection::Forbidden {
            required_role: guard.required_role().to_string(),
        };
        warn!(
            stage = %Stage::Authorization,
            reason = rejection.reason(),
            user_id = caller.id,
            role_level = caller.role.level,
            "Access denied"
        );
        Err(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::UserCache;
    use crate::auth::jwt::JwtHandler;
    use crate::config::{BasicAuthConfig, TokenConfig};
    use crate::middleware::rate_limit::{FixedWindowLimiter, Unlimited};
    use crate::testutil::{
        role, user, ManualClock, MockRoleStore, MockUserCache, MockUserStore, StaticTokenService,
    };
    use axum::http::{header, HeaderValue};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::time::Duration;

    fn moderator() -> User {
        user(1, "Moderator", role(2, "moderator", 50))
    }

    fn alice() -> User {
        user(2, "Alice", role(3, "user", 10))
    }

    fn bob() -> User {
        user(3, "Bob", role(3, "user", 10))
    }

    struct Fixture<T> {
        pipeline: AuthPipeline,
        tokens: Arc<T>,
        users: Arc<MockUserStore>,
        roles: Arc<MockRoleStore>,
    }

    fn build<T: TokenService + 'static>(tokens: Arc<T>, limiter: Arc<dyn RateLimiter>) -> Fixture<T> {
        let users = Arc::new(
            MockUserStore::new()
                .with_user(moderator())
                .with_user(alice())
                .with_user(bob()),
        );
        let roles = Arc::new(
            MockRoleStore::new()
                .with_role(role(3, "user", 10))
                .with_role(role(2, "moderator", 50))
                .with_role(role(1, "admin", 100)),
        );
        let cache = Arc::new(MockUserCache::new());
        let pipeline = AuthPipeline::new(
            tokens.clone(),
            IdentityResolver::new(
                users.clone(),
                Some(cache as Arc<dyn UserCache>),
                Duration::from_millis(50),
            ),
            RoleCatalog::new(roles.clone()),
            limiter,
            OperatorCredentials::new(&BasicAuthConfig {
                username: "admin".to_string(),
                password: "s3cret".to_string(),
            }),
        );
        Fixture {
            pipeline,
            tokens,
            users,
            roles,
        }
    }

    fn fixture_with(limiter: Arc<dyn RateLimiter>) -> Fixture<StaticTokenService> {
        build(Arc::new(StaticTokenService::new()), limiter)
    }

    fn fixture() -> Fixture<StaticTokenService> {
        fixture_with(Arc::new(Unlimited))
    }

    fn jwt_fixture() -> Fixture<JwtHandler> {
        let handler = JwtHandler::new(TokenConfig {
            secret: "pipeline-secret".to_string(),
            issuer: "test_iss".to_string(),
            audience: "test_aud".to_string(),
            expiry: Duration::from_secs(3600),
        });
        build(Arc::new(handler), Arc::new(Unlimited))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    fn basic(username: &str, password: &str) -> HeaderMap {
        let encoded = BASE64.encode(format!("{}:{}", username, password));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap(),
        );
        headers
    }

    #[tokio::test]
    async fn test_bearer_resolves_identity() {
        let f = fixture();
        let token = f.tokens.issue(&StaticTokenService::claims(2)).unwrap();

        let caller = f.pipeline.authenticate_bearer(&bearer(&token)).await.unwrap();
        assert_eq!(caller, alice());
    }

    #[tokio::test]
    async fn test_jwt_issued_token_resolves_identity() {
        let f = jwt_fixture();
        let token = f.tokens.issue(&f.tokens.claims_for(1)).unwrap();

        let caller = f.pipeline.authenticate_bearer(&bearer(&token)).await.unwrap();
        assert_eq!(caller, moderator());
        assert_eq!(f.users.get_by_id_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_jwt_is_unauthorized() {
        let f = jwt_fixture();
        let mut claims = f.tokens.claims_for(2);
        claims.iat -= 7200;
        claims.nbf -= 7200;
        claims.exp = claims.iat + 60;
        let token = f.tokens.issue(&claims).unwrap();

        assert_eq!(
            f.pipeline.authenticate_bearer(&bearer(&token)).await,
            Err(Rejection::Unauthorized)
        );
        assert_eq!(f.users.get_by_id_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_subject_is_unauthorized() {
        let f = fixture();
        let token = f.tokens.issue(&StaticTokenService::claims(404)).unwrap();

        assert_eq!(
            f.pipeline.authenticate_bearer(&bearer(&token)).await,
            Err(Rejection::Unauthorized)
        );
        assert_eq!(f.users.get_by_id_calls(), 1);
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthorized_without_store_read() {
        let f = fixture();

        assert_eq!(
            f.pipeline.authenticate_bearer(&bearer("forged")).await,
            Err(Rejection::Unauthorized)
        );
        assert_eq!(f.users.get_by_id_calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let f = fixture();
        let mut claims = StaticTokenService::claims(2);
        claims.exp = claims.iat - 1;
        let token = f.tokens.issue(&claims).unwrap();

        assert_eq!(
            f.pipeline.authenticate_bearer(&bearer(&token)).await,
            Err(Rejection::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_missing_and_malformed_headers_are_distinct() {
        let f = fixture();
        assert_eq!(
            f.pipeline.authenticate_bearer(&HeaderMap::new()).await,
            Err(Rejection::MissingCredential)
        );

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(
            f.pipeline.authenticate_bearer(&headers).await,
            Err(Rejection::MalformedCredential)
        );
    }

    #[tokio::test]
    async fn test_owner_is_granted_without_role_lookup() {
        let f = fixture();
        let guard = Guard::OwnershipOrRole {
            owner_id: 2,
            required_role: "admin",
        };

        let decision = f.pipeline.authorize(&alice(), guard).await.unwrap();
        assert_eq!(
            decision,
            AuthorizationDecision {
                granted: true,
                reason: DecisionReason::OwnerMatch
            }
        );
        assert_eq!(f.roles.get_by_name_calls(), 0);
    }

    #[tokio::test]
    async fn test_moderator_level_grants_on_foreign_resource() {
        let f = fixture();
        let guard = Guard::OwnershipOrRole {
            owner_id: 2,
            required_role: "moderator",
        };

        let decision = f.pipeline.authorize(&moderator(), guard).await.unwrap();
        assert!(decision.granted);
        assert_eq!(decision.reason, DecisionReason::RoleSufficient);
    }

    #[tokio::test]
    async fn test_lower_level_is_forbidden() {
        let f = fixture();
        let guard = Guard::OwnershipOrRole {
            owner_id: 2,
            required_role: "moderator",
        };

        let decision = f.pipeline.authorize(&bob(), guard).await.unwrap();
        assert_eq!(decision.reason, DecisionReason::RoleInsufficient);
        assert_eq!(
            f.pipeline.enforce(&bob(), guard).await,
            Err(Rejection::Forbidden {
                required_role: "moderator".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_self_or_role() {
        let f = fixture();
        let own_profile = Guard::SelfOrRole {
            target_id: 3,
            required_role: "moderator",
        };
        let other_profile = Guard::SelfOrRole {
            target_id: 2,
            required_role: "moderator",
        };

        assert!(f.pipeline.enforce(&bob(), own_profile).await.is_ok());
        assert!(f.pipeline.enforce(&bob(), other_profile).await.is_err());
        assert!(f.pipeline.enforce(&moderator(), other_profile).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_role_is_server_error() {
        let f = fixture();
        let guard = Guard::OwnershipOrRole {
            owner_id: 2,
            required_role: "superuser",
        };

        assert_eq!(
            f.pipeline.authorize(&bob(), guard).await,
            Err(Rejection::NotFound)
        );
    }

    #[test]
    fn test_operator_credentials() {
        let f = fixture();
        assert!(f.pipeline.authenticate_operator(&basic("admin", "s3cret")).is_ok());
        assert_eq!(
            f.pipeline.authenticate_operator(&basic("admin", "wrong")),
            Err(Rejection::UnauthorizedBasic)
        );
        assert_eq!(
            f.pipeline.authenticate_operator(&HeaderMap::new()),
            Err(Rejection::UnauthorizedBasic)
        );
    }

    #[test]
    fn test_admit_reports_retry_after() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(FixedWindowLimiter::with_clock(
            1,
            Duration::from_secs(5),
            clock,
        ));
        let f = fixture_with(limiter);

        assert!(f.pipeline.admit("ip:1.2.3.4").is_ok());
        assert_eq!(
            f.pipeline.admit("ip:1.2.3.4"),
            Err(Rejection::RateLimited {
                retry_after: Duration::from_secs(5)
            })
        );
    }
}
