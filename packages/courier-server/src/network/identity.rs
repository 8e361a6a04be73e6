//! Resolves the receiver behind an HTTP request.
//!
//! Handlers never parse credentials themselves; they ask an
//! [`IdentityResolver`] and answer 401 when it returns `None`.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use courier_core::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

/// Header read by [`HeaderIdentityResolver`].
pub const USER_ID_HEADER: &str = "x-user-id";

/// Maps request credentials to a receiver id.
///
/// `query_token` carries a token passed as `?token=` by clients that cannot
/// set headers (browser `EventSource`).
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap, query_token: Option<&str>) -> Option<UserId>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Validates HS256 bearer tokens whose `sub` claim is the numeric user id.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn verify(&self, token: &str) -> Option<UserId> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => data.claims.sub.parse().ok().map(UserId),
            Err(err) => {
                debug!(error = %err, "rejected bearer token");
                None
            }
        }
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, headers: &HeaderMap, query_token: Option<&str>) -> Option<UserId> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        bearer.or(query_token).and_then(|token| self.verify(token.trim()))
    }
}

/// Trusts a numeric `x-user-id` header set by an upstream gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderIdentityResolver;

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, headers: &HeaderMap, _query_token: Option<&str>) -> Option<UserId> {
        headers
            .get(USER_ID_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
            .map(UserId)
    }
}
