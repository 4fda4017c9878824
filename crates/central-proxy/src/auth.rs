//! Caller authentication
//!
//! Validates the caller's bearer token against the cluster's TokenReview API
//! and returns the caller identity used for RBAC checks.
//!
//! # Caching
//!
//! Successful reviews are cached by the raw token for the identity cache TTL,
//! so a token presented repeatedly within that window costs one TokenReview.
//! Rejections are never cached: a token that failed once is reviewed again on
//! the next attempt.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use tracing::debug;

use crate::cache::TtlCache;
use crate::error::{Error, Result};

/// Message returned for absent, malformed or empty bearer tokens
pub const MISSING_TOKEN_MESSAGE: &str = "missing or invalid bearer token";

/// Verified caller identity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    /// Username as reported by the identity provider
    pub username: String,
    /// Unique id of the user
    pub uid: String,
    /// Group memberships
    pub groups: Vec<String>,
}

/// Result of a TokenReview that completed without an API error
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenReviewOutcome {
    /// The token is valid for this identity
    Authenticated(UserIdentity),
    /// The token was rejected, with the reason reported by the API
    Rejected(String),
}

/// Cluster identity API, token-review operation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenReviewer: Send + Sync {
    /// Review a bearer token
    ///
    /// `Err` is reserved for failures to reach or use the API; a token the API
    /// does not accept is `Ok(TokenReviewOutcome::Rejected)`.
    async fn review(&self, token: String) -> Result<TokenReviewOutcome>;
}

/// Authenticates callers by bearer token with a success-only cache
pub struct Authenticator {
    reviewer: Arc<dyn TokenReviewer>,
    cache: TtlCache<String, UserIdentity>,
}

impl Authenticator {
    /// Create an authenticator whose successes live for `cache_ttl`
    pub fn new(reviewer: Arc<dyn TokenReviewer>, cache_ttl: std::time::Duration) -> Self {
        Self {
            reviewer,
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Authenticate the caller of a request from its `Authorization` header
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<UserIdentity> {
        let token = extract_bearer_token(headers)
            .ok_or_else(|| Error::Unauthorized(MISSING_TOKEN_MESSAGE.into()))?;

        if let Some(identity) = self.cache.get(&token.to_string()) {
            debug!(username = %identity.username, "Identity cache hit");
            return Ok(identity);
        }

        match self.reviewer.review(token.to_string()).await? {
            TokenReviewOutcome::Authenticated(identity) => {
                debug!(
                    username = %identity.username,
                    groups = ?identity.groups,
                    "TokenReview authenticated caller"
                );
                self.cache.insert(token.to_string(), identity.clone());
                Ok(identity)
            }
            TokenReviewOutcome::Rejected(reason) => {
                debug!(reason = %reason, "TokenReview rejected caller token");
                Err(Error::Unauthorized(reason))
            }
        }
    }
}

/// Extract a non-empty Bearer token from the Authorization header
///
/// The scheme is matched case-insensitively.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
