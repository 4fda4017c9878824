//! Caller authorization against cluster RBAC
//!
//! A scoped request is only forwarded when the caller could read every
//! configured resource themselves within the declared scope. For each
//! (resource, verb) pair one SubjectAccessReview is issued; all checks run
//! concurrently as a task group sharing one cancellation token.
//!
//! # Fan-out
//!
//! ```text
//! authorize ──┬─► pods.core get       ─┐
//!             ├─► pods.core list      ─┤   first denial or error
//!             ├─► deployments.apps get ├─► cancels the siblings;
//!             └─► ...                 ─┘   the group is joined before returning
//! ```
//!
//! Dropping the `authorize` future (e.g., the inbound request was cancelled)
//! aborts all in-flight checks with it.
//!
//! # Caching
//!
//! Decisions are cached per (uid, sorted groups, namespace, verb, resource,
//! group) for the permission cache TTL. Denials are cached like allowances, so
//! an RBAC grant made during that window only takes effect once the denial
//! expires. Evaluation errors are never cached.

mod access_review;

pub use access_review::KubeAccessReviewer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::UserIdentity;
use crate::cache::TtlCache;
use crate::config::ResourceRule;
use crate::error::{Error, Result};
use crate::scope::AccessScope;

/// A single permission check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessCheck {
    /// Subject of the check
    pub identity: UserIdentity,
    /// Kubernetes verb (e.g., "list")
    pub verb: String,
    /// Resource and API group
    pub resource: ResourceRule,
    /// Namespace; `None` checks cluster-wide
    pub namespace: Option<String>,
}

/// Answer of the RBAC API to a permission check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    /// The subject holds the permission
    Allowed,
    /// The subject does not hold the permission
    Denied,
    /// The API could not evaluate the permission
    EvaluationError(String),
}

/// Cluster RBAC API, access-review operation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    /// Review one permission
    ///
    /// `Err` is reserved for failures to reach or use the API.
    async fn review(&self, check: AccessCheck) -> Result<AccessDecision>;
}

/// Permission cache key
///
/// Groups are part of the key so a token reused under different group
/// memberships never hits a decision made for other memberships.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PermissionKey {
    uid: String,
    groups: Vec<String>,
    namespace: String,
    verb: String,
    resource: String,
    group: String,
}

impl PermissionKey {
    fn for_check(check: &AccessCheck) -> Self {
        let mut groups = check.identity.groups.clone();
        groups.sort();
        Self {
            uid: check.identity.uid.clone(),
            groups,
            namespace: check.namespace.clone().unwrap_or_default(),
            verb: check.verb.clone(),
            resource: check.resource.resource.clone(),
            group: check.resource.group.clone(),
        }
    }
}

/// Outcome of one task in the fan-out
enum CheckOutcome {
    Allowed,
    Denied(AccessCheck),
    Failed(Error),
    Cancelled,
}

/// Authorizes callers for a declared scope with cached, parallel RBAC checks
pub struct Authorizer {
    reviewer: Arc<dyn AccessReviewer>,
    cache: Arc<TtlCache<PermissionKey, bool>>,
    rules: Arc<[ResourceRule]>,
    verbs: Arc<[String]>,
}

impl Authorizer {
    /// Create an authorizer checking every rule for every verb
    pub fn new(
        reviewer: Arc<dyn AccessReviewer>,
        rules: Vec<ResourceRule>,
        verbs: Vec<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            reviewer,
            cache: Arc::new(TtlCache::new(cache_ttl)),
            rules: rules.into(),
            verbs: verbs.into(),
        }
    }

    /// Authorize a caller for the scope declared in the request headers
    pub async fn authorize(&self, identity: &UserIdentity, headers: &HeaderMap) -> Result<()> {
        let scope = AccessScope::from_headers(headers)?;
        self.authorize_scope(identity, &scope).await
    }

    /// Authorize a caller for an explicit scope
    pub async fn authorize_scope(&self, identity: &UserIdentity, scope: &AccessScope) -> Result<()> {
        if *scope == AccessScope::Unscoped {
            debug!(username = %identity.username, "Unscoped request, skipping RBAC checks");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for rule in self.rules.iter() {
            for verb in self.verbs.iter() {
                let check = AccessCheck {
                    identity: identity.clone(),
                    verb: verb.clone(),
                    resource: rule.clone(),
                    namespace: scope.namespace().map(str::to_string),
                };
                let reviewer = Arc::clone(&self.reviewer);
                let cache = Arc::clone(&self.cache);
                let cancel = cancel.clone();

                tasks.spawn(async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => CheckOutcome::Cancelled,
                        outcome = run_check(reviewer.as_ref(), &cache, check) => outcome,
                    }
                });
            }
        }

        let mut denial: Option<AccessCheck> = None;
        let mut failure: Option<Error> = None;

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                CheckOutcome::Failed(Error::Internal(format!("permission check task failed: {}", e)))
            });

            match outcome {
                CheckOutcome::Allowed | CheckOutcome::Cancelled => {}
                CheckOutcome::Denied(check) => {
                    cancel.cancel();
                    denial.get_or_insert(check);
                }
                CheckOutcome::Failed(err) => {
                    cancel.cancel();
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(check) = denial {
            let message = denial_message(&check, scope);
            debug!(message = %message, "RBAC denied caller");
            return Err(Error::Forbidden(message));
        }

        if let Some(err) = failure {
            warn!(username = %identity.username, error = %err, "RBAC evaluation failed");
            return Err(err);
        }

        debug!(username = %identity.username, scope = %scope, "RBAC checks passed");
        Ok(())
    }
}

/// Run one permission check through the cache
async fn run_check(
    reviewer: &dyn AccessReviewer,
    cache: &TtlCache<PermissionKey, bool>,
    check: AccessCheck,
) -> CheckOutcome {
    let key = PermissionKey::for_check(&check);

    if let Some(allowed) = cache.get(&key) {
        return if allowed {
            CheckOutcome::Allowed
        } else {
            CheckOutcome::Denied(check)
        };
    }

    match reviewer.review(check.clone()).await {
        Ok(AccessDecision::Allowed) => {
            cache.insert(key, true);
            CheckOutcome::Allowed
        }
        Ok(AccessDecision::Denied) => {
            cache.insert(key, false);
            CheckOutcome::Denied(check)
        }
        Ok(AccessDecision::EvaluationError(reason)) => CheckOutcome::Failed(Error::Internal(
            format!(
                "evaluating {} permission for resource \"{}\": {}",
                check.verb.to_uppercase(),
                check.resource.qualified(),
                reason
            ),
        )),
        Err(err) => CheckOutcome::Failed(err),
    }
}

/// Message naming the user, verb, qualified resource and scope of a denial
fn denial_message(check: &AccessCheck, scope: &AccessScope) -> String {
    format!(
        "user \"{}\" lacks {} permission for resource \"{}\" {}",
        check.identity.username,
        check.verb.to_uppercase(),
        check.resource.qualified(),
        scope
    )
}
