//! Gateway request handler
//!
//! Entry point for every inbound request. Admission runs in a fixed order and
//! stops at the first failure:
//!
//! 1. validate the method and central's reachability
//! 2. authenticate the bearer token
//! 3. authorize the declared scope against cluster RBAC
//!
//! Only an admitted request reaches the reverse proxy, so a rejected request
//! never causes a network call to central.
//!
//! # Reachability
//!
//! Central starts out unreachable. The flag only moves on explicit
//! [`GatewayHandler::notify`] calls; while it is unreachable every request is
//! answered with 503 before authentication.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response};
use axum::response::IntoResponse;
use tracing::{debug, info};

use crate::auth::{Authenticator, UserIdentity};
use crate::authz::Authorizer;
use crate::error::{Error, Result};
use crate::proxy::ReverseProxy;

/// Connectivity notification about central
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CentralConnectivity {
    /// Central can be reached
    Reachable,
    /// Central went offline
    Offline,
}

/// Authorization gateway in front of central
pub struct GatewayHandler {
    reachable: AtomicBool,
    authenticator: Authenticator,
    authorizer: Authorizer,
    proxy: ReverseProxy,
}

impl GatewayHandler {
    /// Create a handler; central is considered unreachable until notified
    pub fn new(authenticator: Authenticator, authorizer: Authorizer, proxy: ReverseProxy) -> Self {
        Self {
            reachable: AtomicBool::new(false),
            authenticator,
            authorizer,
            proxy,
        }
    }

    /// Record a connectivity change
    pub fn notify(&self, connectivity: CentralConnectivity) {
        let reachable = connectivity == CentralConnectivity::Reachable;
        let previous = self.reachable.swap(reachable, Ordering::AcqRel);
        if previous != reachable {
            info!(reachable, "Central connectivity changed");
        }
    }

    /// Whether central is currently considered reachable
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    /// Reject unsupported methods, and every request while central is unreachable
    pub fn validate_request<B>(&self, request: &Request<B>) -> Result<()> {
        let method = request.method();
        if method != Method::GET && method != Method::POST {
            return Err(Error::Unimplemented(format!(
                "method {} is not supported",
                method
            )));
        }

        if !self.is_reachable() {
            return Err(Error::ServiceUnavailable(
                "central is not reachable, try again later".into(),
            ));
        }

        Ok(())
    }

    /// Serve one request
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        let validated = self.validate_request(&request);
        let admitted = match validated {
            Ok(()) => self.admit(request.headers()).await,
            Err(err) => Err(err),
        };

        match admitted {
            Ok(identity) => {
                debug!(
                    username = %identity.username,
                    method = %request.method(),
                    path = %request.uri().path(),
                    "Request admitted"
                );
                self.proxy.forward(request).await
            }
            Err(err) => {
                debug!(
                    error = %err,
                    status = %err.status_code(),
                    method = %request.method(),
                    path = %request.uri().path(),
                    "Request rejected"
                );
                err.into_response()
            }
        }
    }

    async fn admit(&self, headers: &HeaderMap) -> Result<UserIdentity> {
        let identity = self.authenticator.authenticate(headers).await?;
        self.authorizer.authorize(&identity, headers).await?;
        Ok(identity)
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
