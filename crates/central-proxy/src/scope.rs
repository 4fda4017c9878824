//! Declared access scope of a proxied request
//!
//! Callers declare how wide their request reaches with the
//! `ACS-AUTH-NAMESPACE-SCOPE` header:
//!
//! | Header value     | Scope                                   |
//! |------------------|-----------------------------------------|
//! | absent / empty   | [`AccessScope::Unscoped`] (no RBAC check) |
//! | `<namespace>`    | [`AccessScope::Namespace`]              |
//! | `*`              | [`AccessScope::ClusterWide`]            |

use std::fmt;

use axum::http::HeaderMap;

use crate::config::SCOPE_HEADER;
use crate::error::{Error, Result};

/// Header value selecting cluster-wide scope
pub const CLUSTER_WIDE_SENTINEL: &str = "*";

/// Width of access requested for a proxied call
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessScope {
    /// No RBAC check is performed
    Unscoped,
    /// A single namespace
    Namespace(String),
    /// The whole cluster
    ClusterWide,
}

impl AccessScope {
    /// Parse the scope from its header string form
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" => AccessScope::Unscoped,
            CLUSTER_WIDE_SENTINEL => AccessScope::ClusterWide,
            namespace => AccessScope::Namespace(namespace.to_string()),
        }
    }

    /// Read the scope from request headers
    ///
    /// An absent header is `Unscoped`; a value that is not visible ASCII is
    /// rejected rather than guessed at.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        match headers.get(SCOPE_HEADER) {
            None => Ok(AccessScope::Unscoped),
            Some(value) => value
                .to_str()
                .map(Self::parse)
                .map_err(|_| Error::BadRequest(format!("invalid {} header", SCOPE_HEADER))),
        }
    }

    /// String form used as the header value and as the scoped token cache key
    pub fn as_str(&self) -> &str {
        match self {
            AccessScope::Unscoped => "",
            AccessScope::Namespace(namespace) => namespace,
            AccessScope::ClusterWide => CLUSTER_WIDE_SENTINEL,
        }
    }

    /// Namespace to check RBAC in; `None` for cluster-wide or unscoped
    pub fn namespace(&self) -> Option<&str> {
        match self {
            AccessScope::Namespace(namespace) => Some(namespace),
            _ => None,
        }
    }
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessScope::Unscoped => write!(f, "unscoped"),
            AccessScope::Namespace(namespace) => write!(f, "in namespace \"{}\"", namespace),
            AccessScope::ClusterWide => write!(f, "cluster-wide"),
        }
    }
}
