//! Gateway configuration
//!
//! Plain configuration values with production defaults. The binary fills these
//! from command line flags and environment variables; tests build them directly.

use std::collections::BTreeMap;
use std::time::Duration;

use central_proto::Access;
use url::Url;

use crate::error::{Error, Result};

/// Default TTL for authenticated caller identities
pub const DEFAULT_IDENTITY_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default TTL for RBAC permission check decisions
pub const DEFAULT_PERMISSION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default lifetime requested for scoped tokens issued by central
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Default TTL for cached scoped tokens (strictly shorter than the lifetime)
pub const DEFAULT_TOKEN_CACHE_TTL: Duration = Duration::from_secs(240);

/// Default timeout for a single forwarded request
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the declared access scope of a request
pub const SCOPE_HEADER: &str = "ACS-AUTH-NAMESPACE-SCOPE";

/// A Kubernetes resource checked against the caller's RBAC permissions
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRule {
    /// Plural resource name (e.g., "pods")
    pub resource: String,
    /// API group; empty for the core group
    pub group: String,
}

impl ResourceRule {
    /// Create a rule for a resource in an API group
    pub fn new(resource: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            group: group.into(),
        }
    }

    /// Resource qualified with its group, using "core" for the empty group
    pub fn qualified(&self) -> String {
        let group = if self.group.is_empty() {
            "core"
        } else {
            &self.group
        };
        format!("{}.{}", self.resource, group)
    }
}

/// Resources a caller must be able to read before their request is forwarded
pub fn default_resource_rules() -> Vec<ResourceRule> {
    vec![
        ResourceRule::new("pods", ""),
        ResourceRule::new("deployments", "apps"),
        ResourceRule::new("replicasets", "apps"),
        ResourceRule::new("daemonsets", "apps"),
        ResourceRule::new("statefulsets", "apps"),
        ResourceRule::new("jobs", "batch"),
        ResourceRule::new("cronjobs", "batch"),
    ]
}

/// Verbs checked for every resource rule
pub fn default_verbs() -> Vec<String> {
    vec!["get".to_string(), "list".to_string()]
}

/// Central permissions requested for every scoped token
pub fn default_central_permissions() -> BTreeMap<String, Access> {
    ["Deployment", "Image", "Namespace", "NetworkGraph", "Node"]
        .into_iter()
        .map(|kind| (kind.to_string(), Access::ReadAccess))
        .collect()
}

/// Gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base address of central (scheme, host, port and optional path prefix)
    pub central_endpoint: Url,
    /// Additional PEM certificates trusted for central, besides the system roots
    pub ca_certs_pem: Vec<Vec<u8>>,
    /// TTL for cached caller identities
    pub identity_cache_ttl: Duration,
    /// TTL for cached permission check decisions (allowances and denials alike)
    pub permission_cache_ttl: Duration,
    /// Lifetime requested for scoped tokens
    pub token_lifetime: Duration,
    /// TTL for cached scoped tokens
    pub token_cache_ttl: Duration,
    /// Timeout for a single forwarded request
    pub upstream_timeout: Duration,
    /// Resources checked against RBAC for scoped requests
    pub resource_rules: Vec<ResourceRule>,
    /// Verbs checked for every resource
    pub verbs: Vec<String>,
    /// Central permissions carried by scoped tokens
    pub central_permissions: BTreeMap<String, Access>,
}

impl GatewayConfig {
    /// Configuration with defaults for everything but the central endpoint
    pub fn new(central_endpoint: Url) -> Self {
        Self {
            central_endpoint,
            ca_certs_pem: Vec::new(),
            identity_cache_ttl: DEFAULT_IDENTITY_CACHE_TTL,
            permission_cache_ttl: DEFAULT_PERMISSION_CACHE_TTL,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            token_cache_ttl: DEFAULT_TOKEN_CACHE_TTL,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            resource_rules: default_resource_rules(),
            verbs: default_verbs(),
            central_permissions: default_central_permissions(),
        }
    }

    /// Check invariants that the components rely on
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.central_endpoint.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "central endpoint must be http(s), got {}",
                self.central_endpoint
            )));
        }
        if self.central_endpoint.host_str().is_none() {
            return Err(Error::Config(format!(
                "central endpoint has no host: {}",
                self.central_endpoint
            )));
        }
        if self.token_cache_ttl >= self.token_lifetime {
            return Err(Error::Config(format!(
                "token cache TTL ({:?}) must be shorter than the token lifetime ({:?})",
                self.token_cache_ttl, self.token_lifetime
            )));
        }
        if self.resource_rules.is_empty() || self.verbs.is_empty() {
            return Err(Error::Config(
                "at least one resource and one verb must be checked".into(),
            ));
        }
        Ok(())
    }
}
