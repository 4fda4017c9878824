//! Scoped token provider
//!
//! Exchanges an access scope for a short-lived token minted by central's
//! token-issuing service. The caller's own token is never sent to central;
//! every forwarded request carries one of these narrowly scoped tokens instead.
//!
//! # Request Shape
//!
//! | Scope          | Cluster scopes sent                          |
//! |----------------|----------------------------------------------|
//! | Unscoped       | none                                         |
//! | Namespace(ns)  | `{cluster_id, namespaces: [ns]}`             |
//! | ClusterWide    | `{cluster_id, full_cluster_access: true}`    |
//!
//! Issued tokens are cached per scope for less than their validity window.
//! Failed exchanges and empty tokens are never cached.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use central_proto::{
    Access, ClusterScope, GenerateTokenForPermissionsAndScopeRequest, TokenServiceClient,
};
use parking_lot::RwLock;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};
use tracing::{debug, info};
use url::Url;

use crate::cache::TtlCache;
use crate::error::{Error, Result};
use crate::scope::AccessScope;

/// Source of the local cluster identifier
#[cfg_attr(test, mockall::automock)]
pub trait ClusterIdSource: Send + Sync {
    /// The cluster id, or `None` while it is not known yet
    fn cluster_id(&self) -> Option<String>;
}

/// Cluster identifier that becomes known at some point after startup
#[derive(Debug, Default)]
pub struct ClusterIdHandle {
    id: OnceLock<String>,
}

impl ClusterIdHandle {
    /// Create a handle with no identifier yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle with a known identifier
    pub fn with_id(id: impl Into<String>) -> Result<Self> {
        let handle = Self::new();
        handle.set(id)?;
        Ok(handle)
    }

    /// Record the cluster id; the first value sticks
    pub fn set(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::Config("cluster id must not be empty".into()));
        }
        match self.id.set(id.clone()) {
            Ok(()) => {
                info!(cluster_id = %id, "Cluster id is now known");
                Ok(())
            }
            Err(_) if self.id.get() == Some(&id) => Ok(()),
            Err(_) => Err(Error::Config(format!(
                "cluster id already set to {:?}, refusing {:?}",
                self.id.get(),
                id
            ))),
        }
    }
}

impl ClusterIdSource for ClusterIdHandle {
    fn cluster_id(&self) -> Option<String> {
        self.id.get().cloned()
    }
}

/// Central's token-issuing RPC
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a token for the given permissions and scopes
    async fn issue(&self, request: GenerateTokenForPermissionsAndScopeRequest) -> Result<String>;
}

/// TokenIssuer speaking gRPC to central
pub struct GrpcTokenIssuer {
    client: TokenServiceClient<Channel>,
}

impl GrpcTokenIssuer {
    /// Create an issuer whose connection is established on first use
    ///
    /// Only the origin of `central` is used. Over https, the system roots and
    /// `ca_certs_pem` are trusted, and `identity` (if any) is presented as the
    /// agent's client certificate.
    pub fn connect_lazy(
        central: &Url,
        ca_certs_pem: &[Vec<u8>],
        identity: Option<Identity>,
        timeout: Duration,
    ) -> Result<Self> {
        let origin = central.origin().ascii_serialization();
        let mut endpoint = Endpoint::from_shared(origin.clone())
            .map_err(|e| Error::Config(format!("invalid central endpoint {}: {}", origin, e)))?
            .timeout(timeout);

        if central.scheme() == "https" {
            let mut tls = ClientTlsConfig::new().with_native_roots();
            for pem in ca_certs_pem {
                tls = tls.ca_certificate(Certificate::from_pem(pem));
            }
            if let Some(host) = central.host_str() {
                tls = tls.domain_name(host);
            }
            if let Some(identity) = identity {
                tls = tls.identity(identity);
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| Error::Config(format!("central gRPC TLS config error: {}", e)))?;
        }

        Ok(Self {
            client: TokenServiceClient::new(endpoint.connect_lazy()),
        })
    }
}

#[async_trait]
impl TokenIssuer for GrpcTokenIssuer {
    async fn issue(&self, request: GenerateTokenForPermissionsAndScopeRequest) -> Result<String> {
        let mut client = self.client.clone();
        let response = client
            .generate_token_for_permissions_and_scope(request)
            .await?;
        Ok(response.into_inner().token)
    }
}

/// Returns cached or freshly issued scoped tokens
pub struct TokenProvider {
    issuer: RwLock<Option<Arc<dyn TokenIssuer>>>,
    cluster_id: Arc<dyn ClusterIdSource>,
    cache: TtlCache<String, String>,
    permissions: BTreeMap<String, Access>,
    lifetime: Duration,
}

impl TokenProvider {
    /// Create a provider with no issuer attached yet
    pub fn new(
        cluster_id: Arc<dyn ClusterIdSource>,
        permissions: BTreeMap<String, Access>,
        lifetime: Duration,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            issuer: RwLock::new(None),
            cluster_id,
            cache: TtlCache::new(cache_ttl),
            permissions,
            lifetime,
        }
    }

    /// Attach (or replace) the token issuer
    pub fn set_issuer(&self, issuer: Arc<dyn TokenIssuer>) {
        *self.issuer.write() = Some(issuer);
    }

    /// Get a token for a scope, issuing one on a cache miss
    pub async fn get_token_for_scope(&self, scope: &AccessScope) -> Result<String> {
        let key = scope.as_str().to_string();
        if let Some(token) = self.cache.get(&key) {
            debug!(scope = %scope, "Scoped token cache hit");
            return Ok(token);
        }

        let issuer = self.issuer.read().clone().ok_or_else(|| {
            Error::ServiceUnavailable("central token service not yet initialized".into())
        })?;

        let request = self.build_request(scope)?;
        let token = issuer.issue(request).await?;

        if token.is_empty() {
            return Err(Error::Proxy("central issued an empty token".into()));
        }

        debug!(scope = %scope, "Issued scoped token");
        self.cache.insert(key, token.clone());
        Ok(token)
    }

    /// Build the token request for a scope
    fn build_request(&self, scope: &AccessScope) -> Result<GenerateTokenForPermissionsAndScopeRequest> {
        let cluster_id = self.cluster_id.cluster_id().ok_or_else(|| {
            Error::ServiceUnavailable("local cluster id not yet known".into())
        })?;

        let cluster_scopes = match scope {
            AccessScope::Unscoped => Vec::new(),
            AccessScope::Namespace(namespace) => {
                vec![ClusterScope::namespace(cluster_id, namespace.clone())]
            }
            AccessScope::ClusterWide => vec![ClusterScope::full_cluster(cluster_id)],
        };

        Ok(GenerateTokenForPermissionsAndScopeRequest {
            permissions: self
                .permissions
                .iter()
                .map(|(kind, access)| (kind.clone(), *access as i32))
                .collect(),
            cluster_scopes,
            lifetime: Some(prost_types::Duration {
                seconds: self.lifetime.as_secs() as i64,
                nanos: self.lifetime.subsec_nanos() as i32,
            }),
        })
    }
}
