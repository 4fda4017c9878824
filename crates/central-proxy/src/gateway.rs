//! Gateway assembly
//!
//! Wires the authenticator, authorizer, token provider, transports and reverse
//! proxy into a [`GatewayHandler`] from a validated [`GatewayConfig`].

use std::sync::Arc;

use tracing::info;

use crate::auth::{Authenticator, TokenReviewer};
use crate::authz::{AccessReviewer, Authorizer};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::handler::GatewayHandler;
use crate::proxy::ReverseProxy;
use crate::token_provider::{ClusterIdSource, TokenProvider};
use crate::transport::{ReqwestTransport, ScopedTokenTransport, Transport};

/// An assembled gateway
pub struct Gateway {
    /// Request handler
    pub handler: Arc<GatewayHandler>,
    /// Scoped token provider; attach the token issuer here
    pub tokens: Arc<TokenProvider>,
    /// Unauthenticated transport to central, shared with the reachability probe
    pub transport: Arc<dyn Transport>,
}

impl Gateway {
    /// Build a gateway using reqwest to reach central
    pub fn build(
        config: &GatewayConfig,
        token_reviewer: Arc<dyn TokenReviewer>,
        access_reviewer: Arc<dyn AccessReviewer>,
        cluster_id: Arc<dyn ClusterIdSource>,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(
            &config.ca_certs_pem,
            config.upstream_timeout,
        )?);
        Self::build_with_transport(config, token_reviewer, access_reviewer, cluster_id, transport)
    }

    /// Build a gateway on top of an existing transport to central
    pub fn build_with_transport(
        config: &GatewayConfig,
        token_reviewer: Arc<dyn TokenReviewer>,
        access_reviewer: Arc<dyn AccessReviewer>,
        cluster_id: Arc<dyn ClusterIdSource>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let authenticator = Authenticator::new(token_reviewer, config.identity_cache_ttl);
        let authorizer = Authorizer::new(
            access_reviewer,
            config.resource_rules.clone(),
            config.verbs.clone(),
            config.permission_cache_ttl,
        );

        let tokens = Arc::new(TokenProvider::new(
            cluster_id,
            config.central_permissions.clone(),
            config.token_lifetime,
            config.token_cache_ttl,
        ));

        let scoped = ScopedTokenTransport::new(Arc::clone(&transport), Arc::clone(&tokens));
        let proxy = ReverseProxy::new(config.central_endpoint.clone(), Arc::new(scoped));

        info!(
            central = %config.central_endpoint,
            resources = config.resource_rules.len(),
            verbs = ?config.verbs,
            "Gateway assembled"
        );

        Ok(Self {
            handler: Arc::new(GatewayHandler::new(authenticator, authorizer, proxy)),
            tokens,
            transport,
        })
    }
}
