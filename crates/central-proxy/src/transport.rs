//! Outbound transports to central
//!
//! - `ReqwestTransport`: plain HTTPS round trips to central
//! - `ScopedTokenTransport`: injects a scoped bearer token, then delegates
//!
//! The inner transport presents no client certificate. The caller's authority
//! reaches central only through the injected token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::scope::AccessScope;
use crate::token_provider::TokenProvider;

/// A fully addressed request to central
#[derive(Clone, Debug)]
pub struct CentralRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

/// Buffered response from central
#[derive(Debug)]
pub struct CentralResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

/// One request/response exchange with central
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the complete response
    async fn round_trip(&self, request: CentralRequest) -> Result<CentralResponse>;
}

/// Transport using reqwest over TLS
///
/// Trusts the system roots plus any supplied CA certificates. Redirects are
/// returned to the caller as-is.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport trusting the given extra PEM certificates
    pub fn new(ca_certs_pem: &[Vec<u8>], timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);

        for pem in ca_certs_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| Error::Config(format!("invalid CA certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: CentralRequest) -> Result<CentralResponse> {
        let CentralRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Proxy(format!("failed to reach central: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Proxy(format!("failed to read central response: {}", e)))?;

        Ok(CentralResponse {
            status,
            headers,
            body,
        })
    }
}

/// Transport that authenticates each request with a scoped token
pub struct ScopedTokenTransport {
    inner: Arc<dyn Transport>,
    provider: Arc<TokenProvider>,
}

impl ScopedTokenTransport {
    /// Wrap `inner`, taking tokens from `provider`
    pub fn new(inner: Arc<dyn Transport>, provider: Arc<TokenProvider>) -> Self {
        Self { inner, provider }
    }
}

#[async_trait]
impl Transport for ScopedTokenTransport {
    async fn round_trip(&self, request: CentralRequest) -> Result<CentralResponse> {
        let scope = AccessScope::from_headers(&request.headers)?;
        let token = Zeroizing::new(self.provider.get_token_for_scope(&scope).await?);

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", *token))
            .map_err(|_| Error::Proxy("central issued a token that is not a valid header".into()))?;
        authorization.set_sensitive(true);

        let mut scoped = request;
        scoped.headers.insert(header::AUTHORIZATION, authorization);

        debug!(method = %scoped.method, url = %scoped.url, scope = %scope, "Forwarding with scoped token");
        self.inner.round_trip(scoped).await
    }
}
