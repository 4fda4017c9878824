//! Reverse proxy core
//!
//! Rewrites inbound requests onto central's base address and forwards them
//! through the scoped token transport. Method, path, query and body are kept;
//! hop-by-hop headers and the caller's own credentials are not.
//!
//! Failures never escape as faults: the error hook turns them into a status
//! and a readable reason.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request, Response, Uri};
use axum::response::IntoResponse;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{CentralRequest, CentralResponse, Transport};

/// Maximum forwarded request body size (10 MiB)
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Headers scoped to a single connection, never forwarded
static HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

/// Forwards requests to central
pub struct ReverseProxy {
    base: Url,
    transport: Arc<dyn Transport>,
}

impl ReverseProxy {
    /// Create a proxy targeting `base` through `transport`
    pub fn new(base: Url, transport: Arc<dyn Transport>) -> Self {
        Self { base, transport }
    }

    /// Forward a request, converting any failure into an error response
    pub async fn forward(&self, request: Request<Body>) -> Response<Body> {
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(err) => error_hook(err),
        }
    }

    async fn try_forward(&self, request: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();

        let url = target_url(&self.base, &parts.uri);
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::AUTHORIZATION);

        let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|e| Error::Internal(format!("failed to read request body: {}", e)))?;

        debug!(method = %parts.method, url = %url, body_len = body.len(), "Proxying to central");

        let response = self
            .transport
            .round_trip(CentralRequest {
                method: parts.method,
                url,
                headers,
                body,
            })
            .await?;

        Ok(build_response(response))
    }
}

/// Target URL on central for an inbound request URI
///
/// The request path is appended to any path prefix of `base`; the query is
/// carried over unchanged.
pub fn target_url(base: &Url, uri: &Uri) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    let path = uri.path();

    if path.starts_with('/') {
        url.set_path(&format!("{}{}", prefix, path));
    } else {
        url.set_path(&format!("{}/{}", prefix, path));
    }
    url.set_query(uri.query());
    url
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP_HEADERS.iter()) {
        headers.remove(name);
    }
}

fn build_response(response: CentralResponse) -> Response<Body> {
    debug!(
        status = %response.status,
        body_len = response.body.len(),
        "Received response from central"
    );

    let mut headers = response.headers;
    strip_hop_by_hop(&mut headers);

    let mut built = Response::new(Body::from(response.body));
    *built.status_mut() = response.status;
    *built.headers_mut() = headers;
    built
}

/// Convert a forwarding failure into the response sent to the caller
fn error_hook(err: Error) -> Response<Body> {
    warn!(error = %err, status = %err.status_code(), "Forwarding to central failed");
    err.into_response()
}
