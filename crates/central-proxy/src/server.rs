//! Gateway HTTP server
//!
//! - `GET /healthz` - liveness
//! - `GET|POST /proxy/central/*` - the gateway; the prefix is stripped before
//!   the handler sees the request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, Uri};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::handler::GatewayHandler;

/// Path prefix the gateway is mounted under
pub const GATEWAY_PREFIX: &str = "/proxy/central";

/// Grace period for in-flight requests on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Listener TLS material
#[derive(Clone)]
pub struct TlsPem {
    /// Certificate chain PEM
    pub cert_pem: Vec<u8>,
    /// Private key PEM
    pub key_pem: Vec<u8>,
}

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS material; plain HTTP when absent
    pub tls: Option<TlsPem>,
}

/// Build the router
pub fn router(handler: Arc<GatewayHandler>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(GATEWAY_PREFIX, any(gateway))
        .route(&format!("{}/{{*path}}", GATEWAY_PREFIX), any(gateway))
        .with_state(handler)
}

async fn gateway(State(handler): State<Arc<GatewayHandler>>, request: Request<Body>) -> Response<Body> {
    let (mut parts, body) = request.into_parts();
    match strip_gateway_prefix(&parts.uri) {
        Ok(uri) => parts.uri = uri,
        Err(err) => return err.into_response(),
    }
    handler.serve(Request::from_parts(parts, body)).await
}

/// Request URI as seen by the gateway: prefix removed, query kept
fn strip_gateway_prefix(uri: &Uri) -> Result<Uri> {
    let path = uri.path();
    let rest = path.strip_prefix(GATEWAY_PREFIX).unwrap_or(path);
    let rest = if rest.is_empty() { "/" } else { rest };

    let path_and_query = match uri.query() {
        Some(query) => format!("{}?{}", rest, query),
        None => rest.to_string(),
    };

    path_and_query
        .parse::<Uri>()
        .map_err(|e| Error::BadRequest(format!("invalid request path: {}", e)))
}

/// Serve until `shutdown` is cancelled
pub async fn start_server(
    config: ServerConfig,
    handler: Arc<GatewayHandler>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(handler);

    let handle = Handle::new();
    let graceful = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        graceful.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    let served = match config.tls {
        Some(tls) => {
            let tls_config = RustlsConfig::from_pem(tls.cert_pem, tls.key_pem)
                .await
                .map_err(|e| Error::Config(format!("TLS config error: {}", e)))?;

            info!(addr = %config.addr, "Starting gateway server (TLS)");
            axum_server::bind_rustls(config.addr, tls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            info!(addr = %config.addr, "Starting gateway server (plain HTTP)");
            axum_server::bind(config.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    served.map_err(|e| Error::Internal(format!("server error: {}", e)))
}
