//! Central Proxy - in-cluster authorization gateway to central

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use central_proxy::config::{
    DEFAULT_IDENTITY_CACHE_TTL, DEFAULT_PERMISSION_CACHE_TTL, DEFAULT_TOKEN_CACHE_TTL,
    DEFAULT_TOKEN_LIFETIME, DEFAULT_UPSTREAM_TIMEOUT,
};
use central_proxy::probe::{ReachabilityProbe, DEFAULT_PROBE_INTERVAL};
use central_proxy::server::{start_server, ServerConfig, TlsPem};
use central_proxy::telemetry::init_tracing;
use central_proxy::{
    CentralConnectivity, ClusterIdHandle, Gateway, GatewayConfig, GrpcTokenIssuer,
    KubeAccessReviewer, KubeTokenReviewer,
};

/// In-cluster authorization gateway brokering local callers to central
#[derive(Parser, Debug)]
#[command(name = "central-proxy", version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "CENTRAL_PROXY_LISTEN_ADDR", default_value = "0.0.0.0:9444")]
    listen_addr: SocketAddr,

    /// Base URL of central
    #[arg(
        long,
        env = "CENTRAL_ENDPOINT",
        default_value = "https://central.stackrox.svc:443"
    )]
    central_endpoint: Url,

    /// Identifier of this cluster as known to central
    #[arg(long, env = "CENTRAL_PROXY_CLUSTER_ID")]
    cluster_id: Option<String>,

    /// Extra CA certificate (PEM) trusted for central; may be repeated
    #[arg(long = "ca-cert", env = "CENTRAL_PROXY_CA_CERTS", value_delimiter = ',')]
    ca_certs: Vec<PathBuf>,

    /// Listener TLS certificate (PEM); plain HTTP when omitted
    #[arg(long, env = "CENTRAL_PROXY_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Listener TLS private key (PEM)
    #[arg(long, env = "CENTRAL_PROXY_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Client certificate (PEM) presented to central's token service
    #[arg(long, env = "CENTRAL_PROXY_CLIENT_CERT", requires = "client_key")]
    client_cert: Option<PathBuf>,

    /// Client private key (PEM) for central's token service
    #[arg(long, env = "CENTRAL_PROXY_CLIENT_KEY", requires = "client_cert")]
    client_key: Option<PathBuf>,

    /// Audiences accepted for caller tokens (API server defaults when empty)
    #[arg(long = "audience", env = "CENTRAL_PROXY_AUDIENCES", value_delimiter = ',')]
    audiences: Vec<String>,

    /// Seconds an authenticated caller identity stays cached
    #[arg(long, env = "CENTRAL_PROXY_IDENTITY_CACHE_TTL", default_value_t = DEFAULT_IDENTITY_CACHE_TTL.as_secs())]
    identity_cache_ttl_secs: u64,

    /// Seconds an RBAC decision stays cached
    #[arg(long, env = "CENTRAL_PROXY_PERMISSION_CACHE_TTL", default_value_t = DEFAULT_PERMISSION_CACHE_TTL.as_secs())]
    permission_cache_ttl_secs: u64,

    /// Lifetime in seconds requested for scoped tokens
    #[arg(long, env = "CENTRAL_PROXY_TOKEN_LIFETIME", default_value_t = DEFAULT_TOKEN_LIFETIME.as_secs())]
    token_lifetime_secs: u64,

    /// Seconds a scoped token stays cached; must be below the lifetime
    #[arg(long, env = "CENTRAL_PROXY_TOKEN_CACHE_TTL", default_value_t = DEFAULT_TOKEN_CACHE_TTL.as_secs())]
    token_cache_ttl_secs: u64,

    /// Timeout in seconds for calls to central
    #[arg(long, env = "CENTRAL_PROXY_UPSTREAM_TIMEOUT", default_value_t = DEFAULT_UPSTREAM_TIMEOUT.as_secs())]
    upstream_timeout_secs: u64,

    /// Seconds between reachability pings; 0 disables the probe and assumes central is reachable
    #[arg(long, env = "CENTRAL_PROXY_PROBE_INTERVAL", default_value_t = DEFAULT_PROBE_INTERVAL.as_secs())]
    probe_interval_secs: u64,
}

impl Cli {
    fn gateway_config(&self) -> anyhow::Result<GatewayConfig> {
        let mut config = GatewayConfig::new(self.central_endpoint.clone());
        config.ca_certs_pem = self
            .ca_certs
            .iter()
            .map(|path| read_pem(path))
            .collect::<anyhow::Result<_>>()?;
        config.identity_cache_ttl = Duration::from_secs(self.identity_cache_ttl_secs);
        config.permission_cache_ttl = Duration::from_secs(self.permission_cache_ttl_secs);
        config.token_lifetime = Duration::from_secs(self.token_lifetime_secs);
        config.token_cache_ttl = Duration::from_secs(self.token_cache_ttl_secs);
        config.upstream_timeout = Duration::from_secs(self.upstream_timeout_secs);
        Ok(config)
    }

    fn client_identity(&self) -> anyhow::Result<Option<tonic::transport::Identity>> {
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Ok(Some(tonic::transport::Identity::from_pem(
                read_pem(cert)?,
                read_pem(key)?,
            ))),
            _ => Ok(None),
        }
    }

    fn listener_tls(&self) -> anyhow::Result<Option<TlsPem>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some(TlsPem {
                cert_pem: read_pem(cert)?,
                key_pem: read_pem(key)?,
            })),
            _ => Ok(None),
        }
    }
}

fn read_pem(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    init_tracing()?;

    let cli = Cli::parse();
    let config = cli.gateway_config()?;

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let token_reviewer = if cli.audiences.is_empty() {
        KubeTokenReviewer::new(client.clone())
    } else {
        KubeTokenReviewer::with_audiences(client.clone(), cli.audiences.clone())
    };

    let cluster_id = Arc::new(ClusterIdHandle::new());
    if let Some(id) = &cli.cluster_id {
        cluster_id.set(id.clone())?;
    } else {
        warn!("No cluster id configured; scoped requests fail with 503 until it is known");
    }

    let gateway = Gateway::build(
        &config,
        Arc::new(token_reviewer),
        Arc::new(KubeAccessReviewer::new(client)),
        cluster_id,
    )?;

    let issuer = GrpcTokenIssuer::connect_lazy(
        &config.central_endpoint,
        &config.ca_certs_pem,
        cli.client_identity()?,
        config.upstream_timeout,
    )?;
    gateway.tokens.set_issuer(Arc::new(issuer));

    let shutdown = CancellationToken::new();

    if cli.probe_interval_secs == 0 {
        info!("Reachability probe disabled, treating central as reachable");
        gateway.handler.notify(CentralConnectivity::Reachable);
    } else {
        let probe = ReachabilityProbe::new(
            Arc::clone(&gateway.transport),
            &config.central_endpoint,
            Duration::from_secs(cli.probe_interval_secs),
        );
        let handler = Arc::clone(&gateway.handler);
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            probe.run(cancel, |c| handler.notify(c)).await;
        });
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal_shutdown.cancel();
    });

    let server_config = ServerConfig {
        addr: cli.listen_addr,
        tls: cli.listener_tls()?,
    };
    start_server(server_config, gateway.handler, shutdown).await?;

    info!("Central proxy stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
