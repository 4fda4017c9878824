//! Central reachability probe
//!
//! Pings central on an interval and reports connectivity changes. Any answer
//! from the ping endpoint that is not a server error counts as reachable.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::handler::CentralConnectivity;
use crate::transport::{CentralRequest, Transport};

/// Path of central's unauthenticated ping endpoint
pub const PING_PATH: &str = "/v1/ping";

/// Default interval between pings
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Periodic connectivity check against central
pub struct ReachabilityProbe {
    transport: Arc<dyn Transport>,
    ping_url: Url,
    interval: Duration,
}

impl ReachabilityProbe {
    /// Create a probe pinging `central` through `transport`
    pub fn new(transport: Arc<dyn Transport>, central: &Url, interval: Duration) -> Self {
        let mut ping_url = central.clone();
        let prefix = central.path().trim_end_matches('/');
        ping_url.set_path(&format!("{}{}", prefix, PING_PATH));
        ping_url.set_query(None);

        Self {
            transport,
            ping_url,
            interval,
        }
    }

    /// Ping central once
    pub async fn check(&self) -> CentralConnectivity {
        let request = CentralRequest {
            method: Method::GET,
            url: self.ping_url.clone(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        match self.transport.round_trip(request).await {
            Ok(response) if !response.status.is_server_error() => CentralConnectivity::Reachable,
            Ok(response) => {
                debug!(status = %response.status, "Central ping returned a server error");
                CentralConnectivity::Offline
            }
            Err(e) => {
                debug!(error = %e, "Central ping failed");
                CentralConnectivity::Offline
            }
        }
    }

    /// Ping until cancelled, reporting every change (and the first result)
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_change: F)
    where
        F: FnMut(CentralConnectivity),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<CentralConnectivity> = None;

        info!(url = %self.ping_url, interval = ?self.interval, "Starting central reachability probe");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Central reachability probe stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let connectivity = self.check().await;
            if last != Some(connectivity) {
                last = Some(connectivity);
                on_change(connectivity);
            }
        }
    }
}
