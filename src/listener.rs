use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::AggregatorHandle;
use crate::alerting::Alerting;
use crate::error::HoneypotError;
use crate::ports::format_port_ranges;
use crate::types::now_rfc3339;

/// Pause before accepting again after running out of descriptors or memory.
const RESOURCE_BACKOFF: Duration = Duration::from_millis(100);

/// One passive listener per port; every accepted connection is a probe.
pub struct ListenerPool {
    started: BTreeSet<u16>,
    failures: BTreeMap<u16, io::Error>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl ListenerPool {
    /// Bind every port in `ports` on `bind_ip` and start accepting.
    ///
    /// A port that cannot be bound is recorded in [`failures`](Self::failures)
    /// and skipped; the rest keep working. Writes one audit line listing the
    /// ports that did bind.
    pub async fn start(
        bind_ip: IpAddr,
        ports: &BTreeSet<u16>,
        aggregator: AggregatorHandle,
        alerting: &Alerting,
    ) -> Result<Self, HoneypotError> {
        if ports.is_empty() {
            return Err(HoneypotError::NoPorts);
        }

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut started = BTreeSet::new();
        let mut failures = BTreeMap::new();

        for &port in ports {
            match TcpListener::bind(SocketAddr::new(bind_ip, port)).await {
                Ok(listener) => {
                    started.insert(port);
                    tasks.spawn(accept_loop(listener, port, aggregator.clone(), cancel.clone()));
                }
                Err(e) => {
                    warn!("cannot listen on port {}: {}", port, e);
                    failures.insert(port, e);
                }
            }
        }

        if started.is_empty() {
            error!("scan detection has no listening ports ({} bind failures)", failures.len());
        } else {
            info!(
                "listening for probes on {} of {} ports",
                started.len(),
                ports.len()
            );
        }

        alerting
            .record(&format!(
                "{} LISTENING ON {} PORTS: {}",
                now_rfc3339(),
                started.len(),
                format_port_ranges(&started)
            ))
            .await;

        Ok(Self {
            started,
            failures,
            cancel,
            tasks,
        })
    }

    pub fn started(&self) -> &BTreeSet<u16> {
        &self.started
    }

    pub fn failures(&self) -> &BTreeMap<u16, io::Error> {
        &self.failures
    }

    /// Stop every accept loop and close the listening sockets.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
    }
}

async fn accept_loop(
    listener: TcpListener,
    port: u16,
    aggregator: AggregatorHandle,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => return,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, peer)) => {
                // Only the connection itself matters; close it without reading.
                drop(stream);
                aggregator.record_probe(peer.ip(), port).await;
            }
            Err(e) if is_resource_exhaustion(&e) => {
                warn!("accept on port {} failed: {}, backing off", port, e);
                tokio::time::sleep(RESOURCE_BACKOFF).await;
            }
            Err(e) => {
                debug!("accept on port {} failed: {}", port, e);
            }
        }
    }
}

fn is_resource_exhaustion(e: &io::Error) -> bool {
    // Linux ENOMEM, ENFILE, EMFILE, ENOBUFS
    matches!(e.raw_os_error(), Some(12 | 23 | 24 | 105)) || e.kind() == io::ErrorKind::OutOfMemory
}
