//! Port-scan aggregation.
//!
//! Probes are correlated per source address. A source that touches fewer
//! than `threshold` distinct ports is treated as background noise. Once the
//! threshold is reached the source is *armed*: every further probe pushes the
//! debounce deadline back, and when the source has been quiet for the whole
//! debounce window one alert is emitted with every port it touched.
//!
//! All state lives inside a single task. The listener pool talks to it
//! through an [`AggregatorHandle`], and the debounce timers are entries of a
//! [`DelayQueue`] polled by the same loop, so a reset can never race with an
//! expiry.

use std::collections::{BTreeSet, HashMap};
use std::future::poll_fn;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

use crate::alerting::Alerting;
use crate::error::HoneypotError;
use crate::types::{now_rfc3339, HoneypotEvent, ScanAlert};

const PROBE_QUEUE: usize = 4096;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionConfig {
    /// Distinct ports a source must touch before it is considered scanning.
    pub threshold: usize,
    /// Quiet period after the last probe of an armed source before alerting.
    pub debounce: Duration,
    /// Quiet period after which a source still below the threshold is forgotten.
    pub idle: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            debounce: Duration::from_millis(5000),
            idle: Duration::from_secs(60),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), HoneypotError> {
        if self.threshold == 0 {
            return Err(invalid("threshold", "must be at least 1"));
        }
        if self.debounce.is_zero() {
            return Err(invalid("debounce", "must be greater than zero"));
        }
        if self.idle < self.debounce {
            return Err(invalid("idle", "must not be shorter than the debounce window"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> HoneypotError {
    HoneypotError::ConfigInvalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Point-in-time view of one tracked source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSnapshot {
    pub source: IpAddr,
    pub ports: Vec<u16>,
    pub armed: bool,
}

struct SourceState {
    ports: BTreeSet<u16>,
    armed: bool,
    timer: delay_queue::Key,
    first_seen: Instant,
}

enum Command {
    Probe { source: IpAddr, port: u16 },
    Snapshot(oneshot::Sender<Vec<SourceSnapshot>>),
}

/// Cheap, cloneable entry point into a running [`ScanAggregator`].
#[derive(Clone, Debug)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
}

impl AggregatorHandle {
    /// Report one accepted connection from `source` on local `port`.
    ///
    /// IPv4-mapped IPv6 peers are folded into their IPv4 address.
    pub async fn record_probe(&self, source: IpAddr, port: u16) {
        let source = source.to_canonical();
        if self.tx.send(Command::Probe { source, port }).await.is_err() {
            debug!("aggregator stopped, dropping probe from {} on {}", source, port);
        }
    }

    /// Sources currently tracked, ordered by address.
    pub async fn active_sources(&self) -> Vec<SourceSnapshot> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

pub struct ScanAggregator {
    config: DetectionConfig,
    sources: HashMap<IpAddr, SourceState>,
    timers: DelayQueue<IpAddr>,
    alerting: Alerting,
    emissions: TaskTracker,
}

impl ScanAggregator {
    pub fn new(config: DetectionConfig, alerting: Alerting) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            timers: DelayQueue::new(),
            alerting,
            emissions: TaskTracker::new(),
        }
    }

    /// Move the aggregator onto its own task.
    ///
    /// The task ends when `cancel` fires, or once every handle is dropped and
    /// all pending debounce windows have run out.
    pub fn spawn(self, cancel: CancellationToken) -> (AggregatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(PROBE_QUEUE);
        let task = tokio::spawn(self.run(rx, cancel));
        (AggregatorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let mut closed = false;

        loop {
            if closed && self.sources.is_empty() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv(), if !closed => match cmd {
                    Some(Command::Probe { source, port }) => self.record_probe(source, port),
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    None => {
                        debug!("all probe senders gone, draining {} sources", self.sources.len());
                        closed = true;
                    }
                },
                Some(expired) = poll_fn(|cx| self.timers.poll_expired(cx)), if !self.timers.is_empty() => {
                    self.expire(expired.into_inner());
                }
            }
        }

        if !self.sources.is_empty() {
            info!("discarding {} unreported sources on shutdown", self.sources.len());
        }
        self.emissions.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.emissions.wait())
            .await
            .is_err()
        {
            warn!("gave up waiting for in-flight alerts");
        }
    }

    fn record_probe(&mut self, source: IpAddr, port: u16) {
        let DetectionConfig {
            threshold,
            debounce,
            idle,
        } = self.config;
        let timers = &mut self.timers;

        let state = self.sources.entry(source).or_insert_with(|| {
            debug!("new source {}", source);
            SourceState {
                ports: BTreeSet::new(),
                armed: false,
                timer: timers.insert(source, idle),
                first_seen: Instant::now(),
            }
        });

        if state.ports.insert(port) {
            debug!("{} touched port {} ({} distinct)", source, port, state.ports.len());
        }

        if state.armed {
            timers.reset(&state.timer, debounce);
        } else if state.ports.len() >= threshold {
            state.armed = true;
            timers.reset(&state.timer, debounce);
            debug!("{} reached {} ports, armed", source, state.ports.len());
        } else {
            timers.reset(&state.timer, idle);
        }
    }

    fn expire(&mut self, source: IpAddr) {
        let Some(state) = self.sources.remove(&source) else {
            warn!("timer fired for untracked source {}", source);
            return;
        };

        if !state.armed {
            debug!(
                "forgetting quiet source {} after {} ports",
                source,
                state.ports.len()
            );
            return;
        }

        let ports: Vec<u16> = state.ports.into_iter().collect();
        debug!(
            "{} quiet for {:?}, reporting {} ports seen over {:?}",
            source,
            self.config.debounce,
            ports.len(),
            state.first_seen.elapsed()
        );

        let alerting = self.alerting.clone();
        let timestamp = now_rfc3339();
        self.emissions.spawn(async move {
            let identity = alerting.identify(source).await;
            let alert = ScanAlert {
                timestamp,
                source,
                identity,
                ports,
            };
            alerting.dispatch(&HoneypotEvent::PortScan(alert)).await;
        });
    }

    fn snapshot(&self) -> Vec<SourceSnapshot> {
        let mut out: Vec<SourceSnapshot> = self
            .sources
            .iter()
            .map(|(source, state)| SourceSnapshot {
                source: *source,
                ports: state.ports.iter().copied().collect(),
                armed: state.armed,
            })
            .collect();
        out.sort_by_key(|s| s.source);
        out
    }
}
