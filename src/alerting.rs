//! Fan-out of detected events to the audit log and the notifier.
//!
//! Every step here is best effort: failures are logged and swallowed so a
//! broken mailbox or a full disk never stalls detection.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audit::AuditSink;
use crate::identity::IdentityResolver;
use crate::notify::Notifier;
use crate::types::{HoneypotEvent, Identity};

pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Clone)]
pub struct Alerting {
    resolver: Arc<dyn IdentityResolver>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    identity_timeout: Duration,
}

impl Alerting {
    pub fn new(
        resolver: Arc<dyn IdentityResolver>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            resolver,
            audit,
            notifier,
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
        }
    }

    pub fn with_identity_timeout(mut self, timeout: Duration) -> Self {
        self.identity_timeout = timeout;
        self
    }

    /// Resolve `addr`, degrading to [`Identity::Unknown`] on timeout.
    pub async fn identify(&self, addr: IpAddr) -> Identity {
        match tokio::time::timeout(self.identity_timeout, self.resolver.resolve(addr)).await {
            Ok(identity) => identity,
            Err(_) => {
                warn!("identity lookup for {} timed out", addr);
                Identity::Unknown
            }
        }
    }

    /// Append a free-form line (startup summaries and the like).
    pub async fn record(&self, line: &str) {
        if let Err(e) = self.audit.append(line).await {
            warn!("Logging to a file error: {}", e);
        }
    }

    /// Log, append and notify one event. Never fails.
    pub async fn dispatch(&self, event: &HoneypotEvent) {
        let line = event.audit_line();
        info!("{}", line);
        self.record(&line).await;

        if let Err(e) = self
            .notifier
            .notify(event.email_subject(), &event.email_body())
            .await
        {
            warn!("Mail sending error: {}", e);
        }
    }
}
