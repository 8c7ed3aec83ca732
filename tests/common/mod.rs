#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use router_honeypot::alerting::Alerting;
use router_honeypot::audit::AuditSink;
use router_honeypot::error::SinkError;
use router_honeypot::identity::IdentityResolver;
use router_honeypot::notify::Notifier;
use router_honeypot::types::Identity;
use tokio::sync::mpsc;

/// Audit sink and notifier that forward every call to the test.
pub struct Recorder {
    lines: mpsc::UnboundedSender<String>,
    mails: mpsc::UnboundedSender<(String, String)>,
}

#[async_trait]
impl AuditSink for Recorder {
    async fn append(&self, line: &str) -> Result<(), SinkError> {
        let _ = self.lines.send(line.to_string());
        Ok(())
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, subject: &str, html_body: &str) -> Result<(), SinkError> {
        let _ = self.mails.send((subject.to_string(), html_body.to_string()));
        Ok(())
    }
}

/// Sinks that always fail.
pub struct Broken;

#[async_trait]
impl AuditSink for Broken {
    async fn append(&self, _line: &str) -> Result<(), SinkError> {
        Err(SinkError::Audit(std::io::Error::other("disk full")))
    }
}

#[async_trait]
impl Notifier for Broken {
    async fn notify(&self, _subject: &str, _html_body: &str) -> Result<(), SinkError> {
        Err(SinkError::Audit(std::io::Error::other("mailbox down")))
    }
}

/// Resolver backed by a fixed table.
#[derive(Default)]
pub struct StaticResolver(pub HashMap<IpAddr, String>);

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, addr: IpAddr) -> Identity {
        self.0
            .get(&addr)
            .cloned()
            .map(Identity::Mac)
            .unwrap_or(Identity::Unknown)
    }
}

/// Resolver that never answers.
pub struct HangingResolver;

#[async_trait]
impl IdentityResolver for HangingResolver {
    async fn resolve(&self, _addr: IpAddr) -> Identity {
        std::future::pending().await
    }
}

pub struct Captured {
    pub lines: mpsc::UnboundedReceiver<String>,
    pub mails: mpsc::UnboundedReceiver<(String, String)>,
}

impl Captured {
    /// Next audit line containing `needle`, skipping others, or `None` after `wait`.
    pub async fn line_containing(&mut self, needle: &str, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, async {
            while let Some(line) = self.lines.recv().await {
                if line.contains(needle) {
                    return Some(line);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    pub async fn next_scan(&mut self, wait: Duration) -> Option<String> {
        self.line_containing("PORT SCAN DETECTED", wait).await
    }
}

pub fn recording_alerting(resolver: Arc<dyn IdentityResolver>) -> (Alerting, Captured) {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (mail_tx, mail_rx) = mpsc::unbounded_channel();
    let recorder = Arc::new(Recorder {
        lines: line_tx,
        mails: mail_tx,
    });
    let alerting = Alerting::new(resolver, recorder.clone(), recorder);
    (
        alerting,
        Captured {
            lines: line_rx,
            mails: mail_rx,
        },
    )
}

pub fn recording() -> (Alerting, Captured) {
    recording_alerting(Arc::new(StaticResolver::default()))
}
