use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use ::time::{format_description::well_known, OffsetDateTime};

/// Best-effort hardware identifier of a peer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Mac(String),
    Unknown,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Mac(mac) => f.write_str(mac),
            Identity::Unknown => f.write_str("unknown"),
        }
    }
}

/// One source that touched `threshold` or more distinct ports during one burst.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanAlert {
    pub timestamp: String,
    pub source: IpAddr,
    pub identity: Identity,
    /// Distinct ports in ascending order.
    pub ports: Vec<u16>,
}

/// A credential submission against the fake login page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    pub timestamp: String,
    pub source: IpAddr,
    pub identity: Identity,
    pub user_agent: Option<String>,
    pub form: BTreeMap<String, String>,
}

/// Anything the honeypot reports through the audit log and the notifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HoneypotEvent {
    PortScan(ScanAlert),
    Login(LoginAttempt),
}

impl HoneypotEvent {
    /// Single-line record for the audit log (no trailing newline).
    pub fn audit_line(&self) -> String {
        match self {
            HoneypotEvent::PortScan(alert) => format!(
                "{} PORT SCAN DETECTED: {}; {}; ports {}",
                alert.timestamp,
                alert.source,
                alert.identity,
                join_ports(&alert.ports)
            ),
            HoneypotEvent::Login(attempt) => format!(
                "{} INCOMING REQUEST: {}; {}; {}; {}",
                attempt.timestamp,
                attempt.source,
                attempt.identity,
                attempt.user_agent.as_deref().unwrap_or("-"),
                form_json(&attempt.form)
            ),
        }
    }

    pub fn email_subject(&self) -> &'static str {
        match self {
            HoneypotEvent::PortScan(_) => "PORT SCAN DETECTED ON HONEYPOT",
            HoneypotEvent::Login(_) => "INCOMING REQUEST TO HONEYPOT",
        }
    }

    /// HTML body for the notification. Peer-controlled values are escaped.
    pub fn email_body(&self) -> String {
        match self {
            HoneypotEvent::PortScan(alert) => format!(
                "<h1>PORT SCAN DETECTED</h1>\n\
                 <p>Somebody probed {count} ports on the honeypot:</p>\n\
                 <ul>\n\
                 <li><b>Timestamp:</b> {ts}</li>\n\
                 <li><b>IP:</b> {ip}</li>\n\
                 <li><b>MAC:</b> {mac}</li>\n\
                 <li><b>Ports:</b> {ports}</li>\n\
                 </ul>",
                count = alert.ports.len(),
                ts = alert.timestamp,
                ip = alert.source,
                mac = escape_html(&alert.identity.to_string()),
                ports = join_ports(&alert.ports),
            ),
            HoneypotEvent::Login(attempt) => format!(
                "<h1>INCOMING REQUEST</h1>\n\
                 <p>Somebody tried to sign in into the router dashboard:</p>\n\
                 <ul>\n\
                 <li><b>Timestamp:</b> {ts}</li>\n\
                 <li><b>IP:</b> {ip}</li>\n\
                 <li><b>MAC:</b> {mac}</li>\n\
                 <li><b>User Agent:</b> {ua}</li>\n\
                 <li><b>Request body:</b> {body}</li>\n\
                 </ul>",
                ts = attempt.timestamp,
                ip = attempt.source,
                mac = escape_html(&attempt.identity.to_string()),
                ua = escape_html(attempt.user_agent.as_deref().unwrap_or("-")),
                body = escape_html(&form_json(&attempt.form)),
            ),
        }
    }
}

/// Join ports as `21, 22, 23`.
pub fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// RFC 3339 UTC timestamp for records.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

fn form_json(form: &BTreeMap<String, String>) -> String {
    serde_json::to_string(form).unwrap_or_else(|_| String::from("{}"))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
