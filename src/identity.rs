//! Best-effort mapping from a peer address to its hardware (MAC) address.
//!
//! Only peers on the local link have a neighbour entry; everything else
//! resolves to [`Identity::Unknown`].

use std::net::IpAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::types::Identity;

/// Neighbour table exposed by the Linux kernel.
pub const PROC_NET_ARP: &str = "/proc/net/arp";

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Never fails; lookups that cannot complete yield [`Identity::Unknown`].
    async fn resolve(&self, addr: IpAddr) -> Identity;
}

/// Looks peers up in the ARP cache.
///
/// Reads the kernel table when it is available and otherwise asks the
/// `arp` utility.
#[derive(Debug, Clone)]
pub struct ArpTableResolver {
    table: PathBuf,
}

impl ArpTableResolver {
    pub fn new() -> Self {
        Self::with_table(PROC_NET_ARP)
    }

    /// Use an alternative table file in `/proc/net/arp` format.
    pub fn with_table(path: impl Into<PathBuf>) -> Self {
        Self { table: path.into() }
    }

    async fn from_table(&self, ip: IpAddr) -> Option<Option<String>> {
        let content = tokio::fs::read_to_string(&self.table).await.ok()?;
        Some(parse_arp_table(&content, ip))
    }

    async fn from_command(&self, ip: IpAddr) -> Option<String> {
        let output = Command::new("arp")
            .arg("-n")
            .arg(ip.to_string())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => {
                parse_arp_command(&String::from_utf8_lossy(&out.stdout), ip)
            }
            Ok(out) => {
                debug!("arp -n {} exited with {}", ip, out.status);
                None
            }
            Err(e) => {
                debug!("arp utility unavailable: {}", e);
                None
            }
        }
    }
}

impl Default for ArpTableResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityResolver for ArpTableResolver {
    async fn resolve(&self, addr: IpAddr) -> Identity {
        let ip = addr.to_canonical();
        if ip.is_loopback() || ip.is_ipv6() {
            return Identity::Unknown;
        }

        let mac = match self.from_table(ip).await {
            Some(found) => found,
            None => self.from_command(ip).await,
        };
        mac.map(Identity::Mac).unwrap_or(Identity::Unknown)
    }
}

/// Find `ip` in `/proc/net/arp` content.
///
/// Columns: `IP address, HW type, Flags, HW address, Mask, Device`.
/// Incomplete entries (flags `0x0` or an all-zero address) are skipped.
pub fn parse_arp_table(content: &str, ip: IpAddr) -> Option<String> {
    let wanted = ip.to_string();
    content.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] != wanted || cols[2] == "0x0" {
            return None;
        }
        normalize_mac(cols[3])
    })
}

/// Extract the MAC from `arp -n <ip>` output (BSD and net-tools formats).
pub fn parse_arp_command(output: &str, ip: IpAddr) -> Option<String> {
    let wanted = ip.to_string();
    let bracketed = format!("({wanted})");
    output
        .lines()
        .filter(|line| {
            line.split_whitespace()
                .any(|tok| tok == wanted || tok == bracketed)
        })
        .flat_map(str::split_whitespace)
        .find_map(normalize_mac)
}

/// Accepts `a:b:c:d:e:f` with one- or two-digit groups, rejects all-zero.
fn normalize_mac(s: &str) -> Option<String> {
    let groups: Vec<&str> = s.split(':').collect();
    if groups.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (slot, g) in bytes.iter_mut().zip(&groups) {
        if g.is_empty() || g.len() > 2 {
            return None;
        }
        *slot = u8::from_str_radix(g, 16).ok()?;
    }
    if bytes.iter().all(|b| *b == 0) {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
