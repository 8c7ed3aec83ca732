use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Highest privileged port; the default listening set is `1..=PRIVILEGED_MAX`.
pub const PRIVILEGED_MAX: u16 = 1023;

/// Parse a port specification into an ordered set of TCP ports (1..=65535).
///
/// Entries are separated by commas or newlines:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
/// - whitespace and blank entries are ignored
pub fn parse_ports_str(s: &str) -> Result<BTreeSet<u16>> {
    let mut out = BTreeSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().unwrap_or("");

        for entry in line.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some((a, b)) = entry.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                out.extend(start..=end);
                continue;
            }

            let p = parse_port_str(entry)
                .with_context(|| format!("line {line_no}: invalid port value: {entry}"))?;
            out.insert(p);
        }
    }

    Ok(out)
}

/// Load a port specification from a file.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<BTreeSet<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Every privileged port, 1 through 1023.
pub fn default_ports() -> BTreeSet<u16> {
    (1..=PRIVILEGED_MAX).collect()
}

/// Compact a port set into ranges, e.g. `1-20, 22-1023`.
pub fn format_port_ranges(ports: &BTreeSet<u16>) -> String {
    let mut parts = Vec::new();
    let mut iter = ports.iter().copied();
    let Some(first) = iter.next() else {
        return String::from("none");
    };

    let (mut start, mut prev) = (first, first);
    for p in iter {
        if p == prev + 1 {
            prev = p;
            continue;
        }
        parts.push(range_label(start, prev));
        start = p;
        prev = p;
    }
    parts.push(range_label(start, prev));
    parts.join(", ")
}

fn range_label(start: u16, end: u16) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
