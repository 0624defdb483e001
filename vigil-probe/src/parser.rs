//! Pure parsing of the external tool's normal (human-readable) output.
//!
//! Nothing here spawns processes, so every rule is unit-testable against
//! captured output.

use std::sync::LazyLock;

use regex::Regex;
use vigil_types::{Protocol, ServiceRecord};

/// `<port>/<proto>  <state>  <service> [version...]`
static PORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,5})/(tcp|udp|sctp)\s+(\S+)\s+(\S+)(?:\s+(.*?))?\s*$")
        .expect("port line regex is valid")
});

/// `Nmap scan report for <name> [(<address>)]`
static HOST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Nmap scan report for (\S+)(?:\s+\(([^)]+)\))?\s*$")
        .expect("host line regex is valid")
});

/// Parse every port line in `output` and keep only ports reported `open`.
///
/// `open|filtered`, `closed` and `filtered` lines are dropped, as is anything
/// that does not look like a port line at all. `banner` carries the raw line
/// whenever the tool reported version text.
///
/// Each record is tagged with the host named by the closest preceding
/// `Nmap scan report for` line, preferring the address in parentheses, so a
/// CIDR target yields one record per host and port. Lines before any host
/// header are tagged with `target` itself.
pub fn parse_services(target: &str, output: &str) -> Vec<ServiceRecord> {
    let mut records = Vec::new();
    let mut host = target.to_string();
    for line in output.lines() {
        if let Some(caps) = HOST_LINE.captures(line) {
            if let Some(name) = caps.get(2).or_else(|| caps.get(1)) {
                host = name.as_str().to_string();
            }
            continue;
        }
        let Some(caps) = PORT_LINE.captures(line) else {
            continue;
        };
        if &caps[3] != "open" {
            continue;
        }
        let Ok(port) = caps[1].parse::<u16>() else {
            continue;
        };
        if port == 0 {
            continue;
        }
        let Some(protocol) = Protocol::from_token(&caps[2]) else {
            continue;
        };
        let version = caps
            .get(5)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let banner = (!version.is_empty()).then(|| line.trim().to_string());
        records.push(ServiceRecord {
            target: host.clone(),
            port,
            protocol,
            service: caps[4].to_string(),
            version,
            banner,
        });
    }
    records
}

/// Extract the OS guess from `OS details:` or, failing that, `Running:`.
pub fn parse_os(output: &str) -> Option<String> {
    let mut running = None;
    for line in output.lines() {
        let line = line.trim();
        if let Some(details) = line.strip_prefix("OS details:") {
            let details = details.trim();
            if !details.is_empty() {
                return Some(details.to_string());
            }
        } else if running.is_none()
            && let Some(rest) = line.strip_prefix("Running:")
        {
            let rest = rest.trim();
            if !rest.is_empty() {
                running = Some(rest.to_string());
            }
        }
    }
    running
}
