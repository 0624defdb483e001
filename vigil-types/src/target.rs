use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::error::TypeError;

/// Upper bound on targets accepted in one scan request.
pub const MAX_TARGETS: usize = 256;

/// Check one target before it is handed to the external tool.
///
/// Accepts an IP address, a CIDR block, or a hostname made of letters, digits,
/// dots and hyphens. A leading `-` is refused so a target can never be read as
/// a command-line option.
pub fn validate_target(raw: &str) -> Result<String, TypeError> {
    let target = raw.trim();
    let invalid = |reason: &str| TypeError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    if target.is_empty() {
        return Err(invalid("empty"));
    }
    if target.len() > 253 {
        return Err(invalid("longer than 253 characters"));
    }
    if target.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if target.parse::<IpAddr>().is_ok() {
        return Ok(target.to_string());
    }
    if target.contains('/') {
        return target
            .parse::<IpNetwork>()
            .map(|_| target.to_string())
            .map_err(|e| invalid(&format!("bad CIDR block: {e}")));
    }
    if !target
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return Err(invalid("hostnames may only contain letters, digits, '.' and '-'"));
    }
    if target.split('.').any(|label| label.is_empty()) {
        return Err(invalid("empty hostname label"));
    }
    Ok(target.to_string())
}

/// True for a CIDR block such as `10.0.0.0/30`, which names many hosts and
/// so is never a single indicator.
pub fn is_network_block(value: &str) -> bool {
    let value = value.trim();
    value.contains('/') && value.parse::<IpNetwork>().is_ok()
}

/// Validate a whole target list. Rejects an empty list and lists over
/// [`MAX_TARGETS`].
pub fn validate_targets(raw: &[String]) -> Result<Vec<String>, TypeError> {
    if raw.is_empty() {
        return Err(TypeError::NoTargets);
    }
    if raw.len() > MAX_TARGETS {
        return Err(TypeError::TooManyTargets(raw.len()));
    }
    raw.iter().map(|t| validate_target(t)).collect()
}
