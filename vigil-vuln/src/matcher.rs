// ---------------------------------------------------------------------------
// Service matching
// ---------------------------------------------------------------------------
//
// Pure mapping from detected services to findings. Same input, same output:
// rules are walked in table order for each service in input order.

use std::cmp::Ordering;

use tracing::debug;
use vigil_types::{Finding, ServiceRecord};

use crate::rules::{VersionBound, VulnRule, bundled_rules};
use crate::version::{compare_versions, extract_version};

/// Analyze services against the bundled rule table.
pub fn analyze(services: &[ServiceRecord]) -> Vec<Finding> {
    analyze_with(bundled_rules(), services)
}

/// Analyze services against an explicit rule table.
pub fn analyze_with(rules: &[VulnRule], services: &[ServiceRecord]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for service in services {
        for rule in rules {
            if rule_matches(rule, service) {
                findings.push(build_finding(rule, service));
            }
        }
    }
    debug!(
        services = services.len(),
        findings = findings.len(),
        "vulnerability analysis complete"
    );
    findings
}

fn rule_matches(rule: &VulnRule, service: &ServiceRecord) -> bool {
    let name = service.service.to_ascii_lowercase();
    let by_name = rule.services.iter().any(|s| *s == name);
    let by_port = rule.ports.contains(&service.port);

    let Some(product) = rule.product else {
        return by_name || by_port;
    };
    if !(by_name || by_port) {
        return false;
    }
    if !service
        .version
        .to_ascii_lowercase()
        .contains(&product.to_ascii_lowercase())
    {
        return false;
    }
    match &rule.version {
        VersionBound::Any => true,
        bound => match extract_version(&service.version, product) {
            Some(detected) => version_in_bound(&detected, bound),
            None => false,
        },
    }
}

fn version_in_bound(detected: &str, bound: &VersionBound) -> bool {
    match bound {
        VersionBound::Any => true,
        VersionBound::Exact(versions) => versions
            .iter()
            .any(|v| compare_versions(detected, v) == Ordering::Equal),
        VersionBound::Range { start, end } => {
            if let Some(start) = start
                && compare_versions(detected, start) == Ordering::Less
            {
                return false;
            }
            if let Some(end) = end
                && compare_versions(detected, end) != Ordering::Less
            {
                return false;
            }
            true
        }
    }
}

fn build_finding(rule: &VulnRule, service: &ServiceRecord) -> Finding {
    let location = service.location();
    let evidence = if service.version.is_empty() {
        format!("{} open on {location}", service.service)
    } else {
        format!("{} on {location}: {}", service.service, service.version)
    };
    Finding {
        finding_type: rule.id.to_string(),
        severity: rule.severity,
        confidence: rule.confidence.min(100),
        title: rule.title.to_string(),
        description: rule.description.to_string(),
        cves: rule.cves.iter().map(|c| c.to_string()).collect(),
        evidence,
        remediation: rule.remediation.to_string(),
        tags: rule.tags.iter().map(|t| t.to_string()).collect(),
        location,
        target: service.target.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
