use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;

/// Severity ladder shared by findings and threat indicators.
///
/// Variants are declared in rank order so the derived `Ord` sorts
/// `Info < Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric precedence: critical 4, high 3, medium 2, low 1, info 0.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(TypeError::UnknownSeverity(other.to_string())),
        }
    }
}

/// A vulnerability assertion about one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    pub finding_type: String,
    pub severity: Severity,
    /// 0-100.
    pub confidence: u8,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub cves: Vec<String>,
    pub evidence: String,
    pub remediation: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `port/protocol` of the service the finding is about.
    pub location: String,
    pub target: String,
}

impl Finding {
    /// Reject values the wire format allows but the model does not.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.confidence > 100 {
            return Err(TypeError::InvalidConfidence(self.confidence));
        }
        Ok(())
    }
}

/// Finding counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeveritySummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            summary.record(finding.severity);
        }
        summary
    }

    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_follows_rank() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Low > Severity::Info);
        assert_eq!(Severity::Critical.rank(), 4);
        assert_eq!(Severity::Low.rank(), 1);
    }

    #[test]
    fn severity_rejects_unknown_values() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
        assert!(serde_json::from_str::<Severity>("\"HIGH\"").is_err());
    }

    #[test]
    fn finding_confidence_validated() {
        let mut finding = Finding {
            finding_type: "test".into(),
            severity: Severity::Low,
            confidence: 100,
            title: "t".into(),
            description: "d".into(),
            cves: vec![],
            evidence: "e".into(),
            remediation: "r".into(),
            tags: vec![],
            location: "80/tcp".into(),
            target: "10.0.0.1".into(),
        };
        assert!(finding.validate().is_ok());
        finding.confidence = 101;
        assert_eq!(
            finding.validate().unwrap_err(),
            TypeError::InvalidConfidence(101)
        );
    }

    #[test]
    fn summary_counts() {
        let mut summary = SeveritySummary::default();
        summary.record(Severity::Critical);
        summary.record(Severity::Critical);
        summary.record(Severity::Info);
        assert_eq!(summary.critical, 2);
        assert_eq!(summary.info, 1);
        assert_eq!(summary.total(), 3);
    }
}
