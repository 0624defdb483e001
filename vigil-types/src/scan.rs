use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;
use crate::finding::{Finding, SeveritySummary};
use crate::port::PortRange;
use crate::service::ServiceRecord;
use crate::threat::ThreatIndicator;

/// Lifecycle state of a scan.
///
/// `scheduled -> running -> {completed | failed | cancelled}`. Terminal states
/// are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    #[default]
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal forward move.
    pub fn can_transition_to(self, next: ScanStatus) -> bool {
        match self {
            ScanStatus::Scheduled => next != ScanStatus::Scheduled,
            ScanStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Scheduled => "scheduled",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ScanStatus::Scheduled),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(TypeError::UnknownStatus(other.to_string())),
        }
    }
}

/// How thorough a scan should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Quick,
    #[default]
    Standard,
    Comprehensive,
}

impl ScanType {
    /// Comprehensive scans run service detection even when no ports were found.
    pub fn forces_service_detection(self) -> bool {
        self == ScanType::Comprehensive
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick"),
            Self::Standard => write!(f, "standard"),
            Self::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

impl FromStr for ScanType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quick" => Ok(ScanType::Quick),
            "standard" => Ok(ScanType::Standard),
            "comprehensive" => Ok(ScanType::Comprehensive),
            other => Err(TypeError::UnknownScanType(other.to_string())),
        }
    }
}

/// Timing profile passed to the external tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingProfile {
    #[default]
    Normal,
    Aggressive,
}

/// Which detection phases run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseToggles {
    pub service_detection: bool,
    pub threat_intel: bool,
    pub vulnerability_analysis: bool,
    pub ai_analysis: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            service_detection: true,
            threat_intel: true,
            vulnerability_analysis: true,
            ai_analysis: true,
        }
    }
}

/// Per-scan configuration, fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan_type: ScanType,
    pub ports: PortRange,
    /// SYN scan instead of a full connect scan.
    pub stealth: bool,
    pub timing: TimingProfile,
    pub phases: PhaseToggles,
}

/// Progress of a running scan. `percentage` never goes down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Targets finished so far.
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub message: String,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            current: 0,
            total,
            percentage: 0,
            message: "Scan started".into(),
        }
    }

    /// Move to `percentage` (clamped to 100) unless that would go backwards.
    /// Returns the percentage actually recorded.
    pub fn advance(&mut self, percentage: u8, message: impl Into<String>) -> u8 {
        self.percentage = self.percentage.max(percentage.min(100));
        self.message = message.into();
        self.percentage
    }
}

/// OS guess for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOs {
    pub target: String,
    pub os: String,
}

/// Final results of a completed scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanResults {
    pub summary: SeveritySummary,
    pub findings: Vec<Finding>,
    pub risk_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
    pub services: Vec<ServiceRecord>,
    pub threats: Vec<ThreatIndicator>,
    pub os: Vec<TargetOs>,
    pub duration_ms: u64,
}

/// The persisted scan record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub targets: Vec<String>,
    pub config: ScanConfig,
    pub status: ScanStatus,
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ScanResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: u64,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
}

impl Scan {
    /// A new scan, already `running`.
    pub fn new(
        id: String,
        targets: Vec<String>,
        config: ScanConfig,
        owner: Option<String>,
        now: u64,
    ) -> Self {
        let total = targets.len();
        Self {
            id,
            owner,
            targets,
            config,
            status: ScanStatus::Running,
            progress: Progress::new(total),
            results: None,
            error_message: None,
            tags: Vec::new(),
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    /// Apply a status change, rejecting anything that is not a forward move.
    pub fn transition(&mut self, next: ScanStatus, now: u64) -> Result<(), TypeError> {
        if !self.status.can_transition_to(next) {
            return Err(TypeError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if next == ScanStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn is_owned_by(&self, user: Option<&str>) -> bool {
        match (&self.owner, user) {
            (None, _) => true,
            (Some(owner), Some(user)) => owner == user,
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> Scan {
        Scan::new(
            "s1".into(),
            vec!["10.0.0.5".into()],
            ScanConfig::default(),
            Some("alice".into()),
            1_000,
        )
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            ScanStatus::Completed,
            ScanStatus::Failed,
            ScanStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(ScanStatus::Running));
            assert!(!terminal.can_transition_to(ScanStatus::Completed));
        }
        assert!(ScanStatus::Scheduled.can_transition_to(ScanStatus::Running));
        assert!(!ScanStatus::Running.can_transition_to(ScanStatus::Scheduled));
        assert!(!ScanStatus::Running.can_transition_to(ScanStatus::Running));
    }

    #[test]
    fn transition_sets_completed_at() {
        let mut scan = scan();
        scan.transition(ScanStatus::Cancelled, 2_000).unwrap();
        assert_eq!(scan.completed_at, Some(2_000));
        let err = scan.transition(ScanStatus::Completed, 3_000).unwrap_err();
        assert!(matches!(err, TypeError::InvalidTransition { .. }));
        assert_eq!(scan.status, ScanStatus::Cancelled);
        assert_eq!(scan.completed_at, Some(2_000));
    }

    #[test]
    fn progress_never_decreases() {
        let mut progress = Progress::new(1);
        assert_eq!(progress.advance(60, "target done"), 60);
        assert_eq!(progress.advance(40, "late update"), 60);
        assert_eq!(progress.message, "late update");
        assert_eq!(progress.advance(250, "done"), 100);
    }

    #[test]
    fn config_defaults_from_empty_json() {
        let config: ScanConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.scan_type, ScanType::Standard);
        assert_eq!(config.ports.to_string(), "1-1000");
        assert!(config.phases.service_detection && config.phases.ai_analysis);
        assert!(!config.stealth);
    }

    #[test]
    fn ownership_rules() {
        let scan = scan();
        assert!(scan.is_owned_by(Some("alice")));
        assert!(!scan.is_owned_by(Some("bob")));
        assert!(!scan.is_owned_by(None));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ScanStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert!("paused".parse::<ScanStatus>().is_err());
    }
}
