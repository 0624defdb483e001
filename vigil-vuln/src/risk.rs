use vigil_types::{Severity, SeveritySummary, ThreatIndicator};

/// Base score every completed scan starts from.
pub const BASE_SCORE: i64 = 50;
pub const CRITICAL_FINDING_WEIGHT: i64 = 20;
pub const HIGH_FINDING_WEIGHT: i64 = 15;
pub const HIGH_THREAT_WEIGHT: i64 = 25;

/// Composite risk score in `0..=100`.
///
/// `50 + 20 * critical findings + 15 * high findings + 25 * threats of high
/// severity or worse`, clamped.
pub fn risk_score(summary: &SeveritySummary, threats: &[ThreatIndicator]) -> u8 {
    let high_threats = threats
        .iter()
        .filter(|t| t.severity >= Severity::High)
        .count() as i64;
    let score = BASE_SCORE
        + CRITICAL_FINDING_WEIGHT * summary.critical as i64
        + HIGH_FINDING_WEIGHT * summary.high as i64
        + HIGH_THREAT_WEIGHT * high_threats;
    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{IndicatorKind, ThreatType};

    fn threat(severity: Severity) -> ThreatIndicator {
        ThreatIndicator {
            indicator: "10.0.0.5".into(),
            kind: IndicatorKind::Ip,
            threat_type: ThreatType::Malware,
            severity,
            confidence: 80,
            source: "otx".into(),
            metadata: Default::default(),
            first_seen: 0,
            last_seen: 0,
        }
    }

    #[test]
    fn empty_scan_scores_base() {
        assert_eq!(risk_score(&SeveritySummary::default(), &[]), 50);
    }

    #[test]
    fn one_critical_is_seventy() {
        let summary = SeveritySummary {
            critical: 1,
            ..Default::default()
        };
        assert_eq!(risk_score(&summary, &[]), 70);
    }

    #[test]
    fn only_high_threats_count() {
        let summary = SeveritySummary {
            high: 1,
            medium: 4,
            ..Default::default()
        };
        let threats = [threat(Severity::Medium), threat(Severity::Critical)];
        assert_eq!(risk_score(&summary, &threats), 90);
    }

    #[test]
    fn clamps_at_hundred() {
        let summary = SeveritySummary {
            critical: 5,
            ..Default::default()
        };
        assert_eq!(risk_score(&summary, &[]), 100);
    }
}
