use async_trait::async_trait;
use vigil_types::{IndicatorKind, ThreatIndicator};

use crate::error::IntelError;

/// One threat-intelligence backend.
#[async_trait]
pub trait ThreatFeed: Send + Sync {
    /// Source name recorded on verdicts and used as the cache namespace.
    fn name(&self) -> &'static str;

    fn supports(&self, kind: IndicatorKind) -> bool;

    /// Ask the backend about `indicator`.
    ///
    /// `Ok(None)` means the backend has no record; a clean verdict is
    /// returned as `Some` with `ThreatType::Clean`.
    async fn lookup(
        &self,
        indicator: &str,
        kind: IndicatorKind,
    ) -> Result<Option<ThreatIndicator>, IntelError>;
}

/// Build a feed verdict stamped with the current time.
pub(crate) fn verdict(
    source: &'static str,
    indicator: &str,
    kind: IndicatorKind,
    classified: crate::feeds::Classification,
) -> ThreatIndicator {
    let now = vigil_types::now_ms();
    ThreatIndicator {
        indicator: indicator.to_string(),
        kind,
        threat_type: classified.threat_type,
        severity: classified.severity,
        confidence: classified.confidence.min(100),
        source: source.to_string(),
        metadata: classified.metadata,
        first_seen: now,
        last_seen: now,
    }
}
