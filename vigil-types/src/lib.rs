pub mod error;
pub mod event;
pub mod finding;
pub mod port;
pub mod scan;
pub mod service;
pub mod target;
pub mod threat;

pub use error::TypeError;
pub use event::{ClientEvent, EventEnvelope, IncidentKind, ScanPhase, ServerEvent, Topic};
pub use finding::{Finding, Severity, SeveritySummary};
pub use port::{PortRange, PortSpec};
pub use scan::{
    PhaseToggles, Progress, Scan, ScanConfig, ScanResults, ScanStatus, ScanType, TargetOs,
    TimingProfile,
};
pub use service::{Protocol, ServiceRecord};
pub use target::{MAX_TARGETS, is_network_block, validate_target, validate_targets};
pub use threat::{IndicatorKind, SourceVerdict, ThreatIndicator, ThreatType};

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current timestamp in milliseconds since the UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
