#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("unknown severity: {0}")]
    UnknownSeverity(String),
    #[error("unknown threat type: {0}")]
    UnknownThreatType(String),
    #[error("unknown indicator kind: {0}")]
    UnknownIndicatorKind(String),
    #[error("unknown scan status: {0}")]
    UnknownStatus(String),
    #[error("unknown scan type: {0}")]
    UnknownScanType(String),
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("invalid range: {0}-{1} (start > end)")]
    InvalidRange(u16, u16),
    #[error("empty port specification")]
    EmptyPorts,
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("no targets specified")]
    NoTargets,
    #[error("too many targets: {0} (max {max})", max = crate::target::MAX_TARGETS)]
    TooManyTargets(usize),
    #[error("confidence out of range: {0} (expected 0-100)")]
    InvalidConfidence(u8),
}
