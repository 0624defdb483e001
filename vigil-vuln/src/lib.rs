pub mod matcher;
pub mod risk;
pub mod rules;
pub mod version;

pub use matcher::analyze;
pub use risk::{HIGH_THREAT_WEIGHT, risk_score};
pub use rules::{VersionBound, VulnRule, bundled_rules};
pub use version::{compare_versions, extract_version};
