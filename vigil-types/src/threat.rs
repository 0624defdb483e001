use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::finding::Severity;

/// Normalized verdict category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreatType {
    #[default]
    Clean,
    Suspicious,
    Malware,
    Phishing,
    Ransomware,
    C2Server,
    Error,
}

impl ThreatType {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreatType::Clean => "clean",
            ThreatType::Suspicious => "suspicious",
            ThreatType::Malware => "malware",
            ThreatType::Phishing => "phishing",
            ThreatType::Ransomware => "ransomware",
            ThreatType::C2Server => "c2-server",
            ThreatType::Error => "error",
        }
    }

    /// Whether a verdict of this type says something about the indicator.
    pub fn is_threat(self) -> bool {
        !matches!(self, ThreatType::Clean | ThreatType::Error)
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(ThreatType::Clean),
            "suspicious" => Ok(ThreatType::Suspicious),
            "malware" => Ok(ThreatType::Malware),
            "phishing" => Ok(ThreatType::Phishing),
            "ransomware" => Ok(ThreatType::Ransomware),
            "c2-server" => Ok(ThreatType::C2Server),
            "error" => Ok(ThreatType::Error),
            other => Err(TypeError::UnknownThreatType(other.to_string())),
        }
    }
}

/// What kind of value an indicator is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Ip,
    Domain,
    Hash,
    Url,
}

impl IndicatorKind {
    /// Best guess from the value's shape.
    pub fn infer(value: &str) -> Self {
        let value = value.trim();
        if value.parse::<IpAddr>().is_ok() {
            return IndicatorKind::Ip;
        }
        if value.contains("://") {
            return IndicatorKind::Url;
        }
        let is_hex = !value.is_empty() && value.bytes().all(|b| b.is_ascii_hexdigit());
        if is_hex && matches!(value.len(), 32 | 40 | 64) {
            return IndicatorKind::Hash;
        }
        IndicatorKind::Domain
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::Ip => "ip",
            IndicatorKind::Domain => "domain",
            IndicatorKind::Hash => "hash",
            IndicatorKind::Url => "url",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(IndicatorKind::Ip),
            "domain" => Ok(IndicatorKind::Domain),
            "hash" => Ok(IndicatorKind::Hash),
            "url" => Ok(IndicatorKind::Url),
            other => Err(TypeError::UnknownIndicatorKind(other.to_string())),
        }
    }
}

/// One feed's contribution to a merged verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVerdict {
    pub source: String,
    #[serde(rename = "type")]
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub confidence: u8,
}

/// A normalized verdict about an indicator.
///
/// Persisted records are unique on `(indicator, source)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIndicator {
    pub indicator: String,
    pub kind: IndicatorKind,
    #[serde(rename = "type")]
    pub threat_type: ThreatType,
    pub severity: Severity,
    /// 0-100.
    pub confidence: u8,
    pub source: String,
    /// Feed-specific details. Merged results carry `all_sources`.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl ThreatIndicator {
    /// The verdict returned when no feed had anything to say.
    pub fn clean(indicator: &str, kind: IndicatorKind, now: u64) -> Self {
        Self {
            indicator: indicator.to_string(),
            kind,
            threat_type: ThreatType::Clean,
            severity: Severity::Info,
            confidence: 0,
            source: "aggregate".into(),
            metadata: serde_json::Map::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn is_threat(&self) -> bool {
        self.threat_type.is_threat()
    }

    /// The per-feed contributions recorded during a merge, if any.
    pub fn all_sources(&self) -> Vec<SourceVerdict> {
        self.metadata
            .get("all_sources")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_type_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ThreatType::C2Server).unwrap(),
            "\"c2-server\""
        );
        assert_eq!(
            "c2-server".parse::<ThreatType>().unwrap(),
            ThreatType::C2Server
        );
        assert!("botnet".parse::<ThreatType>().is_err());
        assert!(serde_json::from_str::<ThreatType>("\"botnet\"").is_err());
    }

    #[test]
    fn infer_indicator_kind() {
        assert_eq!(IndicatorKind::infer("10.0.0.5"), IndicatorKind::Ip);
        assert_eq!(IndicatorKind::infer("::1"), IndicatorKind::Ip);
        assert_eq!(IndicatorKind::infer("example.com"), IndicatorKind::Domain);
        assert_eq!(
            IndicatorKind::infer("http://example.com/a"),
            IndicatorKind::Url
        );
        assert_eq!(
            IndicatorKind::infer("d41d8cd98f00b204e9800998ecf8427e"),
            IndicatorKind::Hash
        );
    }

    #[test]
    fn clean_verdict_is_not_a_threat() {
        let verdict = ThreatIndicator::clean("10.0.0.5", IndicatorKind::Ip, 5);
        assert!(!verdict.is_threat());
        assert_eq!(verdict.confidence, 0);
        assert!(verdict.all_sources().is_empty());
    }
}
