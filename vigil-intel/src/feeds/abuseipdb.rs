use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;
use vigil_types::{IndicatorKind, Severity, ThreatIndicator, ThreatType};

use super::{Classification, read_json};
use crate::IntelError;
use crate::feed::{ThreatFeed, verdict};

const NAME: &str = "abuseipdb";
const ENDPOINT: &str = "https://api.abuseipdb.com/api/v2/check";
/// AbuseIPDB report category for phishing.
const CATEGORY_PHISHING: u64 = 7;

/// AbuseIPDB reputation check. IP addresses only.
pub struct AbuseIpDbFeed {
    client: reqwest::Client,
    api_key: String,
}

impl AbuseIpDbFeed {
    pub fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl ThreatFeed for AbuseIpDbFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, kind: IndicatorKind) -> bool {
        kind == IndicatorKind::Ip
    }

    async fn lookup(
        &self,
        indicator: &str,
        kind: IndicatorKind,
    ) -> Result<Option<ThreatIndicator>, IntelError> {
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("ipAddress", indicator),
                ("maxAgeInDays", "90"),
                ("verbose", "true"),
            ])
            .header("Key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        let Some(body) = read_json(NAME, response).await? else {
            return Ok(None);
        };
        let classified = classify_abuseipdb(&body);
        debug!(indicator, verdict = %classified.threat_type, "abuseipdb lookup");
        Ok(Some(verdict(NAME, indicator, kind, classified)))
    }
}

/// Map a `/check` response onto the shared taxonomy.
///
/// Confidence score 75+ is malware/high, 25+ suspicious/medium, anything
/// lower clean. Reports tagged with the phishing category turn a non-clean
/// verdict into phishing.
pub fn classify_abuseipdb(body: &Value) -> Classification {
    let data = &body["data"];
    let score = data["abuseConfidenceScore"].as_u64().unwrap_or(0).min(100);

    let mut metadata = Map::new();
    metadata.insert("abuse_confidence_score".into(), json!(score));
    for (field, key) in [
        ("totalReports", "total_reports"),
        ("countryCode", "country_code"),
        ("isp", "isp"),
        ("usageType", "usage_type"),
    ] {
        if !data[field].is_null() {
            metadata.insert(key.into(), data[field].clone());
        }
    }

    let (threat_type, severity) = match score {
        75.. => (ThreatType::Malware, Severity::High),
        25.. => (ThreatType::Suspicious, Severity::Medium),
        _ => return Classification::clean(metadata),
    };

    let phishing = data["reports"].as_array().is_some_and(|reports| {
        reports.iter().any(|report| {
            report["categories"]
                .as_array()
                .is_some_and(|cats| cats.iter().any(|c| c.as_u64() == Some(CATEGORY_PHISHING)))
        })
    });

    Classification {
        threat_type: if phishing {
            ThreatType::Phishing
        } else {
            threat_type
        },
        severity,
        confidence: score as u8,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_score_is_malware() {
        let body = json!({"data": {"abuseConfidenceScore": 100, "totalReports": 512, "countryCode": "NL"}});
        let c = classify_abuseipdb(&body);
        assert_eq!(c.threat_type, ThreatType::Malware);
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.confidence, 100);
        assert_eq!(c.metadata["country_code"], "NL");
    }

    #[test]
    fn mid_score_is_suspicious() {
        let c = classify_abuseipdb(&json!({"data": {"abuseConfidenceScore": 30}}));
        assert_eq!(c.threat_type, ThreatType::Suspicious);
        assert_eq!(c.severity, Severity::Medium);
    }

    #[test]
    fn low_score_is_clean() {
        let c = classify_abuseipdb(&json!({"data": {"abuseConfidenceScore": 10}}));
        assert_eq!(c.threat_type, ThreatType::Clean);
        assert_eq!(c.confidence, 0);
        assert!(classify_abuseipdb(&json!({})).threat_type == ThreatType::Clean);
    }

    #[test]
    fn phishing_category_overrides_type() {
        let body = json!({"data": {
            "abuseConfidenceScore": 80,
            "reports": [{"categories": [18, 22]}, {"categories": [7]}]
        }});
        let c = classify_abuseipdb(&body);
        assert_eq!(c.threat_type, ThreatType::Phishing);
        assert_eq!(c.severity, Severity::High);
    }
}
