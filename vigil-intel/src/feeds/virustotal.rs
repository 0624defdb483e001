use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::debug;
use vigil_types::{IndicatorKind, Severity, ThreatIndicator, ThreatType};

use super::{Classification, read_json};
use crate::IntelError;
use crate::feed::{ThreatFeed, verdict};

const NAME: &str = "virustotal";
const BASE_URL: &str = "https://www.virustotal.com/api/v3";

/// VirusTotal v3 object lookup.
pub struct VirusTotalFeed {
    client: reqwest::Client,
    api_key: String,
}

impl VirusTotalFeed {
    pub fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }
}

/// Collection and object id for an indicator. URLs are addressed by the
/// SHA-256 of the URL text.
fn object_path(indicator: &str, kind: IndicatorKind) -> (&'static str, String) {
    match kind {
        IndicatorKind::Ip => ("ip_addresses", indicator.to_string()),
        IndicatorKind::Domain => ("domains", indicator.to_string()),
        IndicatorKind::Hash => ("files", indicator.to_ascii_lowercase()),
        IndicatorKind::Url => {
            let digest = Sha256::digest(indicator.as_bytes());
            let id = digest.iter().map(|b| format!("{b:02x}")).collect();
            ("urls", id)
        }
    }
}

#[async_trait]
impl ThreatFeed for VirusTotalFeed {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supports(&self, _kind: IndicatorKind) -> bool {
        true
    }

    async fn lookup(
        &self,
        indicator: &str,
        kind: IndicatorKind,
    ) -> Result<Option<ThreatIndicator>, IntelError> {
        let (collection, id) = object_path(indicator, kind);
        let mut url = reqwest::Url::parse(BASE_URL).map_err(|e| IntelError::Decode {
            feed: NAME,
            reason: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| IntelError::Decode {
                feed: NAME,
                reason: "base url cannot carry a path".into(),
            })?
            .extend([collection, id.as_str()]);

        let response = self
            .client
            .get(url)
            .header("x-apikey", &self.api_key)
            .send()
            .await?;
        let Some(body) = read_json(NAME, response).await? else {
            return Ok(None);
        };
        let classified = classify_virustotal(&body);
        debug!(indicator, verdict = %classified.threat_type, "virustotal lookup");
        Ok(Some(verdict(NAME, indicator, kind, classified)))
    }
}

/// Map engine verdict counts onto the shared taxonomy.
///
/// Five or more malicious engines is critical, one or more high, any
/// suspicious engine medium. A popular threat label mentioning ransomware or
/// phishing overrides the type of a non-clean verdict.
pub fn classify_virustotal(body: &Value) -> Classification {
    let attributes = &body["data"]["attributes"];
    let stats = &attributes["last_analysis_stats"];
    let count = |field: &str| stats[field].as_u64().unwrap_or(0);
    let malicious = count("malicious");
    let suspicious = count("suspicious");
    let engines = malicious + suspicious + count("harmless") + count("undetected");

    let classification = &attributes["popular_threat_classification"];
    let mut labels: Vec<String> = Vec::new();
    if let Some(label) = classification["suggested_threat_label"].as_str() {
        labels.push(label.to_ascii_lowercase());
    }
    for category in classification["popular_threat_category"]
        .as_array()
        .into_iter()
        .flatten()
    {
        if let Some(value) = category["value"].as_str() {
            labels.push(value.to_ascii_lowercase());
        }
    }

    let mut metadata = Map::new();
    metadata.insert("malicious".into(), json!(malicious));
    metadata.insert("suspicious".into(), json!(suspicious));
    metadata.insert("engines".into(), json!(engines));
    if let Some(reputation) = attributes["reputation"].as_i64() {
        metadata.insert("reputation".into(), json!(reputation));
    }
    if !labels.is_empty() {
        metadata.insert("labels".into(), json!(labels));
    }

    let (threat_type, severity) = match (malicious, suspicious) {
        (5.., _) => (ThreatType::Malware, Severity::Critical),
        (1.., _) => (ThreatType::Malware, Severity::High),
        (0, 1..) => (ThreatType::Suspicious, Severity::Medium),
        _ => return Classification::clean(metadata),
    };

    let threat_type = if labels.iter().any(|l| l.contains("ransom")) {
        ThreatType::Ransomware
    } else if labels.iter().any(|l| l.contains("phish")) {
        ThreatType::Phishing
    } else {
        threat_type
    };

    let confidence = if engines == 0 {
        50
    } else {
        ((malicious + suspicious) * 100 / engines).clamp(10, 100)
    };

    Classification {
        threat_type,
        severity,
        confidence: confidence as u8,
        metadata,
    }
}
