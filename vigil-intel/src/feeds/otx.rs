use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;
use vigil_types::{IndicatorKind, Severity, ThreatIndicator, ThreatType};

use super::{Classification, read_json};
use crate::IntelError;
use crate::feed::{ThreatFeed, verdict};

const NAME: &str = "otx";
const BASE_URL: &str = "https://otx.alienvault.com/api/v1/indicators";

/// AlienVault OTX pulse lookup.
pub struct OtxFeed {
    client: reqwest::Client,
    api_key: String,
}

impl OtxFeed {
    pub fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }
}

fn section(indicator: &str, kind: IndicatorKind) -> &'static str {
    match kind {
        IndicatorKind::Ip => match indicator.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => "IPv6",
            _ => "IPv4",
        },
        IndicatorKind::Domain => "domain",
        IndicatorKind::Hash => "file",
        IndicatorKind::Url => "url",
    }
}

#[async_trait]
impl ThreatFeed for OtxFeed {
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
        let mut url = reqwest::Url::parse(BASE_URL).map_err(|e| IntelError::Decode {
            feed: NAME,
            reason: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| IntelError::Decode {
                feed: NAME,
                reason: "base url cannot carry a path".into(),
            })?
            .extend([section(indicator, kind), indicator, "general"]);

        let response = self
            .client
            .get(url)
            .header("X-OTX-API-KEY", &self.api_key)
            .send()
            .await?;
        let Some(body) = read_json(NAME, response).await? else {
            return Ok(None);
        };
        let classified = classify_otx(&body);
        debug!(indicator, verdict = %classified.threat_type, "otx lookup");
        Ok(Some(verdict(NAME, indicator, kind, classified)))
    }
}

/// Map pulse names, tags and malware families onto the shared taxonomy.
///
/// First match wins: ransomware, command-and-control, phishing, generic
/// malware. Any pulse at all is at least suspicious.
pub fn classify_otx(body: &Value) -> Classification {
    let pulses = body["pulse_info"]["pulses"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    let count = body["pulse_info"]["count"]
        .as_u64()
        .unwrap_or(pulses.len() as u64);

    let mut text = String::new();
    for pulse in pulses {
        text.push_str(pulse["name"].as_str().unwrap_or_default());
        text.push(' ');
        for tag in pulse["tags"].as_array().into_iter().flatten() {
            text.push_str(tag.as_str().unwrap_or_default());
            text.push(' ');
        }
        for family in pulse["malware_families"].as_array().into_iter().flatten() {
            let name = family["display_name"]
                .as_str()
                .or_else(|| family.as_str())
                .unwrap_or_default();
            text.push_str(name);
            text.push(' ');
        }
    }
    let text = text.to_ascii_lowercase();
    let words: HashSet<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut metadata = Map::new();
    metadata.insert("pulse_count".into(), json!(count));
    let names: Vec<&str> = pulses
        .iter()
        .filter_map(|p| p["name"].as_str())
        .take(10)
        .collect();
    if !names.is_empty() {
        metadata.insert("pulses".into(), json!(names));
    }

    if count == 0 && pulses.is_empty() {
        return Classification::clean(metadata);
    }

    let has = |w: &str| words.contains(w);
    let (threat_type, severity) = if text.contains("ransom") {
        (ThreatType::Ransomware, Severity::Critical)
    } else if has("c2")
        || has("cnc")
        || has("botnet")
        || text.contains("command and control")
        || text.contains("command-and-control")
    {
        (ThreatType::C2Server, Severity::Critical)
    } else if text.contains("phish") {
        (ThreatType::Phishing, Severity::High)
    } else if has("malware") || has("trojan") || has("rat") || has("backdoor") {
        (ThreatType::Malware, Severity::High)
    } else {
        (ThreatType::Suspicious, Severity::Medium)
    };

    Classification {
        threat_type,
        severity,
        confidence: (50 + 10 * count.min(5)) as u8,
        metadata,
    }
}
