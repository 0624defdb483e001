mod abuseipdb;
mod otx;
mod virustotal;

pub use abuseipdb::{AbuseIpDbFeed, classify_abuseipdb};
pub use otx::{OtxFeed, classify_otx};
pub use virustotal::{VirusTotalFeed, classify_virustotal};

use serde_json::{Map, Value};
use vigil_types::{Severity, ThreatType};

/// A feed response mapped onto the shared taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub confidence: u8,
    pub metadata: Map<String, Value>,
}

impl Classification {
    pub fn clean(metadata: Map<String, Value>) -> Self {
        Self {
            threat_type: ThreatType::Clean,
            severity: Severity::Info,
            confidence: 0,
            metadata,
        }
    }
}

/// Status check shared by every feed. 404 means "never heard of it".
async fn read_json(
    feed: &'static str,
    response: reqwest::Response,
) -> Result<Option<Value>, crate::IntelError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(crate::IntelError::Status {
            feed,
            status: status.as_u16(),
        });
    }
    let body = response.json::<Value>().await.map_err(|e| {
        crate::IntelError::Decode {
            feed,
            reason: e.to_string(),
        }
    })?;
    Ok(Some(body))
}
