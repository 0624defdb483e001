// ---------------------------------------------------------------------------
// Server configuration and request DTOs
// ---------------------------------------------------------------------------

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_types::{PhaseToggles, PortRange, ScanConfig, ScanType, TimingProfile};

/// `[server]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub metrics_interval_secs: u64,
    /// WebSocket message and frame limit.
    pub max_ws_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: 30,
            max_ws_message_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }
}

/// `[auth]` section: bearer tokens that map to user identities.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<UserToken>,
}

#[derive(Clone, Deserialize)]
pub struct UserToken {
    pub token: String,
    pub user_id: String,
}

impl std::fmt::Debug for UserToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserToken")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// JSON body of `POST /api/scan/start`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartScanRequest {
    pub targets: Vec<String>,
    pub scan_type: Option<String>,
    pub ports: Option<String>,
    pub stealth: bool,
    pub timing: Option<TimingProfile>,
    pub phases: Option<PhaseToggles>,
    pub tags: Vec<String>,
}

impl StartScanRequest {
    /// Parse the loosely typed fields. Targets are validated by the
    /// supervisor.
    pub fn scan_config(&self) -> Result<ScanConfig, String> {
        let scan_type = match self.scan_type.as_deref() {
            Some(raw) => raw.parse::<ScanType>().map_err(|e| e.to_string())?,
            None => ScanType::default(),
        };
        let ports = match self.ports.as_deref() {
            Some(spec) => {
                PortRange::parse(spec).map_err(|e| format!("invalid port specification: {e}"))?
            }
            None => PortRange::default(),
        };
        Ok(ScanConfig {
            scan_type,
            ports,
            stealth: self.stealth,
            timing: self.timing.unwrap_or_default(),
            phases: self.phases.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let request: StartScanRequest =
            serde_json::from_str(r#"{"targets": ["10.0.0.5"]}"#).unwrap();
        let config = request.scan_config().unwrap();
        assert_eq!(config.scan_type, ScanType::Standard);
        assert_eq!(config.ports.to_string(), "1-1000");
        assert!(config.phases.threat_intel);
    }

    #[test]
    fn rejects_unknown_scan_type_and_bad_ports() {
        let request = StartScanRequest {
            scan_type: Some("exhaustive".into()),
            ..Default::default()
        };
        assert!(request.scan_config().is_err());

        let request = StartScanRequest {
            ports: Some("0-10".into()),
            ..Default::default()
        };
        assert!(request.scan_config().unwrap_err().contains("port"));
    }

    #[test]
    fn comprehensive_with_custom_ports() {
        let request: StartScanRequest = serde_json::from_str(
            r#"{"targets": ["10.0.0.5"], "scan_type": "comprehensive", "ports": "1-1024",
                "stealth": true, "timing": "aggressive"}"#,
        )
        .unwrap();
        let config = request.scan_config().unwrap();
        assert_eq!(config.scan_type, ScanType::Comprehensive);
        assert!(config.stealth);
        assert_eq!(config.timing, TimingProfile::Aggressive);
    }

    #[test]
    fn user_token_debug_is_redacted() {
        let token = UserToken {
            token: "t0ps3cret".into(),
            user_id: "alice".into(),
        };
        assert!(!format!("{token:?}").contains("t0ps3cret"));
    }
}
