use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use vigil_api::config::{AuthConfig, ServerConfig};
use vigil_api::state::Services;
use vigil_core::{AnalysisConfig, Analyzer};
use vigil_intel::{IntelConfig, ThreatIntelAggregator};
use vigil_probe::NmapScanner;

/// `[scanner]` section: the external tool and its deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub binary: String,
    pub port_scan_timeout_secs: u64,
    pub service_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: "nmap".into(),
            port_scan_timeout_secs: 30,
            service_timeout_secs: 60,
        }
    }
}

/// The whole configuration file. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub scanner: ScannerConfig,
    pub intel: IntelConfig,
    pub analysis: Option<AnalysisConfig>,
    pub auth: AuthConfig,
    pub server: ServerConfig,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Build the scanner, feeds and analyzer. Feed keys missing from the
    /// file are taken from the environment.
    pub fn services(&self) -> Services {
        let intel = self.intel.clone().with_env_keys();
        Services {
            scanner: Arc::new(NmapScanner::new(
                self.scanner.binary.clone(),
                Duration::from_secs(self.scanner.port_scan_timeout_secs),
                Duration::from_secs(self.scanner.service_timeout_secs),
            )),
            intel: Arc::new(ThreatIntelAggregator::new(
                intel.build_feeds(),
                intel.cache_ttl(),
            )),
            analyzer: Arc::new(
                self.analysis
                    .as_ref()
                    .map_or_else(Analyzer::placeholder, Analyzer::from_config),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let config = FileConfig::load(None).unwrap();
        assert_eq!(config.scanner.binary, "nmap");
        assert_eq!(config.intel.cache_ttl_secs, 300);
        assert!(config.analysis.is_none());
        assert!(config.auth.users.is_empty());
        assert_eq!(config.server.metrics_interval_secs, 30);
    }

    #[test]
    fn full_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.toml");
        std::fs::write(
            &path,
            r#"
[scanner]
binary = "/usr/local/bin/nmap"
port_scan_timeout_secs = 45

[intel]
cache_ttl_secs = 60

[intel.feeds.otx]
api_key = "otx-key"

[analysis]
endpoint = "http://localhost:11434/v1"
model = "llama3"

[[auth.users]]
token = "alice-token"
user_id = "alice"

[server]
metrics_interval_secs = 5
"#,
        )
        .unwrap();

        let config = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scanner.binary, "/usr/local/bin/nmap");
        assert_eq!(config.scanner.port_scan_timeout_secs, 45);
        assert_eq!(config.scanner.service_timeout_secs, 60);
        assert_eq!(config.intel.cache_ttl_secs, 60);
        assert_eq!(config.analysis.as_ref().unwrap().model, "llama3");
        assert_eq!(config.auth.users[0].user_id, "alice");
        assert_eq!(config.server.metrics_interval_secs, 5);

        let services = config.services();
        assert!(services.intel.feed_names().contains(&"otx"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scanner\nbinary = 1").unwrap();
        let err = FileConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
