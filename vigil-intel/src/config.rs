use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::feed::ThreatFeed;
use crate::feeds::{AbuseIpDbFeed, OtxFeed, VirusTotalFeed};

/// `[intel]` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntelConfig {
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub feeds: FeedsConfig,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            request_timeout_secs: 10,
            feeds: FeedsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    pub abuseipdb: FeedConfig,
    pub otx: FeedConfig,
    pub virustotal: FeedConfig,
}

/// A feed is enabled iff it has an API key.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub api_key: Option<String>,
}

impl std::fmt::Debug for FeedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FeedConfig {
    fn key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

impl IntelConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Fill missing API keys from `ABUSEIPDB_API_KEY`, `OTX_API_KEY` and
    /// `VIRUSTOTAL_API_KEY`.
    pub fn with_env_keys(mut self) -> Self {
        self.with_lookup(|name| std::env::var(name).ok());
        self
    }

    fn with_lookup(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (feed, var) in [
            (&mut self.feeds.abuseipdb, "ABUSEIPDB_API_KEY"),
            (&mut self.feeds.otx, "OTX_API_KEY"),
            (&mut self.feeds.virustotal, "VIRUSTOTAL_API_KEY"),
        ] {
            if feed.key().is_none() {
                feed.api_key = lookup(var).filter(|k| !k.trim().is_empty());
            }
        }
    }

    /// Build every feed that has a key.
    pub fn build_feeds(&self) -> Vec<Arc<dyn ThreatFeed>> {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs.max(1)))
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client, threat feeds disabled");
                return Vec::new();
            }
        };

        let mut feeds: Vec<Arc<dyn ThreatFeed>> = Vec::new();
        if let Some(key) = self.feeds.abuseipdb.key() {
            feeds.push(Arc::new(AbuseIpDbFeed::new(client.clone(), key)));
        }
        if let Some(key) = self.feeds.otx.key() {
            feeds.push(Arc::new(OtxFeed::new(client.clone(), key)));
        }
        if let Some(key) = self.feeds.virustotal.key() {
            feeds.push(Arc::new(VirusTotalFeed::new(client, key)));
        }
        let names: Vec<&str> = feeds.iter().map(|f| f.name()).collect();
        info!(feeds = ?names, "threat feeds configured");
        feeds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_partial_toml() {
        let config: IntelConfig = toml_like(r#"{"cache_ttl_secs": 60}"#);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.request_timeout_secs, 10);
        assert!(config.build_feeds().is_empty());
    }

    #[test]
    fn feeds_enabled_by_key() {
        let config: IntelConfig =
            toml_like(r#"{"feeds": {"otx": {"api_key": "k"}, "virustotal": {"api_key": " "}}}"#);
        let names: Vec<&str> = config.build_feeds().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["otx"]);
    }

    #[test]
    fn env_keys_fill_gaps_only() {
        let mut config = IntelConfig::default();
        config.feeds.otx.api_key = Some("from-file".into());
        config.with_lookup(|var| Some(format!("env-{var}")));
        assert_eq!(config.feeds.otx.api_key.as_deref(), Some("from-file"));
        assert_eq!(
            config.feeds.abuseipdb.api_key.as_deref(),
            Some("env-ABUSEIPDB_API_KEY")
        );
    }

    #[test]
    fn debug_redacts_keys() {
        let feed = FeedConfig {
            api_key: Some("secret".into()),
        };
        assert!(!format!("{feed:?}").contains("secret"));
    }

    // Same serde model the TOML loader uses.
    fn toml_like(json: &str) -> IntelConfig {
        serde_json::from_str(json).unwrap()
    }
}
