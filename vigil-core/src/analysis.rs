// ---------------------------------------------------------------------------
// Explanatory analysis phase
// ---------------------------------------------------------------------------
//
// Best effort: an OpenAI-compatible chat-completions endpoint when one is
// configured, a deterministic summary otherwise or on any failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vigil_types::ScanResults;

/// `[analysis]` section of the config file.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout_secs: 30,
        }
    }
}

impl std::fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

struct Backend {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

pub struct Analyzer {
    backend: Option<Backend>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are a security analyst. Explain the scan results below \
     for an operator: the most important risks first, then concrete next steps. \
     Be brief and do not invent findings.";

impl Analyzer {
    /// Always answers with [`placeholder_summary`].
    pub fn placeholder() -> Self {
        Self { backend: None }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        let (Some(endpoint), Some(api_key)) = (
            config.endpoint.as_deref().filter(|e| !e.trim().is_empty()),
            config.api_key.as_deref().filter(|k| !k.trim().is_empty()),
        ) else {
            debug!("analysis backend not configured, using placeholder summaries");
            return Self::placeholder();
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to build analysis client, using placeholder summaries");
                return Self::placeholder();
            }
        };

        Self {
            backend: Some(Backend {
                client,
                url: format!("{}/chat/completions", endpoint.trim_end_matches('/')),
                api_key: api_key.to_string(),
                model: config.model.clone(),
            }),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Explain `results`. Never fails.
    pub async fn explain(&self, targets: &[String], results: &ScanResults) -> String {
        let Some(backend) = &self.backend else {
            return placeholder_summary(targets, results);
        };
        match request_explanation(backend, targets, results).await {
            Ok(text) => text,
            Err(reason) => {
                warn!(%reason, "analysis request failed, using placeholder summary");
                placeholder_summary(targets, results)
            }
        }
    }
}

async fn request_explanation(
    backend: &Backend,
    targets: &[String],
    results: &ScanResults,
) -> Result<String, String> {
    let prompt = build_prompt(targets, results);
    let request = ChatRequest {
        model: &backend.model,
        messages: [
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: &prompt,
            },
        ],
        temperature: 0.2,
    };

    let response = backend
        .client
        .post(&backend.url)
        .bearer_auth(&backend.api_key)
        .json(&request)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let body: ChatResponse = response.json().await.map_err(|e| e.to_string())?;
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| "empty completion".to_string())
}

fn build_prompt(targets: &[String], results: &ScanResults) -> String {
    let mut prompt = format!(
        "Targets: {}\nRisk score: {}/100\nOpen services: {}\n",
        targets.join(", "),
        results.risk_score,
        results.services.len()
    );
    prompt.push_str("Findings:\n");
    for finding in results.findings.iter().take(50) {
        prompt.push_str(&format!(
            "- [{}] {} at {} ({})\n",
            finding.severity,
            finding.title,
            finding.location,
            finding.cves.join(", ")
        ));
    }
    if !results.threats.is_empty() {
        prompt.push_str("Threat intelligence:\n");
        for threat in &results.threats {
            prompt.push_str(&format!(
                "- {} flagged as {} ({}) by {}\n",
                threat.indicator, threat.threat_type, threat.severity, threat.source
            ));
        }
    }
    prompt
}

/// Deterministic explanation built from the severity counts.
pub fn placeholder_summary(targets: &[String], results: &ScanResults) -> String {
    let s = &results.summary;
    let mut text = format!(
        "Scanned {} target(s) and found {} open service(s). \
         Findings: {} critical, {} high, {} medium, {} low, {} info. \
         Risk score {}/100.",
        targets.len(),
        results.services.len(),
        s.critical,
        s.high,
        s.medium,
        s.low,
        s.info,
        results.risk_score
    );
    if !results.threats.is_empty() {
        text.push_str(&format!(
            " {} target(s) are flagged by threat intelligence.",
            results.threats.len()
        ));
    }
    if s.critical > 0 || s.high > 0 {
        text.push_str(" Address critical and high severity findings first.");
    } else if s.total() == 0 {
        text.push_str(" No known vulnerabilities were matched.");
    }
    text.push_str(" Configure an analysis backend for a detailed explanation.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::SeveritySummary;

    fn results() -> ScanResults {
        ScanResults {
            summary: SeveritySummary {
                critical: 1,
                high: 0,
                medium: 2,
                low: 0,
                info: 0,
            },
            risk_score: 70,
            ..Default::default()
        }
    }

    #[test]
    fn placeholder_mentions_counts() {
        let text = placeholder_summary(&["10.0.0.5".into()], &results());
        assert!(text.contains("1 critical"));
        assert!(text.contains("2 medium"));
        assert!(text.contains("70/100"));
        assert!(text.contains("critical and high"));
    }

    #[test]
    fn placeholder_is_deterministic() {
        let targets = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            placeholder_summary(&targets, &results()),
            placeholder_summary(&targets, &results())
        );
    }

    #[test]
    fn incomplete_config_degrades_to_placeholder() {
        let config = AnalysisConfig {
            endpoint: Some("https://api.example.test/v1".into()),
            api_key: Some("  ".into()),
            ..Default::default()
        };
        assert!(!Analyzer::from_config(&config).is_configured());
        assert!(!Analyzer::from_config(&AnalysisConfig::default()).is_configured());
    }

    #[tokio::test]
    async fn unconfigured_explain_uses_placeholder() {
        let targets = vec!["10.0.0.5".to_string()];
        let text = Analyzer::placeholder().explain(&targets, &results()).await;
        assert_eq!(text, placeholder_summary(&targets, &results()));
    }

    #[test]
    fn debug_redacts_key() {
        let config = AnalysisConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }
}
