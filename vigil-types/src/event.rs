use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::scan::{Progress, Scan, ScanResults};
use crate::threat::ThreatIndicator;

/// A named broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Scan(String),
    Dashboard,
    Threats,
    Incidents,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Scan(id) => write!(f, "scan:{id}"),
            Topic::Dashboard => f.write_str("dashboard"),
            Topic::Threats => f.write_str("threats"),
            Topic::Incidents => f.write_str("incidents"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dashboard" => Ok(Topic::Dashboard),
            "threats" => Ok(Topic::Threats),
            "incidents" => Ok(Topic::Incidents),
            other => match other.strip_prefix("scan:") {
                Some(id) if !id.is_empty() => Ok(Topic::Scan(id.to_string())),
                _ => Err(format!("unknown topic: {other}")),
            },
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Which step a progress event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanPhase {
    PortScanComplete,
    ServiceDetectionComplete,
    ThreatIntelComplete,
    TargetError,
    VulnerabilityAnalysisComplete,
    AiAnalysisComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentKind {
    New,
    Update,
    Alert,
}

/// Everything the server pushes to real-time clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected {
        connection_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    ScanStarted {
        scan_id: String,
        targets: Vec<String>,
        #[serde(skip)]
        owner: Option<String>,
    },
    ScanProgress {
        scan_id: String,
        phase: ScanPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        progress: Progress,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ScanCompleted {
        scan_id: String,
        results: Box<ScanResults>,
        #[serde(skip)]
        owner: Option<String>,
    },
    ScanFailed {
        scan_id: String,
        error: String,
        #[serde(skip)]
        owner: Option<String>,
    },
    ScanCancelled {
        scan_id: String,
        #[serde(skip)]
        owner: Option<String>,
    },
    SubscriptionConfirmed {
        topic: Topic,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scan: Option<Box<Scan>>,
    },
    NewThreat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scan_id: Option<String>,
        threat: Box<ThreatIndicator>,
    },
    ThreatUpdate {
        threat: Box<ThreatIndicator>,
    },
    NewIncident {
        incident: serde_json::Value,
    },
    IncidentUpdate {
        incident: serde_json::Value,
    },
    IncidentAlert {
        incident: serde_json::Value,
    },
    MetricsUpdate {
        active_scans: usize,
        connections: usize,
        topics: usize,
        uptime_secs: u64,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn incident(kind: IncidentKind, incident: serde_json::Value) -> Self {
        match kind {
            IncidentKind::New => ServerEvent::NewIncident { incident },
            IncidentKind::Update => ServerEvent::IncidentUpdate { incident },
            IncidentKind::Alert => ServerEvent::IncidentAlert { incident },
        }
    }

    /// The topics this event is published to.
    ///
    /// Scan progress goes to the scan's own topic only; lifecycle milestones
    /// are mirrored onto `dashboard`. Connection-scoped events return nothing
    /// and are sent directly.
    pub fn topics(&self) -> Vec<Topic> {
        match self {
            ServerEvent::ScanProgress { scan_id, .. } => vec![Topic::Scan(scan_id.clone())],
            ServerEvent::ScanStarted { scan_id, .. }
            | ServerEvent::ScanCompleted { scan_id, .. }
            | ServerEvent::ScanFailed { scan_id, .. }
            | ServerEvent::ScanCancelled { scan_id, .. } => {
                vec![Topic::Scan(scan_id.clone()), Topic::Dashboard]
            }
            ServerEvent::NewThreat { .. } | ServerEvent::ThreatUpdate { .. } => {
                vec![Topic::Threats, Topic::Dashboard]
            }
            ServerEvent::NewIncident { .. }
            | ServerEvent::IncidentUpdate { .. }
            | ServerEvent::IncidentAlert { .. } => vec![Topic::Incidents, Topic::Dashboard],
            ServerEvent::MetricsUpdate { .. } => vec![Topic::Dashboard],
            ServerEvent::Connected { .. }
            | ServerEvent::SubscriptionConfirmed { .. }
            | ServerEvent::Error { .. } => Vec::new(),
        }
    }

    /// The user a scan lifecycle event belongs to. Such an event may only
    /// reach connections of that user; `None` means anyone may see it.
    /// The owner never goes on the wire.
    pub fn owner(&self) -> Option<&str> {
        match self {
            ServerEvent::ScanStarted { owner, .. }
            | ServerEvent::ScanCompleted { owner, .. }
            | ServerEvent::ScanFailed { owner, .. }
            | ServerEvent::ScanCancelled { owner, .. } => owner.as_deref(),
            _ => None,
        }
    }
}

/// A server event stamped with its emission time, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: ServerEvent,
}

impl EventEnvelope {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            timestamp: crate::now_ms(),
            event,
        }
    }
}

/// Subscription requests sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    SubscribeScan { scan_id: String },
    UnsubscribeScan { scan_id: String },
    SubscribeDashboard,
    UnsubscribeDashboard,
    SubscribeThreats,
    UnsubscribeThreats,
    SubscribeIncidents,
    UnsubscribeIncidents,
}

impl ClientEvent {
    /// The topic the request refers to and whether it subscribes.
    pub fn topic(&self) -> (Topic, bool) {
        match self {
            ClientEvent::SubscribeScan { scan_id } => (Topic::Scan(scan_id.clone()), true),
            ClientEvent::UnsubscribeScan { scan_id } => (Topic::Scan(scan_id.clone()), false),
            ClientEvent::SubscribeDashboard => (Topic::Dashboard, true),
            ClientEvent::UnsubscribeDashboard => (Topic::Dashboard, false),
            ClientEvent::SubscribeThreats => (Topic::Threats, true),
            ClientEvent::UnsubscribeThreats => (Topic::Threats, false),
            ClientEvent::SubscribeIncidents => (Topic::Incidents, true),
            ClientEvent::UnsubscribeIncidents => (Topic::Incidents, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trip() {
        assert_eq!(Topic::Scan("abc".into()).to_string(), "scan:abc");
        assert_eq!("scan:abc".parse::<Topic>().unwrap(), Topic::Scan("abc".into()));
        assert_eq!("threats".parse::<Topic>().unwrap(), Topic::Threats);
        assert!("scan:".parse::<Topic>().is_err());
        assert!("alerts".parse::<Topic>().is_err());
    }

    #[test]
    fn envelope_carries_timestamp_and_kebab_tag() {
        let envelope = EventEnvelope {
            timestamp: 42,
            event: ServerEvent::ScanFailed {
                scan_id: "s1".into(),
                error: "boom".into(),
                owner: Some("alice".into()),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "scan-failed");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["scan_id"], "s1");
        assert!(json.get("owner").is_none());
    }

    #[test]
    fn client_events_parse() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"subscribe-scan","scan_id":"x"}"#).unwrap();
        assert_eq!(event.topic(), (Topic::Scan("x".into()), true));
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"unsubscribe-threats"}"#).unwrap();
        assert_eq!(event.topic(), (Topic::Threats, false));
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"subscribe-all"}"#).is_err());
    }

    #[test]
    fn progress_is_not_mirrored_to_dashboard() {
        let progress = ServerEvent::ScanProgress {
            scan_id: "s1".into(),
            phase: ScanPhase::PortScanComplete,
            target: None,
            progress: Progress::new(1),
            error: None,
        };
        assert_eq!(progress.topics(), vec![Topic::Scan("s1".into())]);

        let done = ServerEvent::ScanCancelled {
            scan_id: "s1".into(),
            owner: None,
        };
        assert!(done.topics().contains(&Topic::Dashboard));
    }
}
