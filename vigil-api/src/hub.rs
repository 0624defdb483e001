// ---------------------------------------------------------------------------
// Topic-based broadcast hub
// ---------------------------------------------------------------------------
//
// Connection registry plus topic -> subscriber index. Delivery is
// at-most-once: each connection has a bounded queue and an event that does
// not fit is dropped for that connection. Nothing is replayed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use vigil_core::EventSink;
use vigil_types::{EventEnvelope, IncidentKind, ServerEvent, Topic};

/// Per-connection outbound queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Serialized envelope, shared by every recipient.
pub type Frame = Arc<str>;

struct Connection {
    user_id: Option<String>,
    topics: HashSet<Topic>,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<String, Connection>,
    topics: HashMap<Topic, HashSet<String>>,
}

pub struct BroadcastHub {
    registry: Mutex<Registry>,
    queue_capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

fn encode(event: ServerEvent) -> Option<Frame> {
    match serde_json::to_string(&EventEnvelope::new(event)) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(error = %e, "failed to encode event");
            None
        }
    }
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connection. The receiver yields every frame routed to it.
    pub fn connect(&self, user_id: Option<String>) -> (String, mpsc::Receiver<Frame>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.lock().connections.insert(
            id.clone(),
            Connection {
                user_id,
                topics: HashSet::new(),
                tx,
            },
        );
        debug!(connection_id = %id, "connection registered");
        (id, rx)
    }

    /// Drop a connection and every subscription it held.
    pub fn disconnect(&self, connection_id: &str) {
        let mut registry = self.lock();
        let Some(connection) = registry.connections.remove(connection_id) else {
            return;
        };
        for topic in connection.topics {
            remove_subscriber(&mut registry.topics, &topic, connection_id);
        }
        debug!(connection_id, "connection removed");
    }

    /// Returns false if the connection is unknown.
    pub fn subscribe(&self, connection_id: &str, topic: Topic) -> bool {
        let mut registry = self.lock();
        let Some(connection) = registry.connections.get_mut(connection_id) else {
            return false;
        };
        connection.topics.insert(topic.clone());
        debug!(connection_id, %topic, "subscribed");
        registry
            .topics
            .entry(topic)
            .or_default()
            .insert(connection_id.to_string());
        true
    }

    /// Returns whether the connection was subscribed.
    pub fn unsubscribe(&self, connection_id: &str, topic: &Topic) -> bool {
        let mut registry = self.lock();
        let was_subscribed = registry
            .connections
            .get_mut(connection_id)
            .is_some_and(|c| c.topics.remove(topic));
        if was_subscribed {
            remove_subscriber(&mut registry.topics, topic, connection_id);
            debug!(connection_id, %topic, "unsubscribed");
        }
        was_subscribed
    }

    /// Route `event` to the topics it belongs to. A connection subscribed
    /// to several of them receives it once. Returns the number of
    /// connections it was queued for.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let topics = event.topics();
        self.publish_to(&topics, event)
    }

    /// Publish `event` on exactly one topic.
    pub fn publish_topic(&self, topic: &Topic, event: ServerEvent) -> usize {
        self.publish_to(std::slice::from_ref(topic), event)
    }

    /// Events that belong to a user's scan skip connections of anyone else,
    /// whichever topic they came in through.
    fn publish_to(&self, topics: &[Topic], event: ServerEvent) -> usize {
        let registry = self.lock();
        let owner = event.owner().map(str::to_string);
        let recipients: Vec<(&String, &Connection)> = topics
            .iter()
            .filter_map(|t| registry.topics.get(t))
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| registry.connections.get(id).map(|c| (id, c)))
            .filter(|(_, c)| {
                owner
                    .as_deref()
                    .is_none_or(|owner| c.user_id.as_deref() == Some(owner))
            })
            .collect();
        if recipients.is_empty() {
            return 0;
        }
        let Some(frame) = encode(event) else {
            return 0;
        };
        recipients
            .into_iter()
            .filter(|(id, c)| deliver(id, &c.tx, &frame))
            .count()
    }

    /// Send directly to one connection, regardless of subscriptions.
    pub fn send_to(&self, connection_id: &str, event: ServerEvent) -> bool {
        let registry = self.lock();
        let Some(connection) = registry.connections.get(connection_id) else {
            return false;
        };
        encode(event).is_some_and(|frame| deliver(connection_id, &connection.tx, &frame))
    }

    /// Deliver to every authenticated connection of `user_id`.
    pub fn emit_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        self.broadcast_to_users(&[user_id], event)
    }

    /// Deliver to every authenticated connection of any of `user_ids`.
    /// Anonymous connections never match.
    pub fn broadcast_to_users(&self, user_ids: &[&str], event: ServerEvent) -> usize {
        let registry = self.lock();
        let targets: Vec<(&String, &Connection)> = registry
            .connections
            .iter()
            .filter(|(_, c)| {
                c.user_id
                    .as_deref()
                    .is_some_and(|user| user_ids.contains(&user))
            })
            .collect();
        if targets.is_empty() {
            return 0;
        }
        let Some(frame) = encode(event) else {
            return 0;
        };
        targets
            .into_iter()
            .filter(|(id, c)| deliver(id, &c.tx, &frame))
            .count()
    }

    /// Fan an incident produced elsewhere out to `incidents` and `dashboard`.
    pub fn publish_incident(&self, kind: IncidentKind, incident: serde_json::Value) -> usize {
        self.broadcast(ServerEvent::incident(kind, incident))
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.lock().topics.get(topic).map_or(0, HashSet::len)
    }

    pub fn topic_count(&self) -> usize {
        self.lock().topics.len()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn user_of(&self, connection_id: &str) -> Option<String> {
        self.lock()
            .connections
            .get(connection_id)
            .and_then(|c| c.user_id.clone())
    }

    /// Forget every connection and subscription.
    pub fn reset(&self) {
        let mut registry = self.lock();
        registry.connections.clear();
        registry.topics.clear();
    }
}

impl EventSink for BroadcastHub {
    fn publish(&self, event: ServerEvent) {
        self.broadcast(event);
    }
}

fn remove_subscriber(
    topics: &mut HashMap<Topic, HashSet<String>>,
    topic: &Topic,
    connection_id: &str,
) {
    if let Some(subscribers) = topics.get_mut(topic) {
        subscribers.remove(connection_id);
        if subscribers.is_empty() {
            topics.remove(topic);
        }
    }
}

fn deliver(connection_id: &str, tx: &mpsc::Sender<Frame>, frame: &Frame) -> bool {
    match tx.try_send(frame.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(connection_id, "client queue full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{IndicatorKind, Progress, ScanPhase, Severity, ThreatIndicator, ThreatType};

    fn progress(scan_id: &str) -> ServerEvent {
        ServerEvent::ScanProgress {
            scan_id: scan_id.into(),
            phase: ScanPhase::PortScanComplete,
            target: Some("10.0.0.5".into()),
            progress: Progress::new(1),
            error: None,
        }
    }

    fn threat() -> ServerEvent {
        ServerEvent::NewThreat {
            scan_id: None,
            threat: Box::new(ThreatIndicator {
                indicator: "203.0.113.9".into(),
                kind: IndicatorKind::Ip,
                threat_type: ThreatType::Malware,
                severity: Severity::High,
                confidence: 90,
                source: "otx".into(),
                metadata: Default::default(),
                first_seen: 1,
                last_seen: 1,
            }),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[test]
    fn threats_subscriber_never_sees_scan_progress() {
        let hub = BroadcastHub::default();
        let (id, mut rx) = hub.connect(None);
        hub.subscribe(&id, Topic::Threats);

        assert_eq!(hub.broadcast(progress("s1")), 0);
        assert_eq!(hub.broadcast(threat()), 1);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "new-threat");
        assert!(frames[0]["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn unsubscribe_prunes_empty_topic() {
        let hub = BroadcastHub::default();
        let (id, _rx) = hub.connect(None);
        let topic = Topic::Scan("X".into());
        hub.subscribe(&id, topic.clone());
        assert_eq!(hub.subscriber_count(&topic), 1);
        assert!(hub.unsubscribe(&id, &topic));
        assert_eq!(hub.subscriber_count(&topic), 0);
        assert_eq!(hub.topic_count(), 0);
        assert!(!hub.unsubscribe(&id, &topic));
    }

    #[test]
    fn disconnect_removes_every_subscription() {
        let hub = BroadcastHub::default();
        let (a, _rx_a) = hub.connect(None);
        let (b, _rx_b) = hub.connect(None);
        for topic in [Topic::Dashboard, Topic::Threats, Topic::Scan("s1".into())] {
            hub.subscribe(&a, topic);
        }
        hub.subscribe(&b, Topic::Dashboard);

        hub.disconnect(&a);
        assert_eq!(hub.subscriber_count(&Topic::Dashboard), 1);
        assert_eq!(hub.subscriber_count(&Topic::Threats), 0);
        assert_eq!(hub.topic_count(), 1);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn overlapping_topics_deliver_once() {
        let hub = BroadcastHub::default();
        let (id, mut rx) = hub.connect(None);
        hub.subscribe(&id, Topic::Scan("s1".into()));
        hub.subscribe(&id, Topic::Dashboard);

        let delivered = hub.broadcast(ServerEvent::ScanCancelled {
            scan_id: "s1".into(),
            owner: None,
        });
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn scan_topics_are_isolated() {
        let hub = BroadcastHub::default();
        let (a, mut rx_a) = hub.connect(None);
        let (b, mut rx_b) = hub.connect(None);
        hub.subscribe(&a, Topic::Scan("s1".into()));
        hub.subscribe(&b, Topic::Scan("s2".into()));

        hub.broadcast(progress("s1"));
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn user_delivery_skips_anonymous_connections() {
        let hub = BroadcastHub::default();
        let (_anon, mut rx_anon) = hub.connect(None);
        let (_alice, mut rx_alice) = hub.connect(Some("alice".into()));
        let (_bob, mut rx_bob) = hub.connect(Some("bob".into()));

        let event = ServerEvent::Error {
            message: "quota exceeded".into(),
        };
        assert_eq!(hub.emit_to_user("alice", event.clone()), 1);
        assert_eq!(hub.broadcast_to_users(&["alice", "bob"], event), 2);

        assert!(drain(&mut rx_anon).is_empty());
        assert_eq!(drain(&mut rx_alice).len(), 2);
        assert_eq!(drain(&mut rx_bob).len(), 1);
    }

    #[test]
    fn incidents_reach_incident_and_dashboard_subscribers() {
        let hub = BroadcastHub::default();
        let (a, mut rx_a) = hub.connect(None);
        let (b, mut rx_b) = hub.connect(None);
        hub.subscribe(&a, Topic::Incidents);
        hub.subscribe(&b, Topic::Dashboard);

        let delivered = hub.publish_incident(
            IncidentKind::Alert,
            serde_json::json!({"id": "inc-1", "severity": "critical"}),
        );
        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut rx_a)[0]["type"], "incident-alert");
        assert_eq!(drain(&mut rx_b)[0]["incident"]["id"], "inc-1");
    }

    #[test]
    fn dashboard_hides_other_users_scans() {
        let hub = BroadcastHub::default();
        let (alice, mut rx_alice) = hub.connect(Some("alice".into()));
        let (bob, mut rx_bob) = hub.connect(Some("bob".into()));
        let (anon, mut rx_anon) = hub.connect(None);
        for id in [&alice, &bob, &anon] {
            hub.subscribe(id, Topic::Dashboard);
        }

        let owned = [
            ServerEvent::ScanStarted {
                scan_id: "s1".into(),
                targets: vec!["10.0.0.5".into()],
                owner: Some("alice".into()),
            },
            ServerEvent::ScanCompleted {
                scan_id: "s1".into(),
                results: Box::default(),
                owner: Some("alice".into()),
            },
        ];
        for event in owned {
            assert_eq!(hub.broadcast(event), 1);
        }
        let frames = drain(&mut rx_alice);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["targets"][0], "10.0.0.5");
        assert!(frames[0].get("owner").is_none());
        assert!(drain(&mut rx_bob).is_empty());
        assert!(drain(&mut rx_anon).is_empty());

        let unowned = ServerEvent::ScanFailed {
            scan_id: "s2".into(),
            error: "boom".into(),
            owner: None,
        };
        assert_eq!(hub.broadcast(unowned), 3);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let hub = BroadcastHub::new(1);
        let (id, mut rx) = hub.connect(None);
        hub.subscribe(&id, Topic::Threats);
        assert_eq!(hub.broadcast(threat()), 1);
        assert_eq!(hub.broadcast(threat()), 0);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn reset_clears_registry() {
        let hub = BroadcastHub::default();
        let (id, _rx) = hub.connect(Some("alice".into()));
        hub.subscribe(&id, Topic::Dashboard);
        assert_eq!(hub.user_of(&id).as_deref(), Some("alice"));
        hub.reset();
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.topic_count(), 0);
    }
}
