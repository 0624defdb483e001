// ---------------------------------------------------------------------------
// Periodic dashboard metrics
// ---------------------------------------------------------------------------

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use vigil_types::ServerEvent;

use crate::state::AppState;

pub(crate) fn snapshot(state: &AppState) -> ServerEvent {
    ServerEvent::MetricsUpdate {
        active_scans: state.supervisor.active_count(),
        connections: state.hub.connection_count(),
        topics: state.hub.topic_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }
}

/// Housekeeping run on every metrics tick: expired threat-intel entries are
/// dropped, then the snapshot goes out.
pub(crate) fn tick(state: &AppState) -> usize {
    let purged = state.intel().cache().purge_expired();
    if purged > 0 {
        debug!(purged, "expired threat intel cache entries");
    }
    state.hub.broadcast(snapshot(state))
}

/// Publish a metrics snapshot to `dashboard` on every tick until the task
/// is aborted.
pub(crate) fn spawn_metrics_task(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.server.metrics_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tick(&state);
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vigil_db::ScanStore;
    use vigil_intel::{CacheKey, ManualClock, ThreatIntelAggregator};
    use vigil_types::{IndicatorKind, Topic};

    use super::*;
    use crate::config::{AuthConfig, ServerConfig};
    use crate::state::Services;

    #[test]
    fn tick_evicts_expired_intel_and_publishes() {
        let clock = Arc::new(ManualClock::new(0));
        let intel = Arc::new(ThreatIntelAggregator::with_clock(
            Vec::new(),
            Duration::from_secs(300),
            clock.clone(),
        ));
        let services = Services {
            intel: intel.clone(),
            ..Services::default()
        };
        let state = AppState::new(
            ScanStore::open_in_memory().unwrap(),
            services,
            None,
            &AuthConfig::default(),
            ServerConfig::default(),
        );
        let (id, mut rx) = state.hub.connect(None);
        state.hub.subscribe(&id, Topic::Dashboard);

        intel
            .cache()
            .insert(CacheKey::new("198.51.100.7", IndicatorKind::Ip, "otx"), None);
        clock.advance(Duration::from_secs(120));
        intel
            .cache()
            .insert(CacheKey::new("198.51.100.8", IndicatorKind::Ip, "otx"), None);

        assert_eq!(tick(&state), 1);
        assert_eq!(intel.cache().len(), 2);

        clock.advance(Duration::from_secs(200));
        tick(&state);
        assert_eq!(intel.cache().len(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn snapshot_reports_hub_counts() {
        let state = AppState::new_in_memory(None).unwrap();
        let (id, _rx) = state.hub.connect(None);
        state.hub.subscribe(&id, vigil_types::Topic::Dashboard);

        match snapshot(&state) {
            ServerEvent::MetricsUpdate {
                active_scans,
                connections,
                topics,
                ..
            } => {
                assert_eq!(active_scans, 0);
                assert_eq!(connections, 1);
                assert_eq!(topics, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
