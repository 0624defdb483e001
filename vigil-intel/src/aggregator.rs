// ---------------------------------------------------------------------------
// Feed fan-out and verdict merge
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_db::{ScanStore, UpsertOutcome};
use vigil_types::{IndicatorKind, SourceVerdict, ThreatIndicator};

use crate::cache::{CacheKey, Clock, SystemClock, TtlCache};
use crate::error::IntelError;
use crate::feed::ThreatFeed;

/// Queries every enabled feed in parallel and merges what comes back.
pub struct ThreatIntelAggregator {
    feeds: Vec<Arc<dyn ThreatFeed>>,
    /// `None` caches "the feed had no record" so it is not asked again.
    cache: TtlCache<CacheKey, Option<ThreatIndicator>>,
    clock: Arc<dyn Clock>,
}

impl ThreatIntelAggregator {
    pub fn new(feeds: Vec<Arc<dyn ThreatFeed>>, ttl: Duration) -> Self {
        Self::with_clock(feeds, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(feeds: Vec<Arc<dyn ThreatFeed>>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            feeds,
            cache: TtlCache::new(ttl, clock.clone()),
            clock,
        }
    }

    /// An aggregator with no feeds; every lookup is clean.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Duration::from_secs(300))
    }

    pub fn feed_names(&self) -> Vec<&'static str> {
        self.feeds.iter().map(|f| f.name()).collect()
    }

    pub fn cache(&self) -> &TtlCache<CacheKey, Option<ThreatIndicator>> {
        &self.cache
    }

    /// Look `indicator` up in every feed that supports `kind`.
    ///
    /// A failing feed contributes nothing; the others still count. The only
    /// error is cancellation.
    pub async fn lookup(
        &self,
        indicator: &str,
        kind: IndicatorKind,
        cancel: &CancellationToken,
    ) -> Result<ThreatIndicator, IntelError> {
        let calls = self
            .feeds
            .iter()
            .filter(|feed| feed.supports(kind))
            .map(|feed| self.lookup_one(feed.as_ref(), indicator, kind));

        let verdicts = tokio::select! {
            results = join_all(calls) => results,
            _ = cancel.cancelled() => return Err(IntelError::Cancelled),
        };

        let now = self.clock.now_ms();
        Ok(merge_verdicts(
            indicator,
            kind,
            verdicts.into_iter().flatten().collect(),
            now,
        ))
    }

    async fn lookup_one(
        &self,
        feed: &dyn ThreatFeed,
        indicator: &str,
        kind: IndicatorKind,
    ) -> Option<ThreatIndicator> {
        let key = CacheKey::new(indicator, kind, feed.name());
        if let Some(cached) = self.cache.get(&key) {
            debug!(indicator, feed = feed.name(), "threat intel cache hit");
            return cached;
        }
        match feed.lookup(indicator, kind).await {
            Ok(verdict) => {
                self.cache.insert(key, verdict.clone());
                verdict
            }
            Err(e) => {
                warn!(indicator, feed = feed.name(), error = %e, "threat feed lookup failed");
                None
            }
        }
    }
}

/// Merge per-feed verdicts into one.
///
/// The non-clean verdict with the highest severity wins (first feed on a
/// tie) and its metadata gains `all_sources`, one entry per non-clean
/// verdict. With no non-clean verdict the result is clean with confidence 0.
pub fn merge_verdicts(
    indicator: &str,
    kind: IndicatorKind,
    verdicts: Vec<ThreatIndicator>,
    now: u64,
) -> ThreatIndicator {
    let threats: Vec<ThreatIndicator> = verdicts.into_iter().filter(|v| v.is_threat()).collect();

    let mut best: Option<&ThreatIndicator> = None;
    for verdict in &threats {
        if best.is_none_or(|b| verdict.severity.rank() > b.severity.rank()) {
            best = Some(verdict);
        }
    }
    let Some(best) = best else {
        return ThreatIndicator::clean(indicator, kind, now);
    };

    let sources: Vec<SourceVerdict> = threats
        .iter()
        .map(|v| SourceVerdict {
            source: v.source.clone(),
            threat_type: v.threat_type,
            severity: v.severity,
            confidence: v.confidence,
        })
        .collect();

    let mut merged = best.clone();
    match serde_json::to_value(&sources) {
        Ok(value) => {
            merged.metadata.insert("all_sources".into(), value);
        }
        Err(e) => warn!(error = %e, "failed to encode contributing sources"),
    }
    merged.first_seen = now;
    merged.last_seen = now;
    merged
}

/// Persist a merged verdict, deduplicated on `(indicator, source)`.
pub fn save_indicator(
    store: &ScanStore,
    indicator: &ThreatIndicator,
    owner: Option<&str>,
    now: u64,
) -> Result<UpsertOutcome, IntelError> {
    Ok(store.upsert_indicator(indicator, owner, now)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_types::{Severity, ThreatType};

    enum Reply {
        Verdict(ThreatType, Severity),
        Nothing,
        Fail,
        Hang,
    }

    struct FakeFeed {
        name: &'static str,
        reply: Reply,
        calls: AtomicUsize,
        kinds: Vec<IndicatorKind>,
    }

    impl FakeFeed {
        fn new(name: &'static str, reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply,
                calls: AtomicUsize::new(0),
                kinds: vec![IndicatorKind::Ip, IndicatorKind::Domain],
            })
        }
    }

    #[async_trait]
    impl ThreatFeed for FakeFeed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, kind: IndicatorKind) -> bool {
            self.kinds.contains(&kind)
        }

        async fn lookup(
            &self,
            indicator: &str,
            kind: IndicatorKind,
        ) -> Result<Option<ThreatIndicator>, IntelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Reply::Verdict(threat_type, severity) => Ok(Some(ThreatIndicator {
                    indicator: indicator.to_string(),
                    kind,
                    threat_type,
                    severity,
                    confidence: 60,
                    source: self.name.to_string(),
                    metadata: Default::default(),
                    first_seen: 0,
                    last_seen: 0,
                })),
                Reply::Nothing => Ok(None),
                Reply::Fail => Err(IntelError::Status {
                    feed: "fake",
                    status: 503,
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                }
            }
        }
    }

    fn aggregator(feeds: Vec<Arc<dyn ThreatFeed>>, clock: Arc<ManualClock>) -> ThreatIntelAggregator {
        ThreatIntelAggregator::with_clock(feeds, Duration::from_secs(300), clock)
    }

    #[tokio::test]
    async fn highest_severity_wins_and_lists_all_sources() {
        let a = FakeFeed::new("a", Reply::Verdict(ThreatType::Suspicious, Severity::Medium));
        let b = FakeFeed::new("b", Reply::Verdict(ThreatType::C2Server, Severity::Critical));
        let agg = aggregator(vec![a, b], Arc::new(ManualClock::new(10)));

        let merged = agg
            .lookup("203.0.113.9", IndicatorKind::Ip, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(merged.severity, Severity::Critical);
        assert_eq!(merged.threat_type, ThreatType::C2Server);
        assert_eq!(merged.source, "b");
        let sources: Vec<String> = merged.all_sources().into_iter().map(|s| s.source).collect();
        assert_eq!(sources, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn failing_feed_does_not_abort_others() {
        let broken = FakeFeed::new("broken", Reply::Fail);
        let good = FakeFeed::new("good", Reply::Verdict(ThreatType::Malware, Severity::High));
        let agg = aggregator(vec![broken, good], Arc::new(ManualClock::new(0)));

        let merged = agg
            .lookup("203.0.113.9", IndicatorKind::Ip, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(merged.source, "good");
        assert_eq!(merged.all_sources().len(), 1);
    }

    #[tokio::test]
    async fn nothing_reported_is_clean() {
        let clean = FakeFeed::new("clean", Reply::Verdict(ThreatType::Clean, Severity::Info));
        let silent = FakeFeed::new("silent", Reply::Nothing);
        let agg = aggregator(vec![clean, silent], Arc::new(ManualClock::new(5)));

        let merged = agg
            .lookup("example.com", IndicatorKind::Domain, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(merged.threat_type, ThreatType::Clean);
        assert_eq!(merged.confidence, 0);
        assert_eq!(merged.last_seen, 5);
    }

    #[tokio::test]
    async fn results_cached_for_ttl() {
        let feed = FakeFeed::new("a", Reply::Verdict(ThreatType::Malware, Severity::High));
        let clock = Arc::new(ManualClock::new(0));
        let agg = aggregator(vec![feed.clone()], clock.clone());
        let cancel = CancellationToken::new();

        agg.lookup("10.0.0.5", IndicatorKind::Ip, &cancel).await.unwrap();
        agg.lookup("10.0.0.5", IndicatorKind::Ip, &cancel).await.unwrap();
        assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(301));
        agg.lookup("10.0.0.5", IndicatorKind::Ip, &cancel).await.unwrap();
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let feed = FakeFeed::new("broken", Reply::Fail);
        let agg = aggregator(vec![feed.clone()], Arc::new(ManualClock::new(0)));
        let cancel = CancellationToken::new();
        agg.lookup("10.0.0.5", IndicatorKind::Ip, &cancel).await.unwrap();
        agg.lookup("10.0.0.5", IndicatorKind::Ip, &cancel).await.unwrap();
        assert_eq!(feed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsupported_kinds_are_skipped() {
        let feed = FakeFeed::new("a", Reply::Verdict(ThreatType::Malware, Severity::High));
        let agg = aggregator(vec![feed.clone()], Arc::new(ManualClock::new(0)));
        let merged = agg
            .lookup("d41d8cd98f00b204e9800998ecf8427e", IndicatorKind::Hash, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!merged.is_threat());
        assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_lookups() {
        let feed = FakeFeed::new("slow", Reply::Hang);
        let agg = aggregator(vec![feed], Arc::new(ManualClock::new(0)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = agg.lookup("10.0.0.5", IndicatorKind::Ip, &cancel).await;
        assert!(matches!(result, Err(IntelError::Cancelled)));
    }

    #[test]
    fn tie_keeps_first_feed() {
        let mk = |source: &str| ThreatIndicator {
            indicator: "x".into(),
            kind: IndicatorKind::Domain,
            threat_type: ThreatType::Phishing,
            severity: Severity::High,
            confidence: 40,
            source: source.into(),
            metadata: Default::default(),
            first_seen: 0,
            last_seen: 0,
        };
        let merged = merge_verdicts("x", IndicatorKind::Domain, vec![mk("first"), mk("second")], 1);
        assert_eq!(merged.source, "first");
    }

    #[test]
    fn save_deduplicates() {
        let store = ScanStore::open_in_memory().unwrap();
        let merged = merge_verdicts(
            "203.0.113.9",
            IndicatorKind::Ip,
            vec![ThreatIndicator {
                indicator: "203.0.113.9".into(),
                kind: IndicatorKind::Ip,
                threat_type: ThreatType::Malware,
                severity: Severity::High,
                confidence: 90,
                source: "otx".into(),
                metadata: Default::default(),
                first_seen: 0,
                last_seen: 0,
            }],
            1,
        );
        assert_eq!(
            save_indicator(&store, &merged, None, 1).unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            save_indicator(&store, &merged, None, 2).unwrap(),
            UpsertOutcome::Updated
        );
        assert_eq!(store.count_indicators().unwrap(), 1);
    }
}
