// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use vigil_core::{Analyzer, Orchestrator, ScanSupervisor, SharedStore};
use vigil_db::ScanStore;
use vigil_intel::ThreatIntelAggregator;
use vigil_probe::{NmapScanner, ServiceScanner};

use crate::auth::hash_token;
use crate::config::{AuthConfig, ServerConfig};
use crate::hub::BroadcastHub;

/// The pluggable collaborators behind the orchestrator.
pub struct Services {
    pub scanner: Arc<dyn ServiceScanner>,
    pub intel: Arc<ThreatIntelAggregator>,
    pub analyzer: Arc<Analyzer>,
}

impl Default for Services {
    /// `nmap` from `PATH`, no threat feeds, placeholder analysis.
    fn default() -> Self {
        Self {
            scanner: Arc::new(NmapScanner::default()),
            intel: Arc::new(ThreatIntelAggregator::disabled()),
            analyzer: Arc::new(Analyzer::placeholder()),
        }
    }
}

/// Global application state for the API server.
pub struct AppState {
    /// Persistent scan and indicator database, shared with the orchestrator.
    pub store: SharedStore,
    pub supervisor: ScanSupervisor,
    /// Connection registry and topic fan-out for real-time clients.
    pub hub: Arc<BroadcastHub>,
    /// Server start time for uptime reporting.
    pub started_at: Instant,
    /// SHA-256 hash of the API key (if configured). The plaintext key is never
    /// stored.
    pub api_key_hash: Option<[u8; 32]>,
    /// SHA-256 hashes of user tokens and the identity each maps to.
    pub user_tokens: Vec<([u8; 32], String)>,
    pub server: ServerConfig,
}

impl AppState {
    pub fn new(
        store: ScanStore,
        services: Services,
        api_key: Option<String>,
        auth: &AuthConfig,
        server: ServerConfig,
    ) -> Self {
        let store: SharedStore = Arc::new(Mutex::new(store));
        let hub = Arc::new(BroadcastHub::default());
        let orchestrator = Orchestrator::new(
            store.clone(),
            services.scanner,
            services.intel,
            services.analyzer,
            hub.clone(),
        );
        Self {
            store,
            supervisor: ScanSupervisor::new(Arc::new(orchestrator)),
            hub,
            started_at: Instant::now(),
            api_key_hash: api_key.as_deref().map(hash_token),
            user_tokens: auth
                .users
                .iter()
                .map(|u| (hash_token(&u.token), u.user_id.clone()))
                .collect(),
            server,
        }
    }

    /// In-memory database and default services (for testing).
    pub fn new_in_memory(api_key: Option<String>) -> Result<Self, vigil_db::DbError> {
        Ok(Self::new(
            ScanStore::open_in_memory()?,
            Services::default(),
            api_key,
            &AuthConfig::default(),
            ServerConfig::default(),
        ))
    }

    pub fn intel(&self) -> &Arc<ThreatIntelAggregator> {
        self.supervisor.orchestrator().intel()
    }
}
