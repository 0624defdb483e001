pub mod analysis;
mod error;
pub mod orchestrator;
pub mod sink;
pub mod supervisor;

pub use analysis::{AnalysisConfig, Analyzer, placeholder_summary};
pub use error::EngineError;
pub use orchestrator::{
    Orchestrator, ScanOutcome, SharedStore, intel_indicators, merge_services, target_progress,
};
pub use sink::{EventSink, NullSink, TracingSink};
pub use supervisor::{CANCELLED_BY_USER, ScanSupervisor};
pub use tokio_util::sync::CancellationToken;
