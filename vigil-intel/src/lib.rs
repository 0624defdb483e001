pub mod aggregator;
pub mod cache;
pub mod config;
mod error;
pub mod feed;
pub mod feeds;

pub use aggregator::{ThreatIntelAggregator, merge_verdicts, save_indicator};
pub use cache::{CacheKey, Clock, ManualClock, SystemClock, TtlCache};
pub use config::{FeedConfig, FeedsConfig, IntelConfig};
pub use error::IntelError;
pub use feed::ThreatFeed;
