/// Online serving - snapshots, response cache and the recommendation service
pub mod cache;
pub mod runtime;
pub mod service;
pub mod snapshot;

pub use cache::ResponseCache;
pub use runtime::ServingRuntime;
pub use service::{
    RecommendationService, STRATEGY_CACHED, STRATEGY_TRENDING, STRATEGY_TRENDING_FALLBACK,
};
pub use snapshot::{ModelSnapshot, SnapshotStore};
