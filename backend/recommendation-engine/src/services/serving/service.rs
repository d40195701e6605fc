// ============================================
// Recommendation Service (serving path)
// ============================================
//
// Request flow:
//   cache → variant assignment → recent history → trending (cold start)
//         → hybrid scoring (blocking worker, latency budget)
//         → trending_fallback when the budget is exhausted
//
// Served and latency records go through the side channel and are never
// awaited. Scoring reads one snapshot for the whole request.

use super::{ModelSnapshot, ResponseCache, SnapshotStore};
use crate::config::ServingConfig;
use crate::error::Result;
use crate::models::{
    EventType, RecommendationRequest, RecommendationResponse, ScoredItem, StrategyConfig,
};
use crate::ports::{
    EventRecord, InteractionHistory, LatencyRecord, ServedRecord, SideChannel, SideEffect,
};
use crate::services::experiments::VariantAssignor;
use crate::services::ranking::HybridScorer;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const STRATEGY_CACHED: &str = "cached";
pub const STRATEGY_TRENDING: &str = "trending";
pub const STRATEGY_TRENDING_FALLBACK: &str = "trending_fallback";

/// Blend used when the serving experiment is not registered
fn fallback_strategy() -> StrategyConfig {
    StrategyConfig::new("hybrid_collaborative", 0.6, 0.4)
}

pub struct RecommendationService {
    assignor: VariantAssignor,
    snapshots: Arc<SnapshotStore>,
    history: Arc<dyn InteractionHistory>,
    side_channel: SideChannel,
    cache: ResponseCache,
    config: ServingConfig,
}

impl RecommendationService {
    pub fn new(
        assignor: VariantAssignor,
        snapshots: Arc<SnapshotStore>,
        history: Arc<dyn InteractionHistory>,
        side_channel: SideChannel,
        config: ServingConfig,
    ) -> Self {
        info!(
            experiment = %config.experiment_name,
            latency_budget_ms = config.latency_budget.as_millis() as u64,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "Recommendation service initialized"
        );

        Self {
            assignor: assignor.with_side_channel(side_channel.clone()),
            snapshots,
            history,
            side_channel,
            cache: ResponseCache::new(config.cache_ttl, config.cache_capacity),
            config,
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Publish a new model snapshot and drop responses computed on the old one
    pub fn publish(&self, snapshot: ModelSnapshot) {
        self.snapshots.publish(snapshot);
        self.cache.clear();
    }

    pub async fn recommend(&self, request: &RecommendationRequest) -> Result<RecommendationResponse> {
        let start = Instant::now();
        let subject_id = request.subject_id.as_str();

        if request.count == 0 {
            let assignment = self
                .assignor
                .resolve(subject_id, &self.config.experiment_name);
            let strategy = assignment.strategy.unwrap_or_else(fallback_strategy);
            return Ok(RecommendationResponse {
                recommendations: Vec::new(),
                strategy: strategy.algorithm,
                variant_id: assignment.variant_id,
                model_version: self.snapshots.current().version().to_string(),
                latency_ms: elapsed_ms(start),
            });
        }

        let snapshot = self.snapshots.current();
        if let Some(mut cached) = self.cache.get(subject_id, request.count, snapshot.version()) {
            cached.strategy = STRATEGY_CACHED.to_string();
            cached.latency_ms = elapsed_ms(start);
            debug!(subject_id = subject_id, "Recommendation cache hit");
            self.emit_served(subject_id, &cached);
            return Ok(cached);
        }

        let assignment = self
            .assignor
            .resolve(subject_id, &self.config.experiment_name);
        let strategy = assignment.strategy.clone().unwrap_or_else(fallback_strategy);
        let history = self
            .recent_history(subject_id, self.remaining_budget(start))
            .await;

        let (recommendations, strategy_name, cacheable) =
            if history.is_empty() && !snapshot.has_user(subject_id) {
                debug!(subject_id = subject_id, "Cold start, serving trending items");
                (
                    snapshot.trending(request.count, &[]),
                    STRATEGY_TRENDING.to_string(),
                    true,
                )
            } else {
                let budget = self.remaining_budget(start);
                match self
                    .score_hybrid(
                        Arc::clone(&snapshot),
                        subject_id,
                        history.clone(),
                        strategy.clone(),
                        request.count,
                        budget,
                    )
                    .await?
                {
                    Some(ranked) => (ranked, strategy.algorithm.clone(), true),
                    None => {
                        warn!(
                            subject_id = subject_id,
                            budget_ms = budget.as_millis() as u64,
                            "Hybrid scoring exceeded latency budget, serving trending fallback"
                        );
                        (
                            snapshot.trending(request.count, &history),
                            STRATEGY_TRENDING_FALLBACK.to_string(),
                            false,
                        )
                    }
                }
            };

        let response = RecommendationResponse {
            recommendations,
            strategy: strategy_name,
            variant_id: assignment.variant_id,
            model_version: snapshot.version().to_string(),
            latency_ms: elapsed_ms(start),
        };

        // A publish during scoring makes this response stale
        if cacheable && self.snapshots.current().version() == response.model_version {
            self.cache.put(subject_id, response.clone());
        }
        self.emit_served(subject_id, &response);

        debug!(
            subject_id = subject_id,
            strategy = %response.strategy,
            variant = %response.variant_id,
            items = response.recommendations.len(),
            latency_ms = response.latency_ms,
            "Recommendations served"
        );

        Ok(response)
    }

    /// Record a user event and invalidate the subject's cached response.
    /// Returns false if the event record was dropped.
    pub fn track_event(
        &self,
        subject_id: &str,
        item_id: &str,
        event_type: EventType,
        duration_secs: Option<u32>,
    ) -> bool {
        self.cache.invalidate(subject_id);
        debug!(
            subject_id = subject_id,
            item_id = item_id,
            event_type = event_type.as_str(),
            "Tracked event"
        );
        self.side_channel.emit(SideEffect::Event(EventRecord {
            subject_id: subject_id.to_string(),
            item_id: item_id.to_string(),
            event_type,
            duration_secs,
            occurred_at: Utc::now(),
        }))
    }

    fn remaining_budget(&self, start: Instant) -> Duration {
        self.config.latency_budget.saturating_sub(start.elapsed())
    }

    /// Recent items within `budget`; failures degrade to no history
    async fn recent_history(&self, subject_id: &str, budget: Duration) -> Vec<String> {
        let lookup = self
            .history
            .recent_items(subject_id, self.config.history_limit);
        match timeout(budget, lookup).await {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                warn!(subject_id = subject_id, error = %e, "History lookup failed");
                Vec::new()
            }
            Err(_) => {
                warn!(subject_id = subject_id, "History lookup timed out");
                Vec::new()
            }
        }
    }

    /// Score on a blocking worker; `None` when the budget runs out first
    async fn score_hybrid(
        &self,
        snapshot: Arc<ModelSnapshot>,
        subject_id: &str,
        history: Vec<String>,
        strategy: StrategyConfig,
        count: usize,
        budget: Duration,
    ) -> Result<Option<Vec<ScoredItem>>> {
        if budget.is_zero() {
            return Ok(None);
        }

        let subject_id = subject_id.to_string();
        let task = tokio::task::spawn_blocking(move || {
            let seen: HashSet<&str> = history.iter().map(String::as_str).collect();
            let candidates: Vec<String> = snapshot
                .candidates()
                .iter()
                .filter(|id| !seen.contains(id.as_str()))
                .cloned()
                .collect();

            let scorer =
                HybridScorer::new(snapshot.factor_model(), snapshot.embedding_index());
            let mut ranked = scorer.score(&subject_id, &history, &candidates, &strategy);
            ranked.truncate(count);
            ranked
        });

        match timeout(budget, task).await {
            Ok(joined) => Ok(Some(joined?)),
            Err(_) => Ok(None),
        }
    }

    fn emit_served(&self, subject_id: &str, response: &RecommendationResponse) {
        let now = Utc::now();
        self.side_channel.emit(SideEffect::Served(ServedRecord {
            subject_id: subject_id.to_string(),
            experiment_name: self.config.experiment_name.clone(),
            variant_id: response.variant_id.clone(),
            strategy: response.strategy.clone(),
            items: response
                .recommendations
                .iter()
                .map(|item| item.item_id.clone())
                .collect(),
            served_at: now,
        }));
        self.side_channel.emit(SideEffect::Latency(LatencyRecord {
            subject_id: subject_id.to_string(),
            strategy: response.strategy.clone(),
            latency_ms: response.latency_ms,
            recorded_at: now,
        }));
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
