// ============================================
// Serving Runtime
// ============================================
//
// Wires the serving path from configuration:
//   experiments config → registry (file or built-in) → assignor (default variant)
//   serving config     → side channel (capacity) → worker → in-memory stores
//                      → RecommendationService
//
// Metrics go to the in-memory store and the Prometheus registry.

use super::{ModelSnapshot, RecommendationService, SnapshotStore};
use crate::config::{ExperimentsConfig, ServingConfig};
use crate::error::Result;
use crate::ports::{
    side_channel, spawn_side_channel_worker, FanoutMetricsSink, InMemoryAssignmentStore,
    InMemoryMetricsStore, MetricsSink, PrometheusMetricsSink,
};
use crate::services::experiments::VariantAssignor;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct ServingRuntime {
    pub service: RecommendationService,
    pub assignments: Arc<InMemoryAssignmentStore>,
    pub metrics: Arc<InMemoryMetricsStore>,
    worker: JoinHandle<()>,
}

impl ServingRuntime {
    /// Build the serving stack around `snapshot`. Spawns the side channel
    /// worker, so it must run inside a tokio runtime.
    pub fn from_config(
        experiments: &ExperimentsConfig,
        serving: &ServingConfig,
        snapshot: ModelSnapshot,
    ) -> Result<Self> {
        let registry = Arc::new(experiments.load_registry()?);
        info!(
            experiments = registry.len(),
            serving_experiment = %serving.experiment_name,
            keying = ?experiments.keying,
            "Experiment registry loaded"
        );

        let assignments = Arc::new(InMemoryAssignmentStore::new(experiments.keying));
        let metrics = Arc::new(InMemoryMetricsStore::new());
        let sinks: Vec<Arc<dyn MetricsSink>> = vec![
            metrics.clone() as Arc<dyn MetricsSink>,
            Arc::new(PrometheusMetricsSink::new()),
        ];

        let (channel, receiver) = side_channel(serving.side_channel_capacity);
        let worker = spawn_side_channel_worker(
            receiver,
            assignments.clone(),
            Arc::new(FanoutMetricsSink::new(sinks)),
        );

        let service = RecommendationService::new(
            VariantAssignor::new(registry, experiments.default_variant.clone()),
            Arc::new(SnapshotStore::new(snapshot)),
            metrics.clone(),
            channel,
            serving.clone(),
        );

        Ok(Self {
            service,
            assignments,
            metrics,
            worker,
        })
    }

    /// Stop serving and wait until every queued record has been delivered
    pub async fn shutdown(
        self,
    ) -> Result<(Arc<InMemoryAssignmentStore>, Arc<InMemoryMetricsStore>)> {
        let Self {
            service,
            assignments,
            metrics,
            worker,
        } = self;
        drop(service);
        worker.await?;
        Ok((assignments, metrics))
    }
}
