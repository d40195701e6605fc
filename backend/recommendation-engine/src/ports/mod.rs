// ============================================
// Ports (外部協作者介面)
// ============================================
//
// Boundaries between the algorithmic core and its external collaborators:
// - AssignmentStore: persists variant assignments (upsert, idempotent)
// - MetricsSink: receives served/latency/event records
// - MetricsSnapshotSource: aggregates impressions/clicks per variant
// - InteractionHistory: recent items a subject interacted with
//
// Assignment persistence and metrics emission never sit on the request's
// critical path: callers push records onto a SideChannel and a background
// worker delivers them, logging failures instead of propagating them.

pub mod memory;
pub mod prometheus_sink;
pub mod side_channel;

pub use memory::{InMemoryAssignmentStore, InMemoryMetricsStore};
pub use prometheus_sink::{FanoutMetricsSink, PrometheusMetricsSink};
pub use side_channel::{side_channel, spawn_side_channel_worker, SideChannel, SideEffect};

use crate::error::Result;
use crate::models::{EventType, ExperimentMetricSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentRecord {
    pub subject_id: String,
    pub experiment_name: String,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServedRecord {
    pub subject_id: String,
    pub experiment_name: String,
    pub variant_id: String,
    pub strategy: String,
    pub items: Vec<String>,
    pub served_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatencyRecord {
    pub subject_id: String,
    pub strategy: String,
    pub latency_ms: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub subject_id: String,
    pub item_id: String,
    pub event_type: EventType,
    pub duration_secs: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn upsert(&self, record: &AssignmentRecord) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_served(&self, record: &ServedRecord) -> Result<()>;

    async fn record_latency(&self, record: &LatencyRecord) -> Result<()>;

    async fn record_event(&self, record: &EventRecord) -> Result<()>;
}

#[async_trait]
pub trait MetricsSnapshotSource: Send + Sync {
    /// Aggregate impressions and clicks per variant over `[since, until)`.
    async fn snapshot(
        &self,
        experiment_name: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ExperimentMetricSnapshot>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InteractionHistory: Send + Sync {
    /// Most recent distinct items, newest first.
    async fn recent_items(&self, subject_id: &str, limit: usize) -> Result<Vec<String>>;
}
