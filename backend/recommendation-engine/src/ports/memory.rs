/// In-process adapters for the ports
///
/// Used by the offline jobs, local runs and tests. Database-backed adapters
/// live with the storage owners and implement the same traits.
use super::{
    AssignmentRecord, AssignmentStore, EventRecord, InteractionHistory, LatencyRecord,
    MetricsSink, MetricsSnapshotSource, ServedRecord,
};
use crate::error::Result;
use crate::models::{EventType, ExperimentMetricSnapshot, VariantCounts};
use crate::services::experiments::AssignmentKeying;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// Assignment rows keyed per the configured keying policy
#[derive(Debug, Default)]
pub struct InMemoryAssignmentStore {
    keying: AssignmentKeying,
    rows: DashMap<(String, String), AssignmentRecord>,
}

impl InMemoryAssignmentStore {
    pub fn new(keying: AssignmentKeying) -> Self {
        Self {
            keying,
            rows: DashMap::new(),
        }
    }

    fn key(&self, subject_id: &str, experiment_name: &str) -> (String, String) {
        match self.keying {
            AssignmentKeying::PerExperiment => {
                (subject_id.to_string(), experiment_name.to_string())
            }
            AssignmentKeying::PerSubject => (subject_id.to_string(), String::new()),
        }
    }

    /// Stored variant for the pair, if the retained row belongs to that experiment
    pub fn get(&self, subject_id: &str, experiment_name: &str) -> Option<AssignmentRecord> {
        self.rows
            .get(&self.key(subject_id, experiment_name))
            .map(|row| row.value().clone())
            .filter(|row| row.experiment_name == experiment_name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn upsert(&self, record: &AssignmentRecord) -> Result<()> {
        let key = self.key(&record.subject_id, &record.experiment_name);
        self.rows.insert(key, record.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MetricsLog {
    served: Vec<ServedRecord>,
    latencies: Vec<LatencyRecord>,
    events: Vec<EventRecord>,
}

/// Served/latency/event log that also answers snapshot and history queries
#[derive(Debug, Default)]
pub struct InMemoryMetricsStore {
    log: RwLock<MetricsLog>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn served_count(&self) -> usize {
        self.log.read().await.served.len()
    }

    pub async fn latency_count(&self) -> usize {
        self.log.read().await.latencies.len()
    }

    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsStore {
    async fn record_served(&self, record: &ServedRecord) -> Result<()> {
        self.log.write().await.served.push(record.clone());
        Ok(())
    }

    async fn record_latency(&self, record: &LatencyRecord) -> Result<()> {
        self.log.write().await.latencies.push(record.clone());
        Ok(())
    }

    async fn record_event(&self, record: &EventRecord) -> Result<()> {
        self.log.write().await.events.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl MetricsSnapshotSource for InMemoryMetricsStore {
    /// Impressions are served responses in the window; clicks are click
    /// events in the window attributed to the subject's most recently served
    /// variant of this experiment.
    async fn snapshot(
        &self,
        experiment_name: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<ExperimentMetricSnapshot> {
        let log = self.log.read().await;
        let in_window = |ts: &DateTime<Utc>| *ts >= since && *ts < until;

        let mut variants: BTreeMap<String, VariantCounts> = BTreeMap::new();
        let mut subject_variant: HashMap<&str, (&DateTime<Utc>, &str)> = HashMap::new();

        for served in log
            .served
            .iter()
            .filter(|s| s.experiment_name == experiment_name && in_window(&s.served_at))
        {
            variants
                .entry(served.variant_id.clone())
                .or_default()
                .impressions += 1;

            let entry = subject_variant
                .entry(served.subject_id.as_str())
                .or_insert((&served.served_at, served.variant_id.as_str()));
            if served.served_at >= *entry.0 {
                *entry = (&served.served_at, served.variant_id.as_str());
            }
        }

        for event in log
            .events
            .iter()
            .filter(|e| e.event_type == EventType::Click && in_window(&e.occurred_at))
        {
            if let Some((_, variant)) = subject_variant.get(event.subject_id.as_str()) {
                variants.entry(variant.to_string()).or_default().clicks += 1;
            }
        }

        Ok(ExperimentMetricSnapshot {
            experiment_name: experiment_name.to_string(),
            control_variant: "control".to_string(),
            treatment_variant: "treatment".to_string(),
            window_start: since,
            window_end: until,
            variants,
        })
    }
}

#[async_trait]
impl InteractionHistory for InMemoryMetricsStore {
    async fn recent_items(&self, subject_id: &str, limit: usize) -> Result<Vec<String>> {
        let log = self.log.read().await;
        let mut events: Vec<&EventRecord> = log
            .events
            .iter()
            .filter(|e| e.subject_id == subject_id)
            .collect();
        // Newest first
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for event in events {
            if items.len() >= limit {
                break;
            }
            if seen.insert(event.item_id.as_str()) {
                items.push(event.item_id.clone());
            }
        }
        Ok(items)
    }
}
