/// Prometheus metrics for serving and side-channel delivery
use super::{EventRecord, LatencyRecord, MetricsSink, ServedRecord};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use std::sync::Arc;

static RECOMMENDATIONS_SERVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_requests_served_total",
        "Total number of recommendation responses served",
        &["strategy", "variant"]
    )
    .expect("Failed to register recommendations served metric")
});

static RECOMMENDED_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_items_served_total",
        "Total number of items returned in recommendation responses",
        &["strategy"]
    )
    .expect("Failed to register recommended items metric")
});

static SERVING_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "recommendation_serving_latency_seconds",
        "Recommendation serving latency",
        &["strategy"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.08, 0.1, 0.25, 0.5]
    )
    .expect("Failed to register serving latency metric")
});

static USER_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_user_events_total",
        "Total number of tracked user events",
        &["event_type"]
    )
    .expect("Failed to register user events metric")
});

static SIDE_CHANNEL_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_side_channel_dropped_total",
        "Records dropped before reaching the side channel worker",
        &["kind"]
    )
    .expect("Failed to register side channel dropped metric")
});

static SIDE_CHANNEL_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "recommendation_side_channel_failures_total",
        "Records the side channel worker failed to deliver",
        &["kind"]
    )
    .expect("Failed to register side channel failures metric")
});

/// Counters for the side channel itself
pub struct SideChannelMetrics;

impl SideChannelMetrics {
    pub fn record_dropped(kind: &str) {
        SIDE_CHANNEL_DROPPED.with_label_values(&[kind]).inc();
    }

    pub fn record_failure(kind: &str) {
        SIDE_CHANNEL_FAILURES.with_label_values(&[kind]).inc();
    }
}

/// Metrics sink backed by the process-wide Prometheus registry
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetricsSink;

impl PrometheusMetricsSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsSink for PrometheusMetricsSink {
    async fn record_served(&self, record: &ServedRecord) -> Result<()> {
        RECOMMENDATIONS_SERVED
            .with_label_values(&[record.strategy.as_str(), record.variant_id.as_str()])
            .inc();
        RECOMMENDED_ITEMS
            .with_label_values(&[record.strategy.as_str()])
            .inc_by(record.items.len() as u64);
        Ok(())
    }

    async fn record_latency(&self, record: &LatencyRecord) -> Result<()> {
        SERVING_LATENCY
            .with_label_values(&[record.strategy.as_str()])
            .observe(record.latency_ms / 1000.0);
        Ok(())
    }

    async fn record_event(&self, record: &EventRecord) -> Result<()> {
        USER_EVENTS
            .with_label_values(&[record.event_type.as_str()])
            .inc();
        Ok(())
    }
}

/// Forwards every record to each inner sink; failures are joined into one
/// error after all sinks have been tried.
#[derive(Clone, Default)]
pub struct FanoutMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutMetricsSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

fn combine_results(results: Vec<Result<()>>) -> Result<()> {
    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|r| r.err().map(|e| e.to_string()))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::MetricsDelivery(failures.join("; ")))
    }
}

#[async_trait]
impl MetricsSink for FanoutMetricsSink {
    async fn record_served(&self, record: &ServedRecord) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.record_served(record).await);
        }
        combine_results(results)
    }

    async fn record_latency(&self, record: &LatencyRecord) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.record_latency(record).await);
        }
        combine_results(results)
    }

    async fn record_event(&self, record: &EventRecord) -> Result<()> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.record_event(record).await);
        }
        combine_results(results)
    }
}
