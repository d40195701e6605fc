/// Fire-and-forget delivery of assignment and metrics records
///
/// Records are submitted with `try_send`, so a full queue drops the record
/// (counted and logged) instead of delaying the caller. A single worker task
/// drains the queue and forwards each record to its port. Port failures are
/// logged and counted, never returned to the serving path.
use super::prometheus_sink::SideChannelMetrics;
use super::{
    AssignmentRecord, AssignmentStore, EventRecord, LatencyRecord, MetricsSink, ServedRecord,
};
use crate::error::{EngineError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    Assignment(AssignmentRecord),
    Served(ServedRecord),
    Latency(LatencyRecord),
    Event(EventRecord),
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::Assignment(_) => "assignment",
            SideEffect::Served(_) => "served",
            SideEffect::Latency(_) => "latency",
            SideEffect::Event(_) => "event",
        }
    }
}

/// Sending half of the side channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SideChannel {
    sender: mpsc::Sender<SideEffect>,
}

/// Create a bounded side channel with the given capacity
pub fn side_channel(capacity: usize) -> (SideChannel, mpsc::Receiver<SideEffect>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (SideChannel { sender }, receiver)
}

impl SideChannel {
    /// Submit a record without waiting. Returns false if it was dropped.
    pub fn emit(&self, effect: SideEffect) -> bool {
        let kind = effect.kind();
        match self.sender.try_send(effect) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                SideChannelMetrics::record_dropped(kind);
                warn!(kind = kind, "Side channel full, dropping record");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                SideChannelMetrics::record_dropped(kind);
                debug!(kind = kind, "Side channel closed, dropping record");
                false
            }
        }
    }
}

/// Spawn the worker that drains the side channel into the ports
///
/// The worker stops once every `SideChannel` clone has been dropped and the
/// queue is empty.
pub fn spawn_side_channel_worker(
    mut receiver: mpsc::Receiver<SideEffect>,
    assignments: Arc<dyn AssignmentStore>,
    metrics: Arc<dyn MetricsSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("Side channel worker started");

        while let Some(effect) = receiver.recv().await {
            let kind = effect.kind();
            if let Err(e) = deliver(&effect, assignments.as_ref(), metrics.as_ref()).await {
                SideChannelMetrics::record_failure(kind);
                warn!(kind = kind, error = %e, "Side channel delivery failed");
            }
        }

        info!("Side channel worker stopped (channel closed)");
    })
}

async fn deliver(
    effect: &SideEffect,
    assignments: &dyn AssignmentStore,
    metrics: &dyn MetricsSink,
) -> Result<()> {
    match effect {
        SideEffect::Assignment(record) => assignments
            .upsert(record)
            .await
            .map_err(into_persistence),
        SideEffect::Served(record) => metrics
            .record_served(record)
            .await
            .map_err(into_metrics_delivery),
        SideEffect::Latency(record) => metrics
            .record_latency(record)
            .await
            .map_err(into_metrics_delivery),
        SideEffect::Event(record) => metrics
            .record_event(record)
            .await
            .map_err(into_metrics_delivery),
    }
}

fn into_persistence(err: EngineError) -> EngineError {
    match err {
        EngineError::Persistence(_) => err,
        other => EngineError::Persistence(other.to_string()),
    }
}

fn into_metrics_delivery(err: EngineError) -> EngineError {
    match err {
        EngineError::MetricsDelivery(_) => err,
        other => EngineError::MetricsDelivery(other.to_string()),
    }
}
