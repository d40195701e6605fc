// ============================================
// Evaluation Job
// ============================================
//
// Pulls per-variant impressions/clicks for the last `window_days` from a
// MetricsSnapshotSource and runs the significance analysis:
// - primary: the snapshot's control vs treatment
// - comparisons: control vs every other variant present

use crate::config::AnalysisConfig;
use crate::error::{EngineError, Result};
use crate::models::ExperimentMetricSnapshot;
use crate::ports::MetricsSnapshotSource;
use crate::services::experiments::{AnalysisOutcome, SignificanceAnalyzer};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentEvaluation {
    pub experiment_name: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub primary: AnalysisOutcome,
    pub comparisons: Vec<(String, AnalysisOutcome)>,
}

impl ExperimentEvaluation {
    fn from_snapshot(analyzer: &SignificanceAnalyzer, snapshot: &ExperimentMetricSnapshot) -> Self {
        let primary = analyzer.evaluate(snapshot);
        let comparisons = analyzer.evaluate_all(snapshot);

        info!(
            experiment = %snapshot.experiment_name,
            variants = snapshot.variants.len(),
            significant = primary.is_significant(),
            comparisons = comparisons.len(),
            "Evaluation completed"
        );

        Self {
            experiment_name: snapshot.experiment_name.clone(),
            window_start: snapshot.window_start,
            window_end: snapshot.window_end,
            primary,
            comparisons,
        }
    }
}

pub struct EvaluationJob {
    analyzer: SignificanceAnalyzer,
    window: Duration,
}

impl EvaluationJob {
    /// `window_days` must be at least 1 and representable as a duration
    pub fn new(analyzer: SignificanceAnalyzer, window_days: i64) -> Result<Self> {
        let window = Duration::try_days(window_days)
            .filter(|window| *window > Duration::zero())
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "analysis window must be a positive number of days (got {})",
                    window_days
                ))
            })?;
        Ok(Self { analyzer, window })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Self::new(
            SignificanceAnalyzer::new(config.alpha)?,
            config.window_days,
        )
    }

    /// Evaluate `experiment_name` over `[now - window, now)`
    pub async fn run(
        &self,
        source: &dyn MetricsSnapshotSource,
        experiment_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ExperimentEvaluation> {
        let since = now.checked_sub_signed(self.window).ok_or_else(|| {
            EngineError::Configuration(format!(
                "analysis window of {} days reaches before the supported date range",
                self.window.num_days()
            ))
        })?;
        let snapshot = source.snapshot(experiment_name, since, now).await?;
        Ok(ExperimentEvaluation::from_snapshot(&self.analyzer, &snapshot))
    }
}

/// Evaluate a metrics snapshot exported as JSON
pub fn evaluate_snapshot_file(
    path: &Path,
    analyzer: &SignificanceAnalyzer,
) -> Result<ExperimentEvaluation> {
    let raw = std::fs::read_to_string(path)?;
    let snapshot: ExperimentMetricSnapshot = serde_json::from_str(&raw)?;
    Ok(ExperimentEvaluation::from_snapshot(analyzer, &snapshot))
}
