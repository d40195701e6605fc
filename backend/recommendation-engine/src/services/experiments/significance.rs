/// Significance Analyzer - two-proportion z-test over click-through rates
///
/// For control (c) and treatment (t):
/// - ctr = clicks / impressions
/// - pooled p = (clicks_c + clicks_t) / (n_c + n_t)
/// - z = (ctr_t - ctr_c) / sqrt(p (1 - p) (1/n_c + 1/n_t))
/// - two-sided p-value = 2 (1 - Φ(|z|))
/// - CI for the absolute difference uses the unpooled standard error
use crate::error::{EngineError, Result};
use crate::models::{ExperimentMetricSnapshot, VariantCounts};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info};

pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceReport {
    pub control_variant: String,
    pub treatment_variant: String,
    pub control_ctr: f64,
    pub treatment_ctr: f64,
    /// Relative lift; `None` when the control CTR is zero
    pub lift: Option<f64>,
    pub absolute_difference: f64,
    pub z_score: f64,
    pub p_value: f64,
    pub significant: bool,
    /// Bounds on `treatment_ctr - control_ctr` at `1 - alpha` confidence
    pub confidence_interval: (f64, f64),
    pub alpha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Verdict(SignificanceReport),
    InsufficientData { reason: String },
}

impl AnalysisOutcome {
    fn insufficient(reason: impl Into<String>) -> Self {
        AnalysisOutcome::InsufficientData {
            reason: reason.into(),
        }
    }

    pub fn report(&self) -> Option<&SignificanceReport> {
        match self {
            AnalysisOutcome::Verdict(report) => Some(report),
            AnalysisOutcome::InsufficientData { .. } => None,
        }
    }

    pub fn is_significant(&self) -> bool {
        self.report().map(|r| r.significant).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct SignificanceAnalyzer {
    alpha: f64,
    standard_normal: Normal,
}

impl SignificanceAnalyzer {
    /// `alpha` must lie strictly between 0 and 1
    pub fn new(alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(EngineError::Configuration(format!(
                "significance alpha must be in (0, 1), got {}",
                alpha
            )));
        }
        let standard_normal =
            Normal::new(0.0, 1.0).map_err(|e| EngineError::Internal(e.to_string()))?;
        Ok(Self {
            alpha,
            standard_normal,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Compare the snapshot's control variant against its treatment variant
    pub fn evaluate(&self, snapshot: &ExperimentMetricSnapshot) -> AnalysisOutcome {
        let with_data = snapshot
            .variants
            .values()
            .filter(|counts| counts.impressions > 0)
            .count();
        if with_data < 2 {
            return AnalysisOutcome::insufficient(format!(
                "{} variant(s) with impressions, need at least 2",
                with_data
            ));
        }

        self.compare(
            snapshot,
            &snapshot.control_variant,
            &snapshot.treatment_variant,
        )
    }

    /// Compare control against every other variant present in the snapshot
    pub fn evaluate_all(&self, snapshot: &ExperimentMetricSnapshot) -> Vec<(String, AnalysisOutcome)> {
        snapshot
            .variants
            .keys()
            .filter(|id| **id != snapshot.control_variant)
            .map(|id| {
                (
                    id.clone(),
                    self.compare(snapshot, &snapshot.control_variant, id),
                )
            })
            .collect()
    }

    fn compare(
        &self,
        snapshot: &ExperimentMetricSnapshot,
        control_id: &str,
        treatment_id: &str,
    ) -> AnalysisOutcome {
        let Some(control) = snapshot.variants.get(control_id) else {
            return AnalysisOutcome::insufficient(format!("no data for variant {}", control_id));
        };
        let Some(treatment) = snapshot.variants.get(treatment_id) else {
            return AnalysisOutcome::insufficient(format!("no data for variant {}", treatment_id));
        };

        for (id, counts) in [(control_id, control), (treatment_id, treatment)] {
            if counts.impressions == 0 {
                return AnalysisOutcome::insufficient(format!("variant {} has no impressions", id));
            }
            if counts.clicks > counts.impressions {
                return AnalysisOutcome::insufficient(format!(
                    "variant {} has more clicks ({}) than impressions ({})",
                    id, counts.clicks, counts.impressions
                ));
            }
        }

        let report = self.two_proportion_test(control_id, control, treatment_id, treatment);

        info!(
            experiment = %snapshot.experiment_name,
            control = control_id,
            treatment = treatment_id,
            control_ctr = report.control_ctr,
            treatment_ctr = report.treatment_ctr,
            p_value = report.p_value,
            significant = report.significant,
            "Experiment evaluated"
        );

        AnalysisOutcome::Verdict(report)
    }

    fn two_proportion_test(
        &self,
        control_id: &str,
        control: &VariantCounts,
        treatment_id: &str,
        treatment: &VariantCounts,
    ) -> SignificanceReport {
        let n_c = control.impressions as f64;
        let n_t = treatment.impressions as f64;
        let p_c = control.clicks as f64 / n_c;
        let p_t = treatment.clicks as f64 / n_t;
        let difference = p_t - p_c;

        let pooled = (control.clicks + treatment.clicks) as f64 / (n_c + n_t);
        let pooled_se = (pooled * (1.0 - pooled) * (1.0 / n_c + 1.0 / n_t)).sqrt();

        let (z_score, p_value) = if pooled_se > 0.0 {
            let z = difference / pooled_se;
            let p = 2.0 * (1.0 - self.standard_normal.cdf(z.abs()));
            (z, p.clamp(0.0, 1.0))
        } else {
            // Pooled rate of 0 or 1: both variants identical
            debug!(pooled_rate = pooled, "Degenerate pooled rate");
            (0.0, 1.0)
        };

        let critical = self.standard_normal.inverse_cdf(1.0 - self.alpha / 2.0);
        let unpooled_se = (p_c * (1.0 - p_c) / n_c + p_t * (1.0 - p_t) / n_t).sqrt();
        let margin = critical * unpooled_se;

        let lift = if p_c > 0.0 {
            Some(difference / p_c)
        } else {
            None
        };

        SignificanceReport {
            control_variant: control_id.to_string(),
            treatment_variant: treatment_id.to_string(),
            control_ctr: p_c,
            treatment_ctr: p_t,
            lift,
            absolute_difference: difference,
            z_score,
            p_value,
            significant: p_value < self.alpha,
            confidence_interval: (difference - margin, difference + margin),
            alpha: self.alpha,
        }
    }
}

impl Default for SignificanceAnalyzer {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            standard_normal: Normal::standard(),
        }
    }
}
