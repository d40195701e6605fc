use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Experiment definition. Immutable once live; declaration order of
/// `variants` is part of the experiment's identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentDefinition {
    pub name: String,
    pub variants: Vec<VariantDefinition>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantDefinition {
    pub id: String,
    pub weight: f64,
    pub strategy: StrategyConfig,
}

/// Blend configuration selected by a variant.
///
/// The two weights are independent coefficients, they are not required
/// to sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    pub algorithm: String,
    pub collaborative_weight: f64,
    pub content_weight: f64,
}

impl StrategyConfig {
    pub fn new(algorithm: impl Into<String>, collaborative_weight: f64, content_weight: f64) -> Self {
        Self {
            algorithm: algorithm.into(),
            collaborative_weight,
            content_weight,
        }
    }

    pub fn content_only(algorithm: impl Into<String>) -> Self {
        Self::new(algorithm, 0.0, 1.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ContentItem {
    /// Text handed to the embedding provider.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// One row of raw training feedback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRecord {
    pub subject_id: String,
    pub item_id: String,
    #[serde(default = "default_interaction_value")]
    pub value: f64,
}

fn default_interaction_value() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredItem {
    pub item_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub subject_id: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub recommendations: Vec<ScoredItem>,
    pub strategy: String,
    pub variant_id: String,
    pub model_version: String,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantCounts {
    pub impressions: u64,
    pub clicks: u64,
}

impl VariantCounts {
    pub fn new(impressions: u64, clicks: u64) -> Self {
        Self {
            impressions,
            clicks,
        }
    }

    pub fn ctr(&self) -> Option<f64> {
        if self.impressions == 0 {
            None
        } else {
            Some(self.clicks as f64 / self.impressions as f64)
        }
    }
}

/// Per-variant impression/click aggregates over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentMetricSnapshot {
    pub experiment_name: String,
    #[serde(default = "default_control")]
    pub control_variant: String,
    #[serde(default = "default_treatment")]
    pub treatment_variant: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub variants: BTreeMap<String, VariantCounts>,
}

fn default_control() -> String {
    "control".to_string()
}

fn default_treatment() -> String {
    "treatment".to_string()
}

/// Kinds of user events tracked against served recommendations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    Click,
    Like,
    Share,
    Dwell,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
            EventType::Like => "like",
            EventType::Share => "share",
            EventType::Dwell => "dwell",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_counts_ctr() {
        assert_eq!(VariantCounts::new(0, 0).ctr(), None);
        let ctr = VariantCounts::new(200, 50).ctr().unwrap();
        assert!((ctr - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_defaults_variant_names() {
        let raw = r#"{
            "experiment_name": "homepage_recommendations_v1",
            "window_start": "2024-01-01T00:00:00Z",
            "window_end": "2024-01-08T00:00:00Z",
            "variants": {"control": {"impressions": 10, "clicks": 1}}
        }"#;
        let snapshot: ExperimentMetricSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.control_variant, "control");
        assert_eq!(snapshot.treatment_variant, "treatment");
    }

    #[test]
    fn test_interaction_value_defaults_to_one() {
        let record: InteractionRecord =
            serde_json::from_str(r#"{"subject_id": "u1", "item_id": "i1"}"#).unwrap();
        assert_eq!(record.value, 1.0);
    }
}
