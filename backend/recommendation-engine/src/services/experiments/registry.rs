/// Experiment Registry - immutable, validated experiment definitions
use crate::error::{EngineError, Result};
use crate::models::{ExperimentDefinition, StrategyConfig, VariantDefinition};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Tolerance for variant weights summing to 1.0
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Experiment definitions loaded once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ExperimentRegistry {
    experiments: HashMap<String, ExperimentDefinition>,
}

impl ExperimentRegistry {
    pub fn new(definitions: Vec<ExperimentDefinition>) -> Result<Self> {
        let mut experiments = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            validate(&definition)?;
            if experiments.contains_key(&definition.name) {
                return Err(EngineError::InvalidExperiment(format!(
                    "duplicate experiment name: {}",
                    definition.name
                )));
            }
            experiments.insert(definition.name.clone(), definition);
        }
        Ok(Self { experiments })
    }

    /// Load definitions from a JSON array file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let definitions: Vec<ExperimentDefinition> = serde_json::from_str(&raw)?;
        Self::new(definitions)
    }

    /// The homepage experiment the service ships with
    pub fn builtin() -> Self {
        let homepage = ExperimentDefinition {
            name: "homepage_recommendations_v1".to_string(),
            variants: vec![
                VariantDefinition {
                    id: "control".to_string(),
                    weight: 0.5,
                    strategy: StrategyConfig::new("hybrid_collaborative", 0.6, 0.4),
                },
                VariantDefinition {
                    id: "treatment".to_string(),
                    weight: 0.5,
                    strategy: StrategyConfig::new("hybrid_content_boosted", 0.3, 0.7),
                },
            ],
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            metrics: vec![
                "ctr".to_string(),
                "session_duration".to_string(),
                "conversion_rate".to_string(),
            ],
        };

        let mut experiments = HashMap::new();
        experiments.insert(homepage.name.clone(), homepage);
        Self { experiments }
    }

    pub fn get(&self, experiment_name: &str) -> Option<&ExperimentDefinition> {
        self.experiments.get(experiment_name)
    }

    /// Strategy of a variant, if both experiment and variant exist
    pub fn variant_config(&self, experiment_name: &str, variant_id: &str) -> Option<&StrategyConfig> {
        self.get(experiment_name)?
            .variants
            .iter()
            .find(|v| v.id == variant_id)
            .map(|v| &v.strategy)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.experiments.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

fn validate(definition: &ExperimentDefinition) -> Result<()> {
    if definition.name.trim().is_empty() {
        return Err(EngineError::InvalidExperiment(
            "experiment name must not be empty".to_string(),
        ));
    }

    if definition.variants.is_empty() {
        return Err(EngineError::InvalidExperiment(format!(
            "experiment {} has no variants",
            definition.name
        )));
    }

    let mut seen = HashSet::new();
    for variant in &definition.variants {
        if !seen.insert(variant.id.as_str()) {
            return Err(EngineError::InvalidExperiment(format!(
                "experiment {} declares variant {} twice",
                definition.name, variant.id
            )));
        }
        if !(0.0..=1.0).contains(&variant.weight) || !variant.weight.is_finite() {
            return Err(EngineError::InvalidExperiment(format!(
                "variant {} of {} has weight {} outside [0, 1]",
                variant.id, definition.name, variant.weight
            )));
        }
    }

    let total: f64 = definition.variants.iter().map(|v| v.weight).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::InvalidExperiment(format!(
            "variant weights of {} must sum to 1.0 (got {})",
            definition.name, total
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn definition(weights: &[(&str, f64)]) -> ExperimentDefinition {
        ExperimentDefinition {
            name: "exp".to_string(),
            variants: weights
                .iter()
                .map(|(id, weight)| VariantDefinition {
                    id: id.to_string(),
                    weight: *weight,
                    strategy: StrategyConfig::new("hybrid", 0.5, 0.5),
                })
                .collect(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            metrics: vec!["ctr".to_string()],
        }
    }

    #[test]
    fn test_builtin_is_valid() {
        let registry = ExperimentRegistry::builtin();
        let experiment = registry.get("homepage_recommendations_v1").unwrap();
        assert!(validate(experiment).is_ok());
        assert_eq!(
            registry
                .variant_config("homepage_recommendations_v1", "treatment")
                .unwrap()
                .algorithm,
            "hybrid_content_boosted"
        );
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(ExperimentRegistry::new(vec![definition(&[("a", 0.5), ("b", 0.3)])]).is_err());
        assert!(ExperimentRegistry::new(vec![definition(&[
            ("a", 0.1),
            ("b", 0.2),
            ("c", 0.7)
        ])])
        .is_ok());
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(ExperimentRegistry::new(vec![definition(&[("a", 0.5), ("a", 0.5)])]).is_err());
        assert!(ExperimentRegistry::new(vec![definition(&[])]).is_err());
        assert!(ExperimentRegistry::new(vec![
            definition(&[("a", 1.0)]),
            definition(&[("b", 1.0)])
        ])
        .is_err());
    }

    #[test]
    fn test_from_file() {
        let json = serde_json::to_string(&vec![definition(&[("control", 0.25), ("treatment", 0.75)])])
            .unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let registry = ExperimentRegistry::from_file(file.path()).unwrap();
        assert_eq!(registry.names(), vec!["exp"]);
        assert!(registry.variant_config("exp", "missing").is_none());
    }
}
