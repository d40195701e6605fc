/// Variant Assignor - Deterministic hash-based bucketing
///
/// Algorithm:
/// 1. SHA-256 of "{subject_id}_{experiment_name}", first 32 bits
/// 2. Bucket = hash % 100 (0-99)
/// 3. Walk variants in declared order accumulating weight * 100; the first
///    variant whose cumulative threshold exceeds the bucket wins
///
/// Example:
/// - control: 0.5 (buckets 0-49)
/// - variant_a: 0.3 (buckets 50-79)
/// - variant_b: 0.2 (buckets 80-99)
use super::ExperimentRegistry;
use crate::models::{ExperimentDefinition, StrategyConfig};
use crate::ports::{AssignmentRecord, SideChannel, SideEffect};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

const BUCKET_COUNT: u32 = 100;

/// How assignment rows are keyed in the persistence port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKeying {
    /// One row per (subject, experiment)
    #[default]
    PerExperiment,
    /// One row per subject across all experiments, overwritten on each assignment
    PerSubject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub experiment_name: String,
    pub variant_id: String,
    /// `None` for unknown experiments
    pub strategy: Option<StrategyConfig>,
    pub known_experiment: bool,
}

#[derive(Clone)]
pub struct VariantAssignor {
    registry: Arc<ExperimentRegistry>,
    default_variant: String,
    side_channel: Option<SideChannel>,
}

impl VariantAssignor {
    pub fn new(registry: Arc<ExperimentRegistry>, default_variant: impl Into<String>) -> Self {
        Self {
            registry,
            default_variant: default_variant.into(),
            side_channel: None,
        }
    }

    /// Persist resolved assignments through the side channel
    pub fn with_side_channel(mut self, side_channel: SideChannel) -> Self {
        self.side_channel = Some(side_channel);
        self
    }

    pub fn registry(&self) -> &ExperimentRegistry {
        &self.registry
    }

    /// Variant id for the pair; unknown experiments get the default variant
    pub fn assign(&self, subject_id: &str, experiment_name: &str) -> String {
        self.resolve(subject_id, experiment_name).variant_id
    }

    /// Resolve the variant and its strategy, queueing the assignment for persistence
    pub fn resolve(&self, subject_id: &str, experiment_name: &str) -> Assignment {
        let Some(experiment) = self.registry.get(experiment_name) else {
            debug!(
                subject_id = subject_id,
                experiment = experiment_name,
                default_variant = %self.default_variant,
                "Unknown experiment, using default variant"
            );
            return Assignment {
                experiment_name: experiment_name.to_string(),
                variant_id: self.default_variant.clone(),
                strategy: None,
                known_experiment: false,
            };
        };

        let bucket = bucket_for(subject_id, experiment_name);
        let variant = select_variant(experiment, bucket);

        debug!(
            subject_id = subject_id,
            experiment = experiment_name,
            bucket = bucket,
            variant = %variant.id,
            "Variant assigned"
        );

        if let Some(channel) = &self.side_channel {
            channel.emit(SideEffect::Assignment(AssignmentRecord {
                subject_id: subject_id.to_string(),
                experiment_name: experiment_name.to_string(),
                variant_id: variant.id.clone(),
                assigned_at: Utc::now(),
            }));
        }

        Assignment {
            experiment_name: experiment_name.to_string(),
            variant_id: variant.id.clone(),
            strategy: Some(variant.strategy.clone()),
            known_experiment: true,
        }
    }
}

/// Stable bucket in [0, 100) for the pair
pub fn bucket_for(subject_id: &str, experiment_name: &str) -> u32 {
    let digest = Sha256::digest(format!("{}_{}", subject_id, experiment_name).as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    hash % BUCKET_COUNT
}

fn select_variant(
    experiment: &ExperimentDefinition,
    bucket: u32,
) -> &crate::models::VariantDefinition {
    let mut cumulative = 0.0;
    for variant in &experiment.variants {
        cumulative += variant.weight * BUCKET_COUNT as f64;
        if (bucket as f64) < cumulative {
            return variant;
        }
    }

    // Rounding leftovers (weights summing to 1.0 - epsilon) land in the last variant
    &experiment.variants[experiment.variants.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariantDefinition;
    use crate::ports::side_channel;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn registry(weights: &[(&str, f64)]) -> Arc<ExperimentRegistry> {
        let definition = ExperimentDefinition {
            name: "test_experiment".to_string(),
            variants: weights
                .iter()
                .map(|(id, weight)| VariantDefinition {
                    id: id.to_string(),
                    weight: *weight,
                    strategy: StrategyConfig::new(format!("algo_{}", id), 0.5, 0.5),
                })
                .collect(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            metrics: vec!["ctr".to_string()],
        };
        Arc::new(ExperimentRegistry::new(vec![definition]).unwrap())
    }

    #[test]
    fn test_bucket_assignment_deterministic() {
        let assignor = VariantAssignor::new(
            registry(&[("control", 0.5), ("treatment", 0.5)]),
            "control",
        );

        let first = assignor.assign("user_123", "test_experiment");
        for _ in 0..10 {
            assert_eq!(assignor.assign("user_123", "test_experiment"), first);
        }
    }

    #[test]
    fn test_unknown_experiment_returns_default() {
        let assignor = VariantAssignor::new(registry(&[("control", 1.0)]), "control");
        let assignment = assignor.resolve("user_123", "no_such_experiment");

        assert_eq!(assignment.variant_id, "control");
        assert!(!assignment.known_experiment);
        assert!(assignment.strategy.is_none());
    }

    #[test]
    fn test_allocation_distribution() {
        let assignor = VariantAssignor::new(
            registry(&[("control", 0.5), ("variant_a", 0.3), ("variant_b", 0.2)]),
            "control",
        );

        let samples = 10_000;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..samples {
            let variant = assignor.assign(&format!("user_{}", i), "test_experiment");
            *counts.entry(variant).or_insert(0) += 1;
        }

        // Within 3 percentage points of the configured weights
        for (id, weight) in [("control", 0.5), ("variant_a", 0.3), ("variant_b", 0.2)] {
            let share = *counts.get(id).unwrap_or(&0) as f64 / samples as f64;
            assert!(
                (share - weight).abs() < 0.03,
                "{} share {} too far from {}",
                id,
                share,
                weight
            );
        }

        // Chi-square goodness of fit, 2 degrees of freedom, p = 0.001 critical value
        let chi_square: f64 = [("control", 0.5), ("variant_a", 0.3), ("variant_b", 0.2)]
            .iter()
            .map(|(id, weight)| {
                let expected = weight * samples as f64;
                let observed = *counts.get(*id).unwrap_or(&0) as f64;
                (observed - expected).powi(2) / expected
            })
            .sum();
        assert!(chi_square < 13.82, "chi-square {}", chi_square);
    }

    #[test]
    fn test_zero_weight_variant_never_assigned() {
        let assignor = VariantAssignor::new(
            registry(&[("control", 1.0), ("holdout", 0.0)]),
            "control",
        );
        for i in 0..500 {
            assert_eq!(assignor.assign(&format!("u{}", i), "test_experiment"), "control");
        }
    }

    #[test]
    fn test_resolve_returns_strategy_and_persists() {
        let (channel, mut receiver) = side_channel(16);
        let assignor = VariantAssignor::new(registry(&[("control", 1.0)]), "control")
            .with_side_channel(channel);

        let assignment = assignor.resolve("user_1", "test_experiment");
        assert_eq!(assignment.strategy.unwrap().algorithm, "algo_control");

        match receiver.try_recv().unwrap() {
            SideEffect::Assignment(record) => {
                assert_eq!(record.subject_id, "user_1");
                assert_eq!(record.experiment_name, "test_experiment");
                assert_eq!(record.variant_id, "control");
            }
            other => panic!("unexpected side effect: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_experiment_not_persisted() {
        let (channel, mut receiver) = side_channel(16);
        let assignor = VariantAssignor::new(registry(&[("control", 1.0)]), "control")
            .with_side_channel(channel);

        assignor.assign("user_1", "missing");
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_persistence_queue_full_does_not_affect_assignment() {
        let (channel, _receiver) = side_channel(1);
        let assignor = VariantAssignor::new(
            registry(&[("control", 0.5), ("treatment", 0.5)]),
            "control",
        )
        .with_side_channel(channel);

        // Only the first record fits; the rest are dropped but still assigned
        for i in 0..20 {
            let subject = format!("u{}", i);
            let expected = if bucket_for(&subject, "test_experiment") < 50 {
                "control"
            } else {
                "treatment"
            };
            assert_eq!(assignor.assign(&subject, "test_experiment"), expected);
        }
    }

    proptest! {
        #[test]
        fn prop_assignment_is_pure(subject in "[a-z0-9_]{1,24}", experiment in "[a-z_]{1,16}") {
            prop_assert_eq!(bucket_for(&subject, &experiment), bucket_for(&subject, &experiment));
            prop_assert!(bucket_for(&subject, &experiment) < 100);

            let assignor = VariantAssignor::new(
                registry(&[("control", 0.5), ("treatment", 0.5)]),
                "control",
            );
            prop_assert_eq!(
                assignor.assign(&subject, "test_experiment"),
                assignor.assign(&subject, "test_experiment")
            );
        }
    }
}
