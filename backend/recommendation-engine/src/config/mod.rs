use crate::error::{EngineError, Result};
use crate::services::experiments::{AssignmentKeying, ExperimentRegistry};
use crate::services::training::TrainerConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub experiments: ExperimentsConfig,
    pub serving: ServingConfig,
    pub analysis: AnalysisConfig,
    pub training: TrainingJobConfig,
    pub embeddings: EmbeddingsConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct ExperimentsConfig {
    /// JSON file with experiment definitions; `None` uses the built-in set.
    pub definitions_path: Option<PathBuf>,
    pub default_variant: String,
    pub keying: AssignmentKeying,
}

impl ExperimentsConfig {
    /// Definitions from `definitions_path`, or the built-in set
    pub fn load_registry(&self) -> Result<ExperimentRegistry> {
        match &self.definitions_path {
            Some(path) => ExperimentRegistry::from_file(path),
            None => Ok(ExperimentRegistry::builtin()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServingConfig {
    pub experiment_name: String,
    pub latency_budget: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub history_limit: usize,
    pub side_channel_capacity: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            experiment_name: "homepage_recommendations_v1".to_string(),
            latency_budget: Duration::from_millis(80),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 100_000,
            history_limit: 5,
            side_channel_capacity: 1024,
        }
    }
}

/// Longest accepted analysis window
pub const MAX_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub alpha: f64,
    pub window_days: i64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            window_days: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingJobConfig {
    pub trainer: TrainerConfig,
    pub interactions_path: PathBuf,
    pub content_path: PathBuf,
    pub model_dir: PathBuf,
    pub embedding_batch_size: usize,
}

#[derive(Debug, Clone)]
pub enum EmbeddingsConfig {
    /// Deterministic lexical encoder, used when no model server is configured.
    Hashing { dimension: usize },
    Remote {
        endpoint: String,
        model_name: String,
        dimension: usize,
        timeout: Duration,
    },
}

/// Flat view of the `RECSYS_*` environment, deserialized by envy.
#[derive(Debug, Deserialize)]
struct EnvSettings {
    #[serde(default = "default_service_name")]
    service_name: String,
    #[serde(default)]
    log_format: Option<String>,

    #[serde(default)]
    experiments_path: Option<PathBuf>,
    #[serde(default = "default_variant")]
    default_variant: String,
    #[serde(default = "default_keying")]
    assignment_keying: String,

    #[serde(default = "default_serving_experiment")]
    serving_experiment: String,
    #[serde(default = "default_latency_budget_ms")]
    latency_budget_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    cache_capacity: u64,
    #[serde(default = "default_history_limit")]
    history_limit: usize,
    #[serde(default = "default_side_channel_capacity")]
    side_channel_capacity: usize,

    #[serde(default = "default_alpha")]
    significance_alpha: f64,
    #[serde(default = "default_window_days")]
    analysis_window_days: i64,

    #[serde(default = "default_factors")]
    cf_factors: usize,
    #[serde(default = "default_iterations")]
    cf_iterations: usize,
    #[serde(default)]
    cf_regularization: f64,
    #[serde(default = "default_seed")]
    cf_seed: u64,

    #[serde(default = "default_interactions_path")]
    interactions_path: PathBuf,
    #[serde(default = "default_content_path")]
    content_path: PathBuf,
    #[serde(default = "default_model_dir")]
    model_dir: PathBuf,

    #[serde(default)]
    embedding_endpoint: Option<String>,
    #[serde(default = "default_embedding_model")]
    embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    embedding_dimension: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    embedding_timeout_ms: u64,
    #[serde(default = "default_embedding_batch_size")]
    embedding_batch_size: usize,
}

fn default_service_name() -> String {
    "recommendation-engine".to_string()
}
fn default_variant() -> String {
    "control".to_string()
}
fn default_keying() -> String {
    "per_experiment".to_string()
}
fn default_serving_experiment() -> String {
    "homepage_recommendations_v1".to_string()
}
fn default_latency_budget_ms() -> u64 {
    80
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_capacity() -> u64 {
    100_000
}
fn default_history_limit() -> usize {
    5
}
fn default_side_channel_capacity() -> usize {
    1024
}
fn default_alpha() -> f64 {
    0.05
}
fn default_window_days() -> i64 {
    7
}
fn default_factors() -> usize {
    100
}
fn default_iterations() -> usize {
    10
}
fn default_seed() -> u64 {
    42
}
fn default_interactions_path() -> PathBuf {
    PathBuf::from("data/interactions.json")
}
fn default_content_path() -> PathBuf {
    PathBuf::from("data/content_items.json")
}
fn default_model_dir() -> PathBuf {
    PathBuf::from("ml/models")
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
}
fn default_embedding_timeout_ms() -> u64 {
    10_000
}
fn default_embedding_batch_size() -> usize {
    64
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let settings: EnvSettings = envy::prefixed("RECSYS_").from_env()?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: EnvSettings) -> Result<Self> {
        let keying = match settings.assignment_keying.as_str() {
            "per_experiment" => AssignmentKeying::PerExperiment,
            "per_subject" => AssignmentKeying::PerSubject,
            other => {
                return Err(EngineError::Configuration(format!(
                    "RECSYS_ASSIGNMENT_KEYING must be per_experiment or per_subject (got {})",
                    other
                )))
            }
        };

        if !(settings.significance_alpha > 0.0 && settings.significance_alpha < 1.0) {
            return Err(EngineError::Configuration(format!(
                "RECSYS_SIGNIFICANCE_ALPHA must be in (0, 1) (got {})",
                settings.significance_alpha
            )));
        }

        if !(1..=MAX_WINDOW_DAYS).contains(&settings.analysis_window_days) {
            return Err(EngineError::Configuration(format!(
                "RECSYS_ANALYSIS_WINDOW_DAYS must be in [1, {}] (got {})",
                MAX_WINDOW_DAYS, settings.analysis_window_days
            )));
        }

        let embeddings = match settings.embedding_endpoint {
            Some(endpoint) => EmbeddingsConfig::Remote {
                endpoint,
                model_name: settings.embedding_model,
                dimension: settings.embedding_dimension,
                timeout: Duration::from_millis(settings.embedding_timeout_ms),
            },
            None => EmbeddingsConfig::Hashing {
                dimension: settings.embedding_dimension,
            },
        };

        Ok(Config {
            service: ServiceConfig {
                service_name: settings.service_name,
                log_json: settings
                    .log_format
                    .map(|f| f.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
            experiments: ExperimentsConfig {
                definitions_path: settings.experiments_path,
                default_variant: settings.default_variant,
                keying,
            },
            serving: ServingConfig {
                experiment_name: settings.serving_experiment,
                latency_budget: Duration::from_millis(settings.latency_budget_ms),
                cache_ttl: Duration::from_secs(settings.cache_ttl_secs),
                cache_capacity: settings.cache_capacity,
                history_limit: settings.history_limit,
                side_channel_capacity: settings.side_channel_capacity.max(1),
            },
            analysis: AnalysisConfig {
                alpha: settings.significance_alpha,
                window_days: settings.analysis_window_days,
            },
            training: TrainingJobConfig {
                trainer: TrainerConfig {
                    factors: settings.cf_factors,
                    iterations: settings.cf_iterations,
                    regularization: settings.cf_regularization,
                    seed: settings.cf_seed,
                    ..TrainerConfig::default()
                },
                interactions_path: settings.interactions_path,
                content_path: settings.content_path,
                model_dir: settings.model_dir,
                embedding_batch_size: settings.embedding_batch_size.max(1),
            },
            embeddings,
        })
    }
}
