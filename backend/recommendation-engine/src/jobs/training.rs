// ============================================
// Training Job
// ============================================
//
// Workflow:
// 1. Read interactions (JSON array of InteractionRecord) and the content
//    catalogue (JSON array of ContentItem)
// 2. Fit the factor model with ALS on a blocking thread
// 3. Embed the catalogue through the configured provider
// 4. Write the artefacts into the model directory:
//    - factor_model.json
//    - content_embeddings.json
//    - item_popularity.json
//
// `load_snapshot` reads the same directory back for serving.

use crate::config::{Config, EmbeddingsConfig, TrainingJobConfig};
use crate::error::{EngineError, Result};
use crate::models::{ContentItem, InteractionRecord, ScoredItem};
use crate::services::embeddings::{
    EmbeddingIndex, EmbeddingProvider, HashingEmbeddingProvider, RemoteEmbeddingProvider,
};
use crate::services::serving::ModelSnapshot;
use crate::services::training::{FactorModel, InteractionMatrix, MatrixFactorizationTrainer};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const FACTOR_MODEL_FILE: &str = "factor_model.json";
pub const CONTENT_EMBEDDINGS_FILE: &str = "content_embeddings.json";
pub const ITEM_POPULARITY_FILE: &str = "item_popularity.json";

/// Training job statistics
#[derive(Debug, Clone, Serialize)]
pub struct TrainingJobStats {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub model_version: String,
    pub subjects: usize,
    pub items: usize,
    pub interactions: usize,
    pub embedded_items: usize,
    pub final_loss: f64,
    pub total_duration_ms: u64,
}

/// Training job runner
pub struct TrainingJob {
    config: TrainingJobConfig,
    provider: Arc<dyn EmbeddingProvider>,
}

impl TrainingJob {
    pub fn new(config: TrainingJobConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { config, provider }
    }

    pub async fn run(&self) -> Result<TrainingJobStats> {
        let start_time = Instant::now();
        let started_at = Utc::now();

        info!(
            interactions = %self.config.interactions_path.display(),
            content = %self.config.content_path.display(),
            model_dir = %self.config.model_dir.display(),
            "Starting training job"
        );

        let records: Vec<InteractionRecord> = read_json(&self.config.interactions_path)?;
        let items: Vec<ContentItem> = read_json(&self.config.content_path)?;
        info!(
            interactions = records.len(),
            content_items = items.len(),
            "Loaded training inputs"
        );

        let matrix = InteractionMatrix::from_records(&records)?;
        let (subjects, n_items) = matrix.shape();
        let popularity = matrix.item_popularity();

        let trainer = MatrixFactorizationTrainer::new(self.config.trainer.clone())?;
        let (model, report) =
            tokio::task::spawn_blocking(move || trainer.train(&matrix)).await??;
        info!(
            version = %model.version(),
            iterations = report.iterations,
            factors = report.factors,
            checkpoints = report.loss_history.len(),
            final_loss = report.final_loss,
            "Factor model trained"
        );

        let index =
            EmbeddingIndex::build(&items, self.provider.as_ref(), self.config.embedding_batch_size)
                .await?;

        std::fs::create_dir_all(&self.config.model_dir)?;
        model.save(&self.config.model_dir.join(FACTOR_MODEL_FILE))?;
        index.save(&self.config.model_dir.join(CONTENT_EMBEDDINGS_FILE))?;
        write_popularity(&self.config.model_dir.join(ITEM_POPULARITY_FILE), popularity)?;

        Ok(TrainingJobStats {
            started_at,
            completed_at: Utc::now(),
            model_version: model.version().to_string(),
            subjects,
            items: n_items,
            interactions: records.len(),
            embedded_items: index.len(),
            final_loss: report.final_loss,
            total_duration_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

/// Embedding provider for the configured backend
pub fn build_embedding_provider(config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config {
        EmbeddingsConfig::Hashing { dimension } => {
            Ok(Arc::new(HashingEmbeddingProvider::new(*dimension)?))
        }
        EmbeddingsConfig::Remote {
            endpoint,
            model_name,
            dimension,
            timeout,
        } => Ok(Arc::new(RemoteEmbeddingProvider::new(
            endpoint.clone(),
            model_name.clone(),
            *dimension,
            *timeout,
        )?)),
    }
}

/// Read the training artefacts back into a servable snapshot
///
/// The embedding index is required. Without a factor model the snapshot
/// serves content-only; without popularity data trending uses id order.
pub fn load_snapshot(model_dir: &Path) -> Result<ModelSnapshot> {
    let index = EmbeddingIndex::load(&model_dir.join(CONTENT_EMBEDDINGS_FILE))?;

    let factor_path = model_dir.join(FACTOR_MODEL_FILE);
    let factor_model = if factor_path.exists() {
        Some(FactorModel::load(&factor_path)?)
    } else {
        warn!(path = %factor_path.display(), "No factor model found, serving content-only");
        None
    };

    let popularity_path = model_dir.join(ITEM_POPULARITY_FILE);
    let popularity: Vec<(String, f64)> = if popularity_path.exists() {
        read_json::<Vec<ScoredItem>>(&popularity_path)?
            .into_iter()
            .map(|item| (item.item_id, item.score))
            .collect()
    } else {
        Vec::new()
    };

    let version = match &factor_model {
        Some(model) => model.version().to_string(),
        None => format!("content-{}", index.model_name()),
    };

    info!(
        version = %version,
        items = index.len(),
        has_factor_model = factor_model.is_some(),
        "Loaded model snapshot"
    );

    Ok(ModelSnapshot::new(version, factor_model, index, popularity))
}

/// Run the training job with the loaded configuration
pub async fn run_training_job(config: &Config) -> anyhow::Result<TrainingJobStats> {
    info!("Initializing training job");

    let provider = build_embedding_provider(&config.embeddings)?;
    let job = TrainingJob::new(config.training.clone(), provider);

    match job.run().await {
        Ok(stats) => {
            info!(
                version = %stats.model_version,
                subjects = stats.subjects,
                items = stats.items,
                embedded = stats.embedded_items,
                final_loss = stats.final_loss,
                duration_ms = stats.total_duration_ms,
                "Training job completed"
            );
            Ok(stats)
        }
        Err(e) => {
            error!(error = %e, "Training job failed");
            Err(e.into())
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_popularity(path: &Path, popularity: Vec<(String, f64)>) -> Result<()> {
    let items: Vec<ScoredItem> = popularity
        .into_iter()
        .map(|(item_id, score)| ScoredItem { item_id, score })
        .collect();
    std::fs::write(path, serde_json::to_string_pretty(&items)?)?;
    Ok(())
}
