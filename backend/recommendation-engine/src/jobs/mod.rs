// ============================================
// Offline Jobs
// ============================================
//
// Batch runners for:
// 1. Model training (factor model + content embeddings + popularity)
// 2. Experiment evaluation (significance over a metrics window)
//
// Triggered from the command line:
//   recommendation-engine train
//   recommendation-engine recommend <subject_id> [count]
//   recommendation-engine evaluate <snapshot.json>

pub mod evaluation;
pub mod training;

pub use evaluation::{evaluate_snapshot_file, EvaluationJob, ExperimentEvaluation};
pub use training::{
    build_embedding_provider, load_snapshot, run_training_job, TrainingJob, TrainingJobStats,
    CONTENT_EMBEDDINGS_FILE, FACTOR_MODEL_FILE, ITEM_POPULARITY_FILE,
};
