pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod ports;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Result};
pub use services::{
    EmbeddingIndex, ExperimentRegistry, FactorModel, HybridScorer, MatrixFactorizationTrainer,
    ModelSnapshot, RecommendationService, SignificanceAnalyzer, SnapshotStore, VariantAssignor,
};
