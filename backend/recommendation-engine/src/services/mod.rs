pub mod embeddings;
pub mod experiments;
pub mod ranking;
pub mod serving;
pub mod training;

pub use embeddings::{EmbeddingIndex, EmbeddingProvider};
pub use experiments::{ExperimentRegistry, SignificanceAnalyzer, VariantAssignor};
pub use ranking::HybridScorer;
pub use serving::{ModelSnapshot, RecommendationService, SnapshotStore};
pub use training::{FactorModel, InteractionMatrix, MatrixFactorizationTrainer};
