/// Offline collaborative-filtering training
pub mod als;
pub mod factor_model;
pub mod interaction_matrix;

pub use als::{reconstruction_loss, MatrixFactorizationTrainer, TrainerConfig, TrainingReport};
pub use factor_model::{FactorModel, FACTOR_MODEL_FORMAT_VERSION};
pub use interaction_matrix::InteractionMatrix;
