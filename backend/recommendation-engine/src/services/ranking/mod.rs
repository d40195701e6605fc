pub mod hybrid;

pub use hybrid::{blend, rank, HybridScorer};
