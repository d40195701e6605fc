/// A/B Testing - registry, assignment and significance analysis
pub mod assignment;
pub mod registry;
pub mod significance;

pub use assignment::{bucket_for, Assignment, AssignmentKeying, VariantAssignor};
pub use registry::ExperimentRegistry;
pub use significance::{AnalysisOutcome, SignificanceAnalyzer, SignificanceReport, DEFAULT_ALPHA};
