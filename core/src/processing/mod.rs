pub mod classifier;
pub mod compare;
pub mod peaks;

pub use classifier::{Classifier, VoteTally};
pub use compare::{compare_to_reference, resonance_minimum, Comparison, ComparisonParams, DbScale, ReferenceBand};
pub use peaks::PeakFinder;
