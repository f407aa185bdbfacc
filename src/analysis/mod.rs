//! Analysis pipeline: validation, concurrent dispatch and aggregation.

pub mod aggregator;
pub mod orchestrator;

pub use orchestrator::{Analysis, AnalysisStatus, Orchestrator, ValidationError};
