// src/lib.rs
// Public library surface for integration tests and the binary.

pub mod aggregate;
pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod lexicon;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod text;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{DestinationAggregate, ReviewRecord, ReviewSource};
pub use crate::analyze::{AnalysisResult, Label, Method, SpamAction, SpamFlag, SpamVerdict};
pub use crate::api::{router, AppState};
pub use crate::config::PipelineConfig;
pub use crate::pipeline::{ReviewOutcome, ReviewPipeline, ReviewSubmission};
