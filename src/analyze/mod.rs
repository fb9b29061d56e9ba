// src/analyze/mod.rs
//! Analysis stages: rule engine, neural adapter, fusion, spam gate and rate window.

pub mod antispam;
pub mod fusion;
pub mod neural;
pub mod rate_limit;
pub mod rules;

// Re-export convenient types.
pub use crate::analyze::antispam::{SpamAction, SpamDetector, SpamFlag, SpamVerdict};
pub use crate::analyze::fusion::{AnalysisMetadata, AnalysisResult, FusionEngine, Label, Method};
pub use crate::analyze::neural::{
    ClassProbs, ModelLoader, NeuralAdapter, NeuralStatus, SequenceClassifier,
};
pub use crate::analyze::rate_limit::{RateLimiter, RateState};
pub use crate::analyze::rules::{RuleAnalysis, RuleAnalyzer};
