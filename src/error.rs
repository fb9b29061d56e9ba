//! Error types shared across the pipeline.
//!
//! Analysis entry points never surface these to callers: every failure on the
//! sentiment/spam path resolves to a well-formed result with a degraded method or
//! flag. The enums exist for the seams that can legitimately fail (resource
//! loading, model backends, external review sources) and for logging.

use std::path::PathBuf;

use thiserror::Error;

/// Failure while loading or reloading the lexicon resource.
#[derive(Debug, Error)]
pub enum LexiconError {
    /// The file could not be read (missing, permissions). Callers fall back to defaults.
    #[error("lexicon file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not a valid lexicon document. Startup-fatal.
    #[error("lexicon file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The file parsed but carries no sentiment words at all.
    #[error("lexicon file {path} has no positive or negative entries")]
    Empty { path: PathBuf },
}

/// Neural classifier failures. All of them demote fusion to a rule-based method.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("neural classifier is disabled")]
    Disabled,

    #[error("neural classifier failed to load: {0}")]
    LoadFailed(String),

    #[error("neural inference failed: {0}")]
    Inference(String),

    #[error("neural inference timed out after {0} ms")]
    Timeout(u64),

    #[error("neural backend returned an unusable response: {0}")]
    BadResponse(String),
}

impl ModelError {
    /// Short label used for the `neural_fallbacks_total{reason}` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            ModelError::Disabled => "disabled",
            ModelError::LoadFailed(_) => "load_failed",
            ModelError::Inference(_) => "inference",
            ModelError::Timeout(_) => "timeout",
            ModelError::BadResponse(_) => "bad_response",
        }
    }
}

/// Pipeline configuration could not be read or parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// The external review source failed while recomputing a destination.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("review source failed for destination {destination_id}: {message}")]
    Source {
        destination_id: String,
        message: String,
    },
}
