//! Review pipeline: spam gate → rule + neural analysis → fusion, plus destination recompute.
//!
//! This is the library boundary consumed by the web layer. Analysis and spam checks
//! are total over any `&str`; degraded operation shows up in `metadata.method` and in
//! verdict flags, never as an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{self, DestinationAggregate, ReviewSource};
use crate::analyze::antispam::{SpamDetector, SpamVerdict};
use crate::analyze::fusion::{AnalysisResult, FusionEngine};
use crate::analyze::neural::NeuralAdapter;
use crate::analyze::rules::RuleAnalyzer;
use crate::config::PipelineConfig;
use crate::error::{AggregateError, LexiconError};
use crate::lexicon::LexiconStore;
use crate::text;

/// One incoming review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub destination_id: String,
    pub text: String,
    pub rating: u8,
    /// Client IP or another per-submitter key.
    pub source_id: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Gate verdict plus the analysis when the review was admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub verdict: SpamVerdict,
    pub analysis: Option<AnalysisResult>,
}

impl ReviewOutcome {
    pub fn admitted(&self) -> bool {
        self.verdict.action.admits()
    }
}

pub struct ReviewPipeline {
    config: PipelineConfig,
    lexicon: Arc<LexiconStore>,
    rules: RuleAnalyzer,
    neural: Arc<NeuralAdapter>,
    fusion: FusionEngine,
    spam: SpamDetector,
}

impl ReviewPipeline {
    pub fn new(
        config: PipelineConfig,
        lexicon: Arc<LexiconStore>,
        neural: Arc<NeuralAdapter>,
    ) -> Self {
        Self {
            rules: RuleAnalyzer::new(config.rules.clone()),
            fusion: FusionEngine::new(config.fusion.clone()),
            spam: SpamDetector::new(config.spam.clone(), config.rate_limit.clone()),
            config,
            lexicon,
            neural,
        }
    }

    /// Build everything from config: lexicon file (corrupt file is fatal) and neural backend.
    pub fn from_config(config: PipelineConfig) -> Result<Self, LexiconError> {
        let lexicon = Arc::new(LexiconStore::load(&config.rules.lexicon_path)?);
        let neural = Arc::new(NeuralAdapter::from_config(&config.neural));
        Ok(Self::new(config, lexicon, neural))
    }

    /// Built-in lexicon, neural path disabled (rule-only scoring).
    pub fn rule_only() -> Self {
        Self::new(
            PipelineConfig::default(),
            Arc::new(LexiconStore::builtin()),
            Arc::new(NeuralAdapter::disabled()),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn lexicon(&self) -> &LexiconStore {
        &self.lexicon
    }

    pub fn neural(&self) -> &NeuralAdapter {
        &self.neural
    }

    pub fn spam(&self) -> &SpamDetector {
        &self.spam
    }

    /// Score `text` in [-1, 1] with keyword evidence and audit metadata.
    pub async fn analyze_sentiment(&self, input: &str) -> AnalysisResult {
        let lexicon = self.lexicon.current();
        let rule = self.rules.analyze(&lexicon, input);
        let neural = self.neural.infer(input).await;
        if let Err(e) = &neural {
            counter!("neural_fallbacks_total", "reason" => e.reason()).increment(1);
        }

        let result = self.fusion.fuse(rule, neural);
        counter!("sentiment_analyses_total", "method" => result.metadata.method.as_str())
            .increment(1);
        counter!("sentiment_label_total", "label" => result.label.as_str()).increment(1);
        debug!(
            target: "fusion",
            id = %text::anon_hash(input),
            method = result.metadata.method.as_str(),
            score = result.score,
            rule_score = result.metadata.rule_score,
            "sentiment analysed"
        );
        result
    }

    /// Like [`analyze_sentiment`](Self::analyze_sentiment), calibrated against a star rating.
    pub async fn analyze_review(&self, input: &str, rating: Option<u8>) -> AnalysisResult {
        let mut result = self.analyze_sentiment(input).await;
        if let Some(r) = rating {
            self.fusion.calibrate_with_rating(&mut result, r);
        }
        result
    }

    /// Dry-run verdict at the current time; nothing is remembered.
    pub fn check_spam(&self, input: &str, source_id: &str) -> SpamVerdict {
        self.spam.preview(input, source_id, None, Utc::now())
    }

    /// Dry-run verdict at `now`; duplicate memory and rate windows are left untouched.
    pub fn check_spam_at(
        &self,
        input: &str,
        source_id: &str,
        destination_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> SpamVerdict {
        self.spam.preview(input, source_id, destination_id, now)
    }

    /// Gate a real submission: the verdict counts toward duplicates and the rate window.
    pub fn record_spam_at(
        &self,
        input: &str,
        source_id: &str,
        destination_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> SpamVerdict {
        self.spam.check(input, source_id, destination_id, now)
    }

    /// Forget every remembered submission and rate window.
    pub fn clear_spam_memory(&self) {
        self.spam.clear();
    }

    /// Gate first; blocked reviews are never analysed.
    pub async fn submit_review(&self, sub: &ReviewSubmission) -> ReviewOutcome {
        let now = sub.submitted_at.unwrap_or_else(Utc::now);
        let verdict =
            self.record_spam_at(&sub.text, &sub.source_id, Some(&sub.destination_id), now);
        if !verdict.action.admits() {
            return ReviewOutcome {
                verdict,
                analysis: None,
            };
        }
        let analysis = self.analyze_review(&sub.text, Some(sub.rating)).await;
        ReviewOutcome {
            verdict,
            analysis: Some(analysis),
        }
    }

    pub fn recalculate_destination_score(
        &self,
        source: &dyn ReviewSource,
        destination_id: &str,
    ) -> Result<DestinationAggregate, AggregateError> {
        aggregate::recalculate_destination_score(source, destination_id, &self.config.aggregate)
    }

    /// Recompute every destination the source knows about.
    pub fn recalculate_all(
        &self,
        source: &dyn ReviewSource,
    ) -> Result<Vec<DestinationAggregate>, AggregateError> {
        source
            .destination_ids()?
            .iter()
            .map(|id| self.recalculate_destination_score(source, id))
            .collect()
    }
}
