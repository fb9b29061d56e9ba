//! Fusion of the neural and rule signals into the final sentiment result.
//!
//! `final = w_phobert * (pos - neg) + w_rule * rule_score`, shrunk toward 0 when both
//! signals sit in the neutral band. The rule engine is the primary signal; when the
//! neural path is unavailable the rule score passes through unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyze::neural::ClassProbs;
use crate::analyze::rules::RuleAnalysis;
use crate::config::FusionConfig;
use crate::error::ModelError;

/// How the final score was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Rule engine had no evidence; the neural score carries the result.
    PhobertPrimary,
    PhobertRuleBlend,
    /// Neural adapter unavailable (disabled, load failure, forced off, inference error).
    RuleOnly,
    /// Model loaded but the call exceeded its deadline.
    PhobertUnavailableFallback,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::PhobertPrimary => "phobert_primary",
            Method::PhobertRuleBlend => "phobert_rule_blend",
            Method::RuleOnly => "rule_only",
            Method::PhobertUnavailableFallback => "phobert_unavailable_fallback",
        }
    }

    pub fn used_neural(self) -> bool {
        matches!(self, Method::PhobertPrimary | Method::PhobertRuleBlend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Neg,
    Neu,
    Pos,
}

impl Label {
    /// Strict thresholds: exactly `positive_threshold` is still neutral.
    pub fn from_score(score: f32, cfg: &FusionConfig) -> Self {
        if score > cfg.positive_threshold {
            Label::Pos
        } else if score < cfg.negative_threshold {
            Label::Neg
        } else {
            Label::Neu
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Neg => "NEG",
            Label::Neu => "NEU",
            Label::Pos => "POS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub method: Method,
    /// `pos - neg`, present only when the classifier answered.
    pub phobert_score: Option<f32>,
    pub rule_score: f32,
    pub confidence: f32,
    pub probs: Option<ClassProbs>,
    pub sarcasm_risk: bool,
    pub low_confidence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<String>,
    /// Why the neural path was skipped, for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neural_fallback: Option<String>,
    /// Per-aspect rule sentiment (`service`, `price`, ...), in [-1, 1].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aspects: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub score: f32,
    pub label: Label,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub metadata: AnalysisMetadata,
}

/// Stateless combiner over a [`FusionConfig`].
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    cfg: FusionConfig,
}

impl FusionEngine {
    pub fn new(cfg: FusionConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.cfg
    }

    pub fn label(&self, score: f32) -> Label {
        Label::from_score(score, &self.cfg)
    }

    pub fn fuse(
        &self,
        rule: RuleAnalysis,
        neural: Result<ClassProbs, ModelError>,
    ) -> AnalysisResult {
        let c = &self.cfg;
        let in_band = |x: f32| x.abs() < c.neutral_band;

        let (method, score, phobert_score, probs, confidence, fallback) = match neural {
            Ok(probs) => {
                let p = probs.polarity();
                let (method, mut combined) = if rule.has_evidence() {
                    (
                        Method::PhobertRuleBlend,
                        c.weight_phobert * p + c.weight_rule * rule.score,
                    )
                } else {
                    (Method::PhobertPrimary, p * c.phobert_only_damping)
                };
                if in_band(p) && in_band(rule.score) {
                    combined *= c.neutral_dampening;
                }
                (method, combined, Some(p), Some(probs), probs.confidence(), None)
            }
            Err(e) => {
                let method = match e {
                    ModelError::Timeout(_) => Method::PhobertUnavailableFallback,
                    _ => Method::RuleOnly,
                };
                (
                    method,
                    rule.score,
                    None,
                    None,
                    rule.score.abs(),
                    Some(e.reason().to_string()),
                )
            }
        };

        let score = if score.is_finite() {
            score.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        // Nothing to read at all: zero confidence regardless of the neural prior.
        let confidence = if rule.token_count == 0 {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        AnalysisResult {
            score,
            label: self.label(score),
            positive_keywords: rule.positive_keywords,
            negative_keywords: rule.negative_keywords,
            metadata: AnalysisMetadata {
                method,
                phobert_score,
                rule_score: rule.score,
                confidence,
                probs,
                sarcasm_risk: rule.sarcasm_risk,
                low_confidence: rule.low_confidence,
                post_processing: rule.post_processing.map(str::to_string),
                calibration: None,
                neural_fallback: fallback,
                aspects: rule.aspects,
            },
        }
    }

    /// Pull the score toward the user's star rating when they clearly disagree.
    pub fn calibrate_with_rating(&self, result: &mut AnalysisResult, rating: u8) {
        let s = result.score;
        let adjusted = match rating {
            5 if s < 0.5 => Some((s.max(0.6), "rating_5_floor")),
            4 if s < 0.15 => Some((s.max(0.20), "rating_4_floor")),
            1 if s > -0.5 => Some((s.min(-0.6), "rating_1_ceiling")),
            _ => None,
        };
        if let Some((score, reason)) = adjusted {
            result.score = score;
            result.label = self.label(score);
            result.metadata.calibration = Some(reason.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(score: f32, evidence: bool) -> RuleAnalysis {
        let mut r = RuleAnalysis::empty();
        r.score = score;
        r.token_count = 3;
        r.low_confidence = !evidence;
        if evidence {
            r.hits.push(crate::analyze::rules::TermHit {
                term: "tốt".into(),
                polarity: crate::lexicon::Polarity::Positive,
                magnitude: score.abs(),
                negated: false,
                clause: 0,
                sentence: 0,
                aspect: None,
            });
        }
        r
    }

    fn probs(neg: f32, neu: f32, pos: f32) -> ClassProbs {
        ClassProbs { neg, neu, pos }
    }

    #[test]
    fn label_thresholds_are_strict() {
        let cfg = FusionConfig::default();
        assert_eq!(Label::from_score(0.15, &cfg), Label::Neu);
        assert_eq!(Label::from_score(0.1501, &cfg), Label::Pos);
        assert_eq!(Label::from_score(-0.15, &cfg), Label::Neu);
        assert_eq!(Label::from_score(-0.1501, &cfg), Label::Neg);
        assert_eq!(Label::from_score(0.0, &cfg), Label::Neu);
    }

    #[test]
    fn blend_uses_tunable_weights() {
        let f = FusionEngine::default();
        let out = f.fuse(rule(0.5, true), Ok(probs(0.1, 0.2, 0.7)));
        assert_eq!(out.metadata.method, Method::PhobertRuleBlend);
        let expected = 0.30 * 0.6 + 0.70 * 0.5;
        assert!((out.score - expected).abs() < 1e-5);
        assert!((out.metadata.confidence - 0.7).abs() < 1e-6);
        assert_eq!(out.metadata.phobert_score.map(|p| (p * 100.0).round()), Some(60.0));
    }

    #[test]
    fn neutral_band_dampens() {
        let f = FusionEngine::default();
        let out = f.fuse(rule(0.1, true), Ok(probs(0.3, 0.4, 0.35)));
        let raw = 0.30 * 0.05 + 0.70 * 0.1;
        assert!((out.score - raw * 0.15).abs() < 1e-5);
    }

    #[test]
    fn no_rule_evidence_is_phobert_primary() {
        let f = FusionEngine::default();
        let out = f.fuse(rule(0.02, false), Ok(probs(0.05, 0.15, 0.8)));
        assert_eq!(out.metadata.method, Method::PhobertPrimary);
        assert!((out.score - 0.75 * 0.70).abs() < 1e-5);
        assert_eq!(out.label, Label::Pos);
    }

    #[test]
    fn unavailable_model_is_rule_only() {
        let f = FusionEngine::default();
        let out = f.fuse(rule(-0.4, true), Err(ModelError::LoadFailed("gone".into())));
        assert_eq!(out.metadata.method, Method::RuleOnly);
        assert_eq!(out.score, -0.4);
        assert!(out.metadata.probs.is_none());
        assert_eq!(out.metadata.neural_fallback.as_deref(), Some("load_failed"));
    }

    #[test]
    fn timeout_is_unavailable_fallback() {
        let f = FusionEngine::default();
        let out = f.fuse(rule(0.3, true), Err(ModelError::Timeout(1500)));
        assert_eq!(out.metadata.method, Method::PhobertUnavailableFallback);
        assert_eq!(out.score, 0.3);
    }

    #[test]
    fn empty_input_has_zero_confidence() {
        let f = FusionEngine::default();
        let out = f.fuse(RuleAnalysis::empty(), Ok(ClassProbs::NEUTRAL_PRIOR));
        assert_eq!(out.score, 0.0);
        assert_eq!(out.metadata.confidence, 0.0);
        assert!(out.metadata.low_confidence);
    }

    #[test]
    fn rating_calibration() {
        let f = FusionEngine::default();
        let mut r = f.fuse(rule(0.1, true), Err(ModelError::Disabled));
        f.calibrate_with_rating(&mut r, 5);
        assert_eq!(r.score, 0.6);
        assert_eq!(r.label, Label::Pos);
        assert_eq!(r.metadata.calibration.as_deref(), Some("rating_5_floor"));

        let mut r = f.fuse(rule(0.3, true), Err(ModelError::Disabled));
        f.calibrate_with_rating(&mut r, 1);
        assert_eq!(r.score, -0.6);
        assert_eq!(r.label, Label::Neg);

        let mut r = f.fuse(rule(0.3, true), Err(ModelError::Disabled));
        f.calibrate_with_rating(&mut r, 3);
        assert_eq!(r.score, 0.3);
        assert!(r.metadata.calibration.is_none());
    }

    #[test]
    fn method_serializes_snake_case() {
        let s = serde_json::to_string(&Method::PhobertUnavailableFallback).unwrap();
        assert_eq!(s, "\"phobert_unavailable_fallback\"");
        assert_eq!(serde_json::to_string(&Label::Pos).unwrap(), "\"POS\"");
    }
}
