// src/config/pipeline.rs
//! Typed pipeline configuration loaded from `config/pipeline.toml`.
//!
//! Every tunable constant of the rule engine, fusion, spam gate and aggregator lives
//! here, so alternate tunings can be tested by constructing a different struct.
//! Missing sections/fields fall back to the defaults below; values are sanitised
//! after load (ranges clamped, inverted pairs swapped).

use serde::{Deserialize, Serialize};
use std::{env, fs, io, path::Path};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_LEXICON_PATH: &str = "LEXICON_PATH";
pub const ENV_NEURAL_TEST_MODE: &str = "NEURAL_TEST_MODE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub rules: RuleConfig,
    pub fusion: FusionConfig,
    pub neural: NeuralConfig,
    pub spam: SpamConfig,
    pub rate_limit: RateLimitConfig,
    pub aggregate: AggregateConfig,
}

/// Rule engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleConfig {
    pub lexicon_path: String,
    /// Tokens inspected before a keyword for negation/modifiers.
    pub lookback: usize,
    /// Share of the final score carried by the clause after the last contrast connective.
    pub trailing_clause_weight: f32,
    /// Magnitude factor applied to a negated keyword (polarity is flipped too).
    pub negation_factor: f32,
    pub min_modifier_factor: f32,
    pub max_modifier_factor: f32,
    /// Score returned for text with tokens but no lexicon evidence.
    pub neutral_soft_bias: f32,
    pub neutral_soft_weight: f32,
    pub behavior_penalty: f32,
    /// Max token distance between the two halves of a behavior pattern.
    pub behavior_window: usize,
    pub short_review_tokens: usize,
    pub short_review_boost: f32,
    pub short_review_cap: f32,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            lexicon_path: "config/lexicon.json".to_string(),
            lookback: 3,
            trailing_clause_weight: 0.60,
            negation_factor: 0.5,
            min_modifier_factor: 0.25,
            max_modifier_factor: 2.25,
            neutral_soft_bias: 0.02,
            neutral_soft_weight: 0.05,
            behavior_penalty: 0.5,
            behavior_window: 4,
            short_review_tokens: 8,
            short_review_boost: 1.5,
            short_review_cap: 0.25,
        }
    }
}

/// Fusion weights and label thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    pub weight_phobert: f32,
    pub weight_rule: f32,
    /// |x| below this counts as "no opinion" for neutral dampening.
    pub neutral_band: f32,
    pub neutral_dampening: f32,
    /// Multiplier on the neural score when the rule engine found no evidence.
    pub phobert_only_damping: f32,
    pub positive_threshold: f32,
    pub negative_threshold: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weight_phobert: 0.30,
            weight_rule: 0.70,
            neutral_band: 0.15,
            neutral_dampening: 0.15,
            phobert_only_damping: 0.70,
            positive_threshold: 0.15,
            negative_threshold: -0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NeuralBackend {
    Http,
    Mock,
    Disabled,
}

/// Neural classifier adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NeuralConfig {
    pub backend: NeuralBackend,
    /// Text-classification endpoint (HF inference style JSON).
    pub endpoint: String,
    pub model: String,
    pub max_tokens: usize,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            backend: NeuralBackend::Disabled,
            endpoint: "http://127.0.0.1:8501/classify".to_string(),
            model: "wonrax/phobert-base-vietnamese-sentiment".to_string(),
            max_tokens: 256,
            timeout_ms: 1500,
            connect_timeout_ms: 500,
        }
    }
}

/// Content rule contributions and action thresholds for the spam gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpamConfig {
    pub too_short_tokens: usize,
    pub generic_max_tokens: usize,
    pub link_short_tokens: usize,
    pub repeated_run: usize,
    pub caps_min_letters: usize,
    pub caps_ratio: f32,
    pub emoji_ratio: f32,

    pub link_score: f32,
    pub phone_score: f32,
    pub ad_high_score: f32,
    pub ad_high_cap: f32,
    pub ad_medium_score: f32,
    pub ad_medium_cap: f32,
    pub too_short_score: f32,
    pub emoji_score: f32,
    pub repeated_score: f32,
    pub caps_score: f32,
    pub symbols_only_score: f32,
    pub duplicate_score: f32,
    pub near_duplicate_score: f32,
    pub same_destination_score: f32,

    pub near_duplicate_threshold: f32,
    pub memory_per_source: usize,
    pub duplicate_ttl_secs: i64,
    pub check_global_duplicates: bool,

    pub shadow_threshold: f32,
    pub pending_threshold: f32,
    pub block_threshold: f32,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            too_short_tokens: 3,
            generic_max_tokens: 3,
            link_short_tokens: 10,
            repeated_run: 5,
            caps_min_letters: 6,
            caps_ratio: 0.8,
            emoji_ratio: 0.6,

            link_score: 0.7,
            phone_score: 0.7,
            ad_high_score: 0.4,
            ad_high_cap: 0.8,
            ad_medium_score: 0.2,
            ad_medium_cap: 0.4,
            too_short_score: 0.2,
            emoji_score: 0.2,
            repeated_score: 0.2,
            caps_score: 0.1,
            symbols_only_score: 0.3,
            duplicate_score: 0.8,
            near_duplicate_score: 0.5,
            same_destination_score: 0.4,

            near_duplicate_threshold: 0.85,
            memory_per_source: 32,
            duplicate_ttl_secs: 24 * 3600,
            check_global_duplicates: true,

            shadow_threshold: 0.3,
            pending_threshold: 0.5,
            block_threshold: 0.8,
        }
    }
}

/// Per-source sliding window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_submissions: usize,
    pub window_secs: i64,
    /// How long an idle source entry survives after its last submission.
    pub retain_secs: i64,
    pub base_score: f32,
    pub step_score: f32,
    pub max_score: f32,
    /// Multiples of `max_submissions` that force pending / block.
    pub pending_multiplier: usize,
    pub block_multiplier: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_submissions: 5,
            window_secs: 3600,
            retain_secs: 24 * 3600,
            base_score: 0.15,
            step_score: 0.10,
            max_score: 0.6,
            pending_multiplier: 2,
            block_multiplier: 3,
        }
    }
}

/// Destination score weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregateConfig {
    pub weight_review: f32,
    pub weight_sentiment: f32,
    pub weight_popularity: f32,
    pub point_per_review: f32,
    pub default_score: f32,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            weight_review: 0.4,
            weight_sentiment: 0.3,
            weight_popularity: 0.3,
            point_per_review: 5.0,
            default_score: 50.0,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML file. A missing file is an error here; see [`PipelineConfig::load`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(data: &str) -> Result<Self, toml::de::Error> {
        let cfg: PipelineConfig = toml::from_str(data)?;
        Ok(cfg.sanitized())
    }

    /// Resolve the path from `PIPELINE_CONFIG_PATH` (or the default), load it, and
    /// apply env overrides. A missing file yields defaults; a broken file is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(ENV_PIPELINE_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_PIPELINE_CONFIG_PATH.to_string());
        let mut cfg = match Self::load_from_file(&path) {
            Ok(cfg) => {
                info!(target: "config", %path, "pipeline config loaded");
                cfg
            }
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                warn!(target: "config", %path, "pipeline config not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(p) = env::var(ENV_LEXICON_PATH) {
            if !p.trim().is_empty() {
                self.rules.lexicon_path = p;
            }
        }
        if env::var(ENV_NEURAL_TEST_MODE)
            .map(|v| v == "mock")
            .unwrap_or(false)
        {
            self.neural.backend = NeuralBackend::Mock;
        }
    }

    /// Clamp ranges and repair inconsistent pairs.
    pub fn sanitized(mut self) -> Self {
        let r = &mut self.rules;
        r.lookback = r.lookback.max(1);
        r.trailing_clause_weight = r.trailing_clause_weight.clamp(0.5, 1.0);
        r.negation_factor = r.negation_factor.clamp(0.0, 1.0);
        if r.min_modifier_factor > r.max_modifier_factor {
            std::mem::swap(&mut r.min_modifier_factor, &mut r.max_modifier_factor);
        }
        r.min_modifier_factor = r.min_modifier_factor.max(0.0);
        r.neutral_soft_bias = r.neutral_soft_bias.clamp(-0.1, 0.1);

        let f = &mut self.fusion;
        f.weight_phobert = f.weight_phobert.clamp(0.0, 1.0);
        f.weight_rule = f.weight_rule.clamp(0.0, 1.0);
        f.neutral_band = f.neutral_band.clamp(0.0, 1.0);
        f.neutral_dampening = f.neutral_dampening.clamp(0.0, 1.0);
        f.phobert_only_damping = f.phobert_only_damping.clamp(0.0, 1.0);
        if f.negative_threshold > f.positive_threshold {
            std::mem::swap(&mut f.negative_threshold, &mut f.positive_threshold);
        }

        let n = &mut self.neural;
        n.max_tokens = n.max_tokens.max(1);
        n.timeout_ms = n.timeout_ms.max(1);

        let s = &mut self.spam;
        s.near_duplicate_threshold = s.near_duplicate_threshold.clamp(0.0, 1.0);
        s.memory_per_source = s.memory_per_source.max(1);
        s.duplicate_ttl_secs = s.duplicate_ttl_secs.max(1);
        let mut t = [s.shadow_threshold, s.pending_threshold, s.block_threshold];
        t.sort_by(f32::total_cmp);
        s.shadow_threshold = t[0].clamp(0.0, 1.0);
        s.pending_threshold = t[1].clamp(0.0, 1.0);
        s.block_threshold = t[2].clamp(0.0, 1.0);

        let rl = &mut self.rate_limit;
        rl.max_submissions = rl.max_submissions.max(1);
        rl.window_secs = rl.window_secs.max(1);
        rl.retain_secs = rl.retain_secs.max(rl.window_secs);
        rl.pending_multiplier = rl.pending_multiplier.max(1);
        rl.block_multiplier = rl.block_multiplier.max(rl.pending_multiplier);

        let a = &mut self.aggregate;
        a.point_per_review = a.point_per_review.max(0.0);
        a.default_score = a.default_score.clamp(0.0, 100.0);

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert!((cfg.fusion.weight_rule - 0.70).abs() < 1e-6);
        assert_eq!(cfg.rate_limit.max_submissions, 5);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [fusion]
            weight_phobert = 0.5
            weight_rule = 0.5
            "#,
        )
        .unwrap();
        assert!((cfg.fusion.weight_phobert - 0.5).abs() < 1e-6);
        assert!((cfg.fusion.positive_threshold - 0.15).abs() < 1e-6);
        assert_eq!(cfg.neural.backend, NeuralBackend::Disabled);
    }

    #[test]
    fn inverted_thresholds_are_repaired() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [fusion]
            positive_threshold = -0.2
            negative_threshold = 0.2

            [spam]
            shadow_threshold = 0.9
            pending_threshold = 0.5
            block_threshold = 0.3
            "#,
        )
        .unwrap();
        assert!(cfg.fusion.negative_threshold < cfg.fusion.positive_threshold);
        assert!(cfg.spam.shadow_threshold <= cfg.spam.pending_threshold);
        assert!(cfg.spam.pending_threshold <= cfg.spam.block_threshold);
    }

    #[test]
    fn backend_parses_lowercase() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [neural]
            backend = "mock"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.neural.backend, NeuralBackend::Mock);
    }

    #[test]
    fn broken_toml_is_an_error() {
        assert!(PipelineConfig::from_toml_str("[fusion\nweight_rule = ").is_err());
    }
}
