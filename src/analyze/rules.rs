//! Rule-based sentiment analyzer.
//!
//! A linear scan over the token sequence:
//! 1. classify each position (contrast connective, sentiment phrase, modifier,
//!    neutral-soft word, plain word), longest phrase first;
//! 2. for every sentiment/soft hit, look back up to `lookback` tokens inside the same
//!    sentence for negations and scale modifiers (stopping at an earlier hit);
//! 3. add behavior-pattern penalties (`không ... quay lại`);
//! 4. sum hits per clause, weight the trailing clause, saturate with `tanh`;
//! 5. attach each hit to an aspect (its own term, else the nearest cue in the sentence)
//!    and average the per-sentence aspect sums.
//!
//! Keyword evidence lists carry the literal lexicon words found, by lexicon polarity,
//! not by the sign after negation.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::RuleConfig;
use crate::lexicon::{Lexicon, ModifierKind, Polarity};
use crate::text::{self, Token};

/// One scored term: the (token, effective polarity, magnitude) tuple of the scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermHit {
    pub term: String,
    pub polarity: Polarity,
    pub magnitude: f32,
    pub negated: bool,
    pub clause: usize,
    pub sentence: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect: Option<String>,
}

impl TermHit {
    pub fn signed(&self) -> f32 {
        self.polarity.sign() * self.magnitude
    }
}

/// Output of the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleAnalysis {
    /// Bounded score in [-1, 1].
    pub score: f32,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub hits: Vec<TermHit>,
    pub clause_scores: Vec<f32>,
    /// Aspect id → `tanh` of the mean per-sentence sum, in [-1, 1].
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aspects: BTreeMap<String, f32>,
    pub token_count: usize,
    pub sarcasm_risk: bool,
    /// No tokens, or tokens without any lexicon evidence.
    pub low_confidence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_processing: Option<&'static str>,
}

impl RuleAnalysis {
    /// Neutral result for input without a single word token.
    pub fn empty() -> Self {
        Self {
            score: 0.0,
            positive_keywords: Vec::new(),
            negative_keywords: Vec::new(),
            hits: Vec::new(),
            clause_scores: Vec::new(),
            aspects: BTreeMap::new(),
            token_count: 0,
            sarcasm_risk: false,
            low_confidence: true,
            post_processing: None,
        }
    }

    pub fn has_evidence(&self) -> bool {
        !self.hits.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Word,
    Contrast,
    /// Start of a sentiment phrase: (entry index, token length).
    Sentiment(usize, usize),
    /// Continuation token of a sentiment phrase.
    Covered,
    Modifier { kind: ModifierKind, start: usize },
    Soft,
}

impl Slot {
    fn is_hit(self) -> bool {
        matches!(self, Slot::Sentiment(..) | Slot::Covered | Slot::Soft)
    }
}

fn phrase_at(tokens: &[Token], i: usize, phrase: &[String]) -> bool {
    let end = i + phrase.len();
    if phrase.is_empty() || end > tokens.len() {
        return false;
    }
    let sentence = tokens[i].sentence;
    tokens[i..end]
        .iter()
        .zip(phrase)
        .all(|(t, p)| t.sentence == sentence && t.text == *p)
}

/// Stateless analyzer; the lexicon is passed per call so reloads apply immediately.
#[derive(Debug, Clone, Default)]
pub struct RuleAnalyzer {
    cfg: RuleConfig,
}

impl RuleAnalyzer {
    pub fn new(cfg: RuleConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.cfg
    }

    pub fn analyze(&self, lexicon: &Lexicon, input: &str) -> RuleAnalysis {
        let normalized = text::normalize(input);
        let tokens = text::tokenize(&normalized, lexicon.slang());
        if tokens.is_empty() {
            return RuleAnalysis::empty();
        }

        let slots = classify(lexicon, &tokens);
        let clause_of = clause_indices(&tokens, &slots);
        let cues = aspect_spans(lexicon, &tokens);
        let clause_count = clause_of.last().map(|c| c + 1).unwrap_or(1);

        let mut hits = Vec::new();
        let mut positive_keywords = Vec::new();
        let mut negative_keywords = Vec::new();
        let mut soft_matched = false;

        for (i, slot) in slots.iter().enumerate() {
            let (term, lex_polarity, base, len) = match *slot {
                Slot::Sentiment(idx, len) => {
                    let entry = &lexicon.sentiment_entries()[idx];
                    debug_assert_eq!(entry.tokens.len(), len);
                    (entry.text.clone(), entry.polarity, entry.weight, len)
                }
                Slot::Soft => {
                    soft_matched = true;
                    (
                        tokens[i].text.clone(),
                        Polarity::Positive,
                        self.cfg.neutral_soft_weight,
                        1,
                    )
                }
                _ => continue,
            };

            let (negated, factor) = self.modifiers_before(&tokens, &slots, i);
            let mut magnitude = (base * factor).min(1.0);
            let mut polarity = lex_polarity;
            if negated {
                polarity = match lex_polarity {
                    Polarity::Positive => Polarity::Negative,
                    Polarity::Negative => Polarity::Positive,
                };
                // A negated soft word keeps its small weight: "không ổn" is mildly negative.
                if *slot != Slot::Soft {
                    magnitude *= self.cfg.negation_factor;
                }
            }

            match lex_polarity {
                Polarity::Positive => push_unique(&mut positive_keywords, &term),
                Polarity::Negative => push_unique(&mut negative_keywords, &term),
            }
            hits.push(TermHit {
                polarity,
                magnitude,
                negated,
                clause: clause_of[i],
                sentence: tokens[i].sentence,
                aspect: aspect_for(lexicon, &term, i, i + len, &tokens, &cues),
                term,
            });
        }

        for (term, start, end) in self.behavior_hits(lexicon, &tokens) {
            push_unique(&mut negative_keywords, &term);
            hits.push(TermHit {
                polarity: Polarity::Negative,
                magnitude: self.cfg.behavior_penalty,
                negated: false,
                clause: clause_of[end],
                sentence: tokens[end].sentence,
                aspect: aspect_for(lexicon, &term, start, end + 1, &tokens, &cues),
                term,
            });
        }

        // Raw per-clause sums; a clause made only of connectives has no tokens.
        let mut raw = vec![0.0f32; clause_count];
        let mut populated = vec![false; clause_count];
        for (i, slot) in slots.iter().enumerate() {
            if *slot != Slot::Contrast {
                populated[clause_of[i]] = true;
            }
        }
        for h in &hits {
            raw[h.clause] += h.signed();
        }
        let clause_scores: Vec<f32> = raw
            .iter()
            .zip(&populated)
            .filter(|(_, p)| **p)
            .map(|(r, _)| *r)
            .collect();
        let combined = self.weigh_clauses(&clause_scores);
        let aspects = aspect_scores(&hits);

        let sarcasm_risk = tokens.iter().any(|t| lexicon.is_sarcasm_word(&t.text))
            || lexicon.has_sarcasm_symbol(&normalized);

        let mut result = RuleAnalysis {
            score: combined.tanh().clamp(-1.0, 1.0),
            positive_keywords,
            negative_keywords,
            hits,
            clause_scores,
            aspects,
            token_count: tokens.len(),
            sarcasm_risk,
            low_confidence: false,
            post_processing: None,
        };

        if !result.has_evidence() {
            result.score = self.cfg.neutral_soft_bias;
            result.low_confidence = true;
        } else if soft_matched
            && result.token_count < self.cfg.short_review_tokens
            && result.score > 0.0
            && result.score < 0.15
        {
            result.score = (result.score * self.cfg.short_review_boost)
                .min(self.cfg.short_review_cap);
            result.post_processing = Some("short_review_boost");
        }

        debug!(
            target: "rules",
            id = %text::anon_hash(input),
            score = result.score,
            hits = result.hits.len(),
            clauses = result.clause_scores.len(),
            "rule analysis"
        );
        result
    }

    /// Negation parity and composite scale factor from the lookback window.
    fn modifiers_before(&self, tokens: &[Token], slots: &[Slot], i: usize) -> (bool, f32) {
        let sentence = tokens[i].sentence;
        let lo = i.saturating_sub(self.cfg.lookback);
        let mut negated = false;
        let mut factor = 1.0f32;
        let mut last_span: Option<usize> = None;

        for j in (lo..i).rev() {
            if tokens[j].sentence != sentence {
                break;
            }
            match slots[j] {
                s if s.is_hit() => break,
                Slot::Contrast => break,
                Slot::Modifier { kind, start } => {
                    if last_span == Some(start) {
                        continue;
                    }
                    last_span = Some(start);
                    match kind {
                        ModifierKind::Negation => negated = !negated,
                        ModifierKind::Scale(f) => factor *= f,
                    }
                }
                _ => {}
            }
        }
        let factor = factor.clamp(self.cfg.min_modifier_factor, self.cfg.max_modifier_factor);
        (negated, factor)
    }

    /// `(literal evidence, first token, last token)` for each behavior-pattern match.
    fn behavior_hits(&self, lexicon: &Lexicon, tokens: &[Token]) -> Vec<(String, usize, usize)> {
        let mut out = Vec::new();
        let mut used_ends: Vec<usize> = Vec::new();
        for pattern in lexicon.behavior_patterns() {
            for i in 0..tokens.len() {
                if !phrase_at(tokens, i, &pattern.first) {
                    continue;
                }
                let after = i + pattern.first.len();
                let latest = (after + self.cfg.behavior_window).min(tokens.len());
                for k in after..latest {
                    if !phrase_at(tokens, k, &pattern.second) {
                        continue;
                    }
                    let end = k + pattern.second.len() - 1;
                    if !used_ends.contains(&end) {
                        used_ends.push(end);
                        let literal = tokens[i..=end]
                            .iter()
                            .map(|t| t.text.as_str())
                            .collect::<Vec<_>>()
                            .join(" ");
                        out.push((literal, i, end));
                    }
                    break;
                }
            }
        }
        out
    }

    /// Trailing clause gets `trailing_clause_weight`, leading clauses share the rest.
    fn weigh_clauses(&self, clause_scores: &[f32]) -> f32 {
        let Some((last, leading)) = clause_scores.split_last() else {
            return 0.0;
        };
        if leading.is_empty() {
            return *last;
        }
        let tw = self.cfg.trailing_clause_weight;
        let lead_w = (1.0 - tw) / leading.len() as f32;
        leading.iter().map(|s| s * lead_w).sum::<f32>() + last * tw
    }
}

fn classify(lexicon: &Lexicon, tokens: &[Token]) -> Vec<Slot> {
    let mut slots = vec![Slot::Word; tokens.len()];
    let mut i = 0;
    while i < tokens.len() {
        if let Some(c) = lexicon
            .contrast_phrases()
            .iter()
            .find(|c| phrase_at(tokens, i, c))
        {
            for s in &mut slots[i..i + c.len()] {
                *s = Slot::Contrast;
            }
            i += c.len();
            continue;
        }
        if let Some((idx, e)) = lexicon
            .sentiment_entries()
            .iter()
            .enumerate()
            .find(|(_, e)| phrase_at(tokens, i, &e.tokens))
        {
            let len = e.tokens.len();
            slots[i] = Slot::Sentiment(idx, len);
            for s in &mut slots[i + 1..i + len] {
                *s = Slot::Covered;
            }
            i += len;
            continue;
        }
        if let Some(m) = lexicon
            .modifiers()
            .iter()
            .find(|m| phrase_at(tokens, i, &m.tokens))
        {
            let start = i;
            for s in &mut slots[i..i + m.tokens.len()] {
                *s = Slot::Modifier {
                    kind: m.kind,
                    start,
                };
            }
            i += m.tokens.len();
            continue;
        }
        if lexicon.is_neutral_soft(&tokens[i].text) {
            slots[i] = Slot::Soft;
        }
        i += 1;
    }
    slots
}

/// Clause index per token; a contrast connective opens the next clause.
///
/// A connective that opens the review (`mặc dù phòng đẹp, dịch vụ tệ`) is concessive:
/// its clause ends at the first sentence break, where the main clause starts.
fn clause_indices(tokens: &[Token], slots: &[Slot]) -> Vec<usize> {
    let mut out = Vec::with_capacity(slots.len());
    let mut clause = 0usize;
    let mut prev_contrast = false;
    let mut concessive_open = false;
    for (i, slot) in slots.iter().enumerate() {
        let is_contrast = *slot == Slot::Contrast;
        let sentence_start = i > 0 && tokens[i].sentence != tokens[i - 1].sentence;
        if concessive_open && sentence_start && !is_contrast {
            clause += 1;
            concessive_open = false;
        }
        if is_contrast && !prev_contrast {
            clause += 1;
            concessive_open = i == 0;
        }
        prev_contrast = is_contrast;
        out.push(clause);
    }
    out
}

/// `(start, end, aspect)` of every aspect cue, longest phrase first, non-overlapping.
fn aspect_spans<'a>(lexicon: &'a Lexicon, tokens: &[Token]) -> Vec<(usize, usize, &'a str)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match lexicon
            .aspect_cues()
            .iter()
            .find(|a| phrase_at(tokens, i, &a.tokens))
        {
            Some(a) => {
                out.push((i, i + a.tokens.len(), a.aspect.as_str()));
                i += a.tokens.len();
            }
            None => i += 1,
        }
    }
    out
}

/// Aspect of the hit covering `start..end`: the term's own aspect, else the closest cue
/// in the same sentence. On equal distance the cue before the hit wins.
fn aspect_for(
    lexicon: &Lexicon,
    term: &str,
    start: usize,
    end: usize,
    tokens: &[Token],
    cues: &[(usize, usize, &str)],
) -> Option<String> {
    if let Some(a) = lexicon.aspect_of(term) {
        return Some(a.to_string());
    }
    let sentence = tokens[start].sentence;
    cues.iter()
        .filter(|(s, e, _)| tokens[*s].sentence == sentence && (*e <= start || *s >= end))
        .min_by_key(|(s, e, _)| {
            if *e <= start {
                (start - e, 0)
            } else {
                (s - end, 1)
            }
        })
        .map(|(_, _, a)| a.to_string())
}

/// Sum signed hits per (aspect, sentence), average over sentences, saturate.
fn aspect_scores(hits: &[TermHit]) -> BTreeMap<String, f32> {
    let mut per_sentence: BTreeMap<(&str, usize), f32> = BTreeMap::new();
    for h in hits {
        if let Some(a) = &h.aspect {
            *per_sentence.entry((a.as_str(), h.sentence)).or_default() += h.signed();
        }
    }
    let mut totals: BTreeMap<&str, (f32, usize)> = BTreeMap::new();
    for ((aspect, _), sum) in per_sentence {
        let t = totals.entry(aspect).or_default();
        t.0 += sum;
        t.1 += 1;
    }
    totals
        .into_iter()
        .map(|(aspect, (sum, n))| {
            let mean = sum / n as f32;
            (aspect.to_string(), mean.tanh().clamp(-1.0, 1.0))
        })
        .collect()
}

fn push_unique(list: &mut Vec<String>, term: &str) {
    if !list.iter().any(|t| t == term) {
        list.push(term.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str) -> RuleAnalysis {
        RuleAnalyzer::default().analyze(&Lexicon::builtin(), text)
    }

    #[test]
    fn single_positive_word() {
        let r = run("tốt");
        assert!((r.score - 0.6f32.tanh()).abs() < 1e-5);
        assert_eq!(r.positive_keywords, vec!["tốt"]);
        assert!(!r.low_confidence);
    }

    #[test]
    fn negation_flips_and_halves() {
        let r = run("không tệ");
        assert!(r.score > 0.15, "got {}", r.score);
        assert!(r.score < run("tốt").score);
        // Evidence keeps the lexicon polarity.
        assert_eq!(r.negative_keywords, vec!["tệ"]);
        assert!(r.positive_keywords.is_empty());
        assert!(r.hits[0].negated);
        assert_eq!(r.hits[0].polarity, Polarity::Positive);
    }

    #[test]
    fn negated_positive_turns_negative() {
        let r = run("phòng không sạch sẽ");
        assert!(r.score < 0.0);
        assert_eq!(r.positive_keywords, vec!["sạch sẽ"]);
    }

    #[test]
    fn intensifier_and_downtoner_scale_magnitude() {
        let plain = run("đẹp").score;
        assert!(run("rất đẹp").score > plain);
        assert!(run("hơi đẹp").score < plain);
        assert!(run("hơi đẹp").score > 0.0);
    }

    #[test]
    fn multiword_modifier_counts_once() {
        let hits = run("cực kỳ đẹp").hits;
        assert_eq!(hits.len(), 1);
        assert!((hits[0].magnitude - (0.6f32 * 1.8).min(1.0)).abs() < 1e-5);
    }

    #[test]
    fn lookback_stops_at_sentence_break_and_previous_hit() {
        // The comma ends the sentence holding the negation.
        assert!(run("không, tốt").score > 0.0);
        // "sạch" is not negated through "đẹp".
        let r = run("không đẹp và sạch");
        let sach = r.hits.iter().find(|h| h.term == "sạch").unwrap();
        assert!(!sach.negated);
    }

    #[test]
    fn lookback_window_is_bounded() {
        let r = run("không bao giờ thấy nơi nào tốt");
        assert!(!r.hits[0].negated);
    }

    #[test]
    fn trailing_clause_dominates() {
        let alone = run("đẹp").score;
        let contrasted = run("đẹp nhưng xa trung tâm").score;
        assert!(contrasted < alone);
        assert_eq!(run("đẹp nhưng xa trung tâm").clause_scores.len(), 2);
        assert!(run("xa trung tâm nhưng rất đẹp").score > 0.15);
    }

    #[test]
    fn leading_concessive_closes_at_sentence_break() {
        let concessive = run("Mặc dù phòng đẹp, dịch vụ tệ");
        let contrasted = run("phòng đẹp nhưng dịch vụ tệ");
        assert_eq!(concessive.clause_scores.len(), 2);
        assert!(concessive.score < -0.15, "got {}", concessive.score);
        assert!((concessive.score - contrasted.score).abs() < 1e-6);
        assert!((concessive.score - (0.4f32 * 0.6 - 0.6 * 0.7).tanh()).abs() < 1e-5);
    }

    #[test]
    fn mid_review_connective_is_not_concessive() {
        let r = run("đẹp, nhưng đắt. phục vụ tốt");
        assert_eq!(r.clause_scores.len(), 2);
    }

    #[test]
    fn dangling_connective_falls_back_to_leading_clause() {
        let lead = run("phòng đẹp").score;
        let dangling = run("phòng đẹp nhưng");
        assert!((dangling.score - lead).abs() < 1e-6);
        assert_eq!(dangling.clause_scores.len(), 1);
    }

    #[test]
    fn behavior_pattern_records_literal_span() {
        let r = run("Dịch vụ tệ, nhân viên thái độ kém, không bao giờ quay lại");
        assert!(r.score < -0.15);
        assert!(r.negative_keywords.contains(&"không bao giờ quay lại".to_string()));
        assert!(r.negative_keywords.contains(&"tệ".to_string()));
        assert!(r.negative_keywords.contains(&"kém".to_string()));
    }

    #[test]
    fn score_is_saturated() {
        let text = "tuyệt vời ".repeat(40);
        let r = run(&text);
        assert!(r.score <= 1.0 && r.score > 0.99);
        assert_eq!(r.positive_keywords, vec!["tuyệt vời"]);
    }

    #[test]
    fn emoji_only_is_low_confidence_neutral() {
        let r = run("😍😍😍 !!!");
        assert_eq!(r.score, 0.0);
        assert!(r.low_confidence);
        assert_eq!(r.token_count, 0);
    }

    #[test]
    fn no_match_gets_soft_bias() {
        let r = run("chúng tôi đi hôm qua");
        assert!(r.low_confidence);
        assert!(r.score > 0.0 && r.score < 0.05);
    }

    #[test]
    fn short_soft_review_is_boosted() {
        let r = run("ok");
        assert_eq!(r.post_processing, Some("short_review_boost"));
        assert!(r.score > 0.05f32.tanh());
        assert!(r.score <= 0.25);
    }

    #[test]
    fn negated_soft_word_is_mildly_negative() {
        let r = run("không ok");
        assert!((r.score - (-0.05f32).tanh()).abs() < 1e-5, "got {}", r.score);
        assert!(r.hits[0].negated);
        assert_eq!(r.hits[0].polarity, Polarity::Negative);
        assert!((r.hits[0].magnitude - 0.05).abs() < 1e-6);
        assert_eq!(r.post_processing, None);
    }

    #[test]
    fn aspects_follow_their_own_terms() {
        let r = run("Phòng sạch sẽ, nhân viên thân thiện nhưng đồ ăn hơi đắt");
        assert!(r.aspects["cleanliness"] > 0.0);
        assert!(r.aspects["service"] > 0.0);
        assert!(r.aspects["price"] < 0.0);
        assert!((r.aspects["cleanliness"] - 0.6f32.tanh()).abs() < 1e-5);
    }

    #[test]
    fn aspects_fall_back_to_nearby_cues() {
        let r = run("Dịch vụ tệ, phòng đẹp");
        assert!((r.aspects["service"] - (-0.7f32).tanh()).abs() < 1e-5);
        assert!((r.aspects["room"] - 0.6f32.tanh()).abs() < 1e-5);
        let tot = r.hits.iter().find(|h| h.term == "tệ").unwrap();
        assert_eq!(tot.aspect.as_deref(), Some("service"));
    }

    #[test]
    fn aspect_score_averages_over_sentences() {
        let r = run("Đồ ăn ngon. Đồ ăn tệ");
        assert_eq!(r.aspects.len(), 1);
        assert!((r.aspects["food"] - (-0.05f32).tanh()).abs() < 1e-5);
    }

    #[test]
    fn review_without_cues_has_no_aspects() {
        assert!(run("tuyệt vời").aspects.is_empty());
        assert!(run("chúng tôi đi hôm qua").aspects.is_empty());
    }

    #[test]
    fn slang_negation_is_understood() {
        assert!(run("ko tệ").score > 0.0);
    }

    #[test]
    fn sarcasm_marker_is_flagged() {
        assert!(run("đẹp ghê haha").sarcasm_risk);
        assert!(run("tuyệt thật :))").sarcasm_risk);
        assert!(!run("tuyệt thật").sarcasm_risk);
    }
}
