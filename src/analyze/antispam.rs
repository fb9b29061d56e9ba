//! Spam / fake-review gate.
//!
//! Layers, evaluated in order:
//! 1. content rules on the text alone (length, ad markers, gibberish);
//! 2. memory rules (exact / near duplicates per source, global exact duplicates,
//!    repeat reviews of one destination);
//! 3. the per-source rate window.
//!
//! Contributions are added and clamped to [0, 1]. A link in a very short text and a
//! phone number next to a high-risk ad keyword are hard blocks (score 1.0). The rate
//! window may force a minimum action regardless of content.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use strsim::normalized_levenshtein;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyze::rate_limit::{Escalation, RateLimiter, RateState};
use crate::config::{RateLimitConfig, SpamConfig};
use crate::text;

static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(https?://|www\.|zalo\.me|t\.me/|bit\.ly|fb\.com|\b[a-z0-9-]+\.(com|net|org|vn|info|xyz|link|shop|store|io)\b|\b(shopee|lazada|tiki)\b)",
    )
    .expect("link regex")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d+])(?:\+84|84|0)(?:[ .\-]?\d){9,10}(?:[^\d]|$)").expect("phone regex")
});

const AD_HIGH: &[&str] = &[
    "liên hệ",
    "inbox",
    "zalo",
    "sđt",
    "sdt",
    "hotline",
    "gọi ngay",
    "nhắn tin",
    "kết bạn",
    "telegram",
    "đặt ngay",
];

const AD_MEDIUM: &[&str] = &[
    "giá rẻ",
    "giá rẻ nhất",
    "khuyến mãi",
    "free ship",
    "freeship",
    "giảm giá",
    "ưu đãi",
    "mua ngay",
    "tư vấn",
    "sale",
];

const GENERIC_WORDS: &[&str] = &[
    "ok", "oke", "okie", "đẹp", "tốt", "hay", "được", "ổn", "nice", "good", "great", "tuyệt",
    "ngon", "thích", "vui", "xịn",
];

/// Triggered rule, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamFlag {
    TooShort,
    GenericOnly,
    ContainsLink,
    ContainsPhone,
    AdKeywordsHigh,
    AdKeywordsMedium,
    RepeatedChars,
    AllCaps,
    SymbolsOnly,
    HighEmojiRatio,
    Duplicate,
    NearDuplicate,
    GlobalDuplicate,
    SameDestinationRecent,
    RateLimited,
}

impl SpamFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            SpamFlag::TooShort => "too_short",
            SpamFlag::GenericOnly => "generic_only",
            SpamFlag::ContainsLink => "contains_link",
            SpamFlag::ContainsPhone => "contains_phone",
            SpamFlag::AdKeywordsHigh => "ad_keywords_high",
            SpamFlag::AdKeywordsMedium => "ad_keywords_medium",
            SpamFlag::RepeatedChars => "repeated_chars",
            SpamFlag::AllCaps => "all_caps",
            SpamFlag::SymbolsOnly => "symbols_only",
            SpamFlag::HighEmojiRatio => "high_emoji_ratio",
            SpamFlag::Duplicate => "duplicate",
            SpamFlag::NearDuplicate => "near_duplicate",
            SpamFlag::GlobalDuplicate => "global_duplicate",
            SpamFlag::SameDestinationRecent => "same_destination_recent",
            SpamFlag::RateLimited => "rate_limited",
        }
    }

    /// Rule family: `low_quality`, `ad_spam`, `gibberish`, `duplicate` or `rate_limit`.
    pub fn category(self) -> &'static str {
        match self {
            SpamFlag::TooShort | SpamFlag::GenericOnly => "low_quality",
            SpamFlag::ContainsLink
            | SpamFlag::ContainsPhone
            | SpamFlag::AdKeywordsHigh
            | SpamFlag::AdKeywordsMedium => "ad_spam",
            SpamFlag::RepeatedChars
            | SpamFlag::AllCaps
            | SpamFlag::SymbolsOnly
            | SpamFlag::HighEmojiRatio => "gibberish",
            SpamFlag::Duplicate
            | SpamFlag::NearDuplicate
            | SpamFlag::GlobalDuplicate
            | SpamFlag::SameDestinationRecent => "duplicate",
            SpamFlag::RateLimited => "rate_limit",
        }
    }

    fn is_low_quality(self) -> bool {
        self.category() == "low_quality"
    }
}

/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpamAction {
    Allow,
    LowQuality,
    Shadow,
    Pending,
    Block,
}

impl SpamAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SpamAction::Allow => "allow",
            SpamAction::LowQuality => "low_quality",
            SpamAction::Shadow => "shadow",
            SpamAction::Pending => "pending",
            SpamAction::Block => "block",
        }
    }

    /// Whether the review is stored at all (possibly hidden or queued).
    pub fn admits(self) -> bool {
        self != SpamAction::Block
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamVerdict {
    pub action: SpamAction,
    pub spam_score: f32,
    pub flags: Vec<SpamFlag>,
}

impl SpamVerdict {
    pub fn has(&self, flag: SpamFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// One line for moderators, e.g. `BLOCKED (score 1.00) - contains_phone, ad_keywords_high`.
    pub fn summary(&self) -> String {
        let head = match self.action {
            SpamAction::Allow => "OK",
            SpamAction::LowQuality => "LOW QUALITY",
            SpamAction::Shadow => "SHADOWED",
            SpamAction::Pending => "PENDING REVIEW",
            SpamAction::Block => "BLOCKED",
        };
        if self.flags.is_empty() {
            return format!("{head} (score {:.2})", self.spam_score);
        }
        let flags: Vec<&str> = self.flags.iter().map(|f| f.as_str()).collect();
        format!("{head} (score {:.2}) - {}", self.spam_score, flags.join(", "))
    }
}

/// Flags and score from the text-only rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentCheck {
    pub flags: Vec<SpamFlag>,
    pub score: f32,
    pub hard_block: bool,
}

impl ContentCheck {
    fn add(&mut self, flag: SpamFlag, score: f32) {
        self.flags.push(flag);
        self.score += score;
    }
}

fn keyword_hits(padded: &str, list: &[&str]) -> usize {
    list.iter()
        .filter(|kw| padded.contains(&format!(" {kw} ")))
        .count()
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B00..=0x2BFF | 0xFE0F | 0x200D)
}

fn has_repeated_run(s: &str, run: usize) -> bool {
    let mut prev: Option<char> = None;
    let mut len = 0usize;
    for c in s.chars() {
        // Prices and phone numbers legitimately repeat digits.
        if c.is_whitespace() || c.is_ascii_digit() {
            prev = None;
            len = 0;
            continue;
        }
        if Some(c) == prev {
            len += 1;
        } else {
            prev = Some(c);
            len = 1;
        }
        if len >= run {
            return true;
        }
    }
    false
}

/// Text-only rules.
pub fn check_content(input: &str, cfg: &SpamConfig) -> ContentCheck {
    let mut out = ContentCheck::default();
    let key = text::dedup_key(input);
    let tokens: Vec<&str> = key.split_whitespace().collect();
    let n = tokens.len();
    let visible: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();

    if n < cfg.too_short_tokens {
        out.add(SpamFlag::TooShort, cfg.too_short_score);
    }
    if n > 0
        && n <= cfg.generic_max_tokens
        && tokens.iter().all(|t| GENERIC_WORDS.contains(t))
    {
        out.flags.push(SpamFlag::GenericOnly);
    }

    if LINK_RE.is_match(input) {
        out.add(SpamFlag::ContainsLink, cfg.link_score);
        if n < cfg.link_short_tokens {
            out.hard_block = true;
        }
    }
    let phone = PHONE_RE.is_match(input);
    if phone {
        out.add(SpamFlag::ContainsPhone, cfg.phone_score);
    }
    let padded = format!(" {key} ");
    let high = keyword_hits(&padded, AD_HIGH);
    if high > 0 {
        out.add(
            SpamFlag::AdKeywordsHigh,
            (cfg.ad_high_score * high as f32).min(cfg.ad_high_cap),
        );
        if phone {
            out.hard_block = true;
        }
    }
    let medium = keyword_hits(&padded, AD_MEDIUM);
    if medium > 0 {
        out.add(
            SpamFlag::AdKeywordsMedium,
            (cfg.ad_medium_score * medium as f32).min(cfg.ad_medium_cap),
        );
    }

    if has_repeated_run(input, cfg.repeated_run) {
        out.add(SpamFlag::RepeatedChars, cfg.repeated_score);
    }
    let letters: Vec<char> = input.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= cfg.caps_min_letters {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper as f32 / letters.len() as f32 >= cfg.caps_ratio {
            out.add(SpamFlag::AllCaps, cfg.caps_score);
        }
    }
    if n == 0 && !visible.is_empty() {
        out.add(SpamFlag::SymbolsOnly, cfg.symbols_only_score);
    }
    if !visible.is_empty() {
        let emoji = visible.iter().filter(|c| is_emoji(**c)).count();
        if emoji as f32 / visible.len() as f32 > cfg.emoji_ratio {
            out.add(SpamFlag::HighEmojiRatio, cfg.emoji_score);
        }
    }
    out
}

#[derive(Debug, Clone)]
struct SeenItem {
    ts: DateTime<Utc>,
    key: String,
}

#[derive(Debug, Default)]
struct Memory {
    per_source: HashMap<String, VecDeque<SeenItem>>,
    global: HashMap<String, (DateTime<Utc>, String)>,
    destinations: HashMap<(String, String), DateTime<Utc>>,
}

impl Memory {
    fn evict_old(&mut self, now: DateTime<Utc>, ttl: Duration) {
        for items in self.per_source.values_mut() {
            while let Some(front) = items.front() {
                if now - front.ts > ttl {
                    items.pop_front();
                } else {
                    break;
                }
            }
        }
        self.per_source.retain(|_, v| !v.is_empty());
        self.global.retain(|_, (ts, _)| now - *ts <= ttl);
        self.destinations.retain(|_, ts| now - *ts <= ttl);
    }
}

/// Stateful gate; shared across requests behind `&self`.
#[derive(Debug)]
pub struct SpamDetector {
    cfg: SpamConfig,
    limiter: RateLimiter,
    memory: Mutex<Memory>,
}

impl Default for SpamDetector {
    fn default() -> Self {
        Self::new(SpamConfig::default(), RateLimitConfig::default())
    }
}

impl SpamDetector {
    pub fn new(cfg: SpamConfig, rate: RateLimitConfig) -> Self {
        Self {
            cfg,
            limiter: RateLimiter::new(rate),
            memory: Mutex::new(Memory::default()),
        }
    }

    pub fn config(&self) -> &SpamConfig {
        &self.cfg
    }

    pub fn rate_state(&self, source_id: &str, now: DateTime<Utc>) -> RateState {
        self.limiter.state(source_id, now)
    }

    /// Forget all submission history: duplicate memory and rate windows.
    pub fn clear(&self) {
        *self.memory.lock().expect("spam memory mutex poisoned") = Memory::default();
        self.limiter.clear();
        info!(target: "spam", "spam memory and rate windows cleared");
    }

    /// Evaluate one submission and remember it.
    pub fn check(
        &self,
        input: &str,
        source_id: &str,
        destination_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> SpamVerdict {
        self.evaluate(input, source_id, destination_id, now, true)
    }

    /// Same verdict `check` would give right now, without recording the submission.
    pub fn preview(
        &self,
        input: &str,
        source_id: &str,
        destination_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> SpamVerdict {
        self.evaluate(input, source_id, destination_id, now, false)
    }

    fn evaluate(
        &self,
        input: &str,
        source_id: &str,
        destination_id: Option<&str>,
        now: DateTime<Utc>,
        commit: bool,
    ) -> SpamVerdict {
        let c = &self.cfg;
        let content = check_content(input, c);
        let mut flags = content.flags;
        let mut score = content.score;
        let hard_block = content.hard_block;

        let key = text::dedup_key(input);
        let ttl = Duration::seconds(c.duplicate_ttl_secs);
        {
            let mut mem = self.memory.lock().expect("spam memory mutex poisoned");
            mem.evict_old(now, ttl);

            if !key.is_empty() {
                let seen = mem.per_source.get(source_id);
                let exact = seen.is_some_and(|items| items.iter().any(|s| s.key == key));
                let near = !exact
                    && seen.is_some_and(|items| {
                        items.iter().any(|s| {
                            normalized_levenshtein(&s.key, &key) as f32
                                >= c.near_duplicate_threshold
                        })
                    });
                if exact {
                    flags.push(SpamFlag::Duplicate);
                    score += c.duplicate_score;
                } else if near {
                    flags.push(SpamFlag::NearDuplicate);
                    score += c.near_duplicate_score;
                }

                let digest = text::anon_hash(&key);
                if c.check_global_duplicates && !exact {
                    let other_source = mem
                        .global
                        .get(&digest)
                        .is_some_and(|(_, src)| src != source_id);
                    if other_source {
                        flags.push(SpamFlag::GlobalDuplicate);
                        score += c.near_duplicate_score;
                    }
                }

                if commit {
                    let items = mem.per_source.entry(source_id.to_string()).or_default();
                    if items.len() >= c.memory_per_source {
                        items.pop_front();
                    }
                    items.push_back(SeenItem {
                        ts: now,
                        key: key.clone(),
                    });
                    if c.check_global_duplicates {
                        mem.global.insert(digest, (now, source_id.to_string()));
                    }
                }
            }

            if let Some(dest) = destination_id {
                let k = (source_id.to_string(), dest.to_string());
                if mem.destinations.contains_key(&k) {
                    flags.push(SpamFlag::SameDestinationRecent);
                    score += c.same_destination_score;
                }
                if commit {
                    mem.destinations.insert(k, now);
                }
            }
        }

        let rate = if commit {
            self.limiter.record_and_check(source_id, now)
        } else {
            self.limiter.peek(source_id, now)
        };
        if rate.contribution > 0.0 {
            flags.push(SpamFlag::RateLimited);
            score += rate.contribution;
        }

        let mut score = if hard_block { 1.0 } else { score.clamp(0.0, 1.0) };
        let mut action = self.action_for(score, &flags);
        match rate.forced {
            Some(Escalation::Block) if action < SpamAction::Block => {
                action = SpamAction::Block;
                score = score.max(c.block_threshold);
            }
            Some(Escalation::Pending) if action < SpamAction::Pending => {
                action = SpamAction::Pending;
                score = score.max(c.pending_threshold);
            }
            _ => {}
        }

        counter!("spam_verdicts_total", "action" => action.as_str()).increment(1);
        let verdict = SpamVerdict {
            action,
            spam_score: score,
            flags,
        };
        if action >= SpamAction::Pending {
            info!(
                target: "spam",
                id = %text::anon_hash(input),
                source = %text::anon_hash(source_id),
                action = action.as_str(),
                score = verdict.spam_score,
                "review held or rejected"
            );
        } else {
            debug!(
                target: "spam",
                id = %text::anon_hash(input),
                summary = %verdict.summary(),
                "spam check"
            );
        }
        verdict
    }

    fn action_for(&self, score: f32, flags: &[SpamFlag]) -> SpamAction {
        let c = &self.cfg;
        if score >= c.block_threshold {
            SpamAction::Block
        } else if score >= c.pending_threshold {
            SpamAction::Pending
        } else if score >= c.shadow_threshold {
            SpamAction::Shadow
        } else if flags.iter().any(|f| f.is_low_quality()) {
            SpamAction::LowQuality
        } else {
            SpamAction::Allow
        }
    }
}
