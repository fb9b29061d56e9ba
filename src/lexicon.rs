//! # Lexicon Store
//!
//! Categorised word lists used by the rule engine: positive/negative words with
//! weights, intensifiers and downtoners with scale factors, negation markers,
//! contrast connectives, sarcasm markers, neutral-soft words, behavior patterns,
//! aspect cue phrases and a teencode/slang map.
//!
//! - Loaded once from a JSON resource (`config/lexicon.json`).
//! - A missing or unreadable file, or one without any sentiment words, falls back
//!   to the built-in `builtin_seed()`; this is never fatal.
//! - A file that exists but cannot be parsed is reported as [`LexiconError::Corrupt`]
//!   so the process can fail fast before serving traffic.
//! - Categories missing from a valid file are filled from the seed.
//! - No mutation at runtime except an explicit [`LexiconStore::reload`].

use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use tracing::{info, warn};

use crate::error::LexiconError;

pub const DEFAULT_INTENSIFIER_FACTOR: f32 = 1.5;
pub const DEFAULT_DOWNTONER_FACTOR: f32 = 0.5;

/// On-disk shape of the lexicon resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LexiconFile {
    /// Word → magnitude (sign is ignored; polarity comes from the category).
    pub positive: HashMap<String, f32>,
    pub negative: HashMap<String, f32>,
    /// Word → factor. A factor of 0 means "use the category default".
    pub intensifiers: HashMap<String, f32>,
    pub downtoners: HashMap<String, f32>,
    pub negations: Vec<String>,
    pub contrast: Vec<String>,
    pub sarcasm: Vec<String>,
    pub neutral_soft: Vec<String>,
    /// Ordered pairs `[first, second]`.
    pub behavior_patterns: Vec<[String; 2]>,
    pub slang: HashMap<String, String>,
    /// Aspect id → cue phrases (`"service": ["nhân viên", "phục vụ"]`).
    pub aspects: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn sign(self) -> f32 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }
}

/// A sentiment-bearing word or phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentEntry {
    pub text: String,
    pub tokens: Vec<String>,
    pub polarity: Polarity,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModifierKind {
    Negation,
    /// Multiplicative magnitude factor (>1 intensifies, <1 weakens).
    Scale(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModifierEntry {
    pub tokens: Vec<String>,
    pub kind: ModifierKind,
}

/// Cue phrase naming a review aspect (service, price, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct AspectEntry {
    pub aspect: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorPattern {
    pub first: Vec<String>,
    pub second: Vec<String>,
}

/// Compiled lexicon. Phrase lists are sorted longest-first for greedy matching.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexicon {
    sentiment: Vec<SentimentEntry>,
    modifiers: Vec<ModifierEntry>,
    contrast: Vec<Vec<String>>,
    neutral_soft: HashSet<String>,
    sarcasm_words: HashSet<String>,
    sarcasm_symbols: Vec<String>,
    behavior: Vec<BehaviorPattern>,
    slang: Vec<(String, String)>,
    aspects: Vec<AspectEntry>,
}

fn phrase_tokens(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn longest_first<T>(v: &mut [T], len: impl Fn(&T) -> usize) {
    // Stable: ties keep their (sorted) insertion order.
    v.sort_by_key(|x| std::cmp::Reverse(len(x)));
}

impl Lexicon {
    pub fn compile(file: LexiconFile) -> Self {
        let mut sentiment = Vec::new();
        for (polarity, map) in [
            (Polarity::Positive, &file.positive),
            (Polarity::Negative, &file.negative),
        ] {
            let mut words: Vec<(&String, &f32)> = map.iter().collect();
            words.sort_by(|a, b| a.0.cmp(b.0));
            for (w, weight) in words {
                let tokens = phrase_tokens(w);
                if tokens.is_empty() {
                    continue;
                }
                sentiment.push(SentimentEntry {
                    text: tokens.join(" "),
                    tokens,
                    polarity,
                    weight: weight.abs().min(1.0),
                });
            }
        }
        longest_first(&mut sentiment, |e| e.tokens.len());

        let mut modifiers = Vec::new();
        let mut negations = file.negations.clone();
        negations.sort();
        for n in &negations {
            let tokens = phrase_tokens(n);
            if !tokens.is_empty() {
                modifiers.push(ModifierEntry {
                    tokens,
                    kind: ModifierKind::Negation,
                });
            }
        }
        for (map, default) in [
            (&file.intensifiers, DEFAULT_INTENSIFIER_FACTOR),
            (&file.downtoners, DEFAULT_DOWNTONER_FACTOR),
        ] {
            let mut words: Vec<(&String, &f32)> = map.iter().collect();
            words.sort_by(|a, b| a.0.cmp(b.0));
            for (w, factor) in words {
                let tokens = phrase_tokens(w);
                if tokens.is_empty() {
                    continue;
                }
                let f = if *factor > 0.0 { *factor } else { default };
                modifiers.push(ModifierEntry {
                    tokens,
                    kind: ModifierKind::Scale(f),
                });
            }
        }
        longest_first(&mut modifiers, |m| m.tokens.len());

        let mut contrast: Vec<Vec<String>> = file
            .contrast
            .iter()
            .map(|c| phrase_tokens(c))
            .filter(|t| !t.is_empty())
            .collect();
        contrast.sort();
        longest_first(&mut contrast, |c| c.len());

        let mut sarcasm_words = HashSet::new();
        let mut sarcasm_symbols = Vec::new();
        for s in &file.sarcasm {
            let lc = s.to_lowercase();
            if !lc.is_empty() && lc.chars().all(char::is_alphanumeric) {
                sarcasm_words.insert(lc);
            } else if !lc.trim().is_empty() {
                sarcasm_symbols.push(lc);
            }
        }

        let behavior = file
            .behavior_patterns
            .iter()
            .map(|[a, b]| BehaviorPattern {
                first: phrase_tokens(a),
                second: phrase_tokens(b),
            })
            .filter(|p| !p.first.is_empty() && !p.second.is_empty())
            .collect();

        let mut slang: Vec<(String, String)> = file
            .slang
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .filter(|(k, _)| !k.trim().is_empty())
            .collect();
        slang.sort();
        longest_first(&mut slang, |(k, _)| k.chars().count());

        let mut aspects: Vec<AspectEntry> = file
            .aspects
            .iter()
            .flat_map(|(aspect, cues)| {
                cues.iter().map(move |c| AspectEntry {
                    aspect: aspect.to_lowercase(),
                    tokens: phrase_tokens(c),
                })
            })
            .filter(|a| !a.tokens.is_empty())
            .collect();
        aspects.sort_by(|a, b| a.tokens.cmp(&b.tokens).then_with(|| a.aspect.cmp(&b.aspect)));
        aspects.dedup_by(|a, b| a.tokens == b.tokens);
        longest_first(&mut aspects, |a| a.tokens.len());

        Self {
            sentiment,
            modifiers,
            contrast,
            neutral_soft: file.neutral_soft.iter().map(|w| w.to_lowercase()).collect(),
            sarcasm_words,
            sarcasm_symbols,
            behavior,
            slang,
            aspects,
        }
    }

    pub fn builtin() -> Self {
        Self::compile(builtin_seed())
    }

    pub fn sentiment_entries(&self) -> &[SentimentEntry] {
        &self.sentiment
    }

    pub fn modifiers(&self) -> &[ModifierEntry] {
        &self.modifiers
    }

    pub fn contrast_phrases(&self) -> &[Vec<String>] {
        &self.contrast
    }

    pub fn behavior_patterns(&self) -> &[BehaviorPattern] {
        &self.behavior
    }

    pub fn slang(&self) -> &[(String, String)] {
        &self.slang
    }

    pub fn aspect_cues(&self) -> &[AspectEntry] {
        &self.aspects
    }

    /// Aspect named by an exact (normalised) phrase.
    pub fn aspect_of(&self, phrase: &str) -> Option<&str> {
        let p = phrase_tokens(phrase);
        self.aspects
            .iter()
            .find(|a| a.tokens == p)
            .map(|a| a.aspect.as_str())
    }

    pub fn is_neutral_soft(&self, token: &str) -> bool {
        self.neutral_soft.contains(token)
    }

    pub fn is_sarcasm_word(&self, token: &str) -> bool {
        self.sarcasm_words.contains(token)
    }

    /// True if any symbol marker (`:))`, emoji) appears in the normalised text.
    pub fn has_sarcasm_symbol(&self, normalized: &str) -> bool {
        self.sarcasm_symbols.iter().any(|s| normalized.contains(s.as_str()))
    }

    /// Weight lookup by exact (normalised) phrase text.
    pub fn weight_of(&self, phrase: &str) -> Option<(Polarity, f32)> {
        let p = phrase_tokens(phrase).join(" ");
        self.sentiment
            .iter()
            .find(|e| e.text == p)
            .map(|e| (e.polarity, e.weight))
    }
}

/// Where the active lexicon came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexiconSource {
    File(PathBuf),
    Builtin,
}

#[derive(Debug)]
struct State {
    lexicon: Arc<Lexicon>,
    source: LexiconSource,
}

/// Shared, read-mostly holder of the active lexicon.
#[derive(Debug)]
pub struct LexiconStore {
    path: Option<PathBuf>,
    inner: RwLock<State>,
}

impl LexiconStore {
    /// Store backed only by the built-in seed.
    pub fn builtin() -> Self {
        Self {
            path: None,
            inner: RwLock::new(State {
                lexicon: Arc::new(Lexicon::builtin()),
                source: LexiconSource::Builtin,
            }),
        }
    }

    pub fn from_lexicon(lexicon: Lexicon) -> Self {
        Self {
            path: None,
            inner: RwLock::new(State {
                lexicon: Arc::new(lexicon),
                source: LexiconSource::Builtin,
            }),
        }
    }

    /// Load from `path`, falling back to the seed unless the file is corrupt.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LexiconError> {
        let path = path.as_ref().to_path_buf();
        let (lexicon, source) = match read_lexicon_file(&path) {
            Ok(lex) => {
                info!(target: "lexicon", path = %path.display(), "lexicon loaded");
                (lex, LexiconSource::File(path.clone()))
            }
            Err(e @ LexiconError::Corrupt { .. }) => return Err(e),
            Err(e) => {
                warn!(target: "lexicon", error = %e, "falling back to built-in lexicon");
                (Lexicon::builtin(), LexiconSource::Builtin)
            }
        };
        Ok(Self {
            path: Some(path),
            inner: RwLock::new(State {
                lexicon: Arc::new(lexicon),
                source,
            }),
        })
    }

    /// Snapshot of the active lexicon; cheap to clone and safe to hold across calls.
    pub fn current(&self) -> Arc<Lexicon> {
        self.inner
            .read()
            .expect("lexicon lock poisoned")
            .lexicon
            .clone()
    }

    pub fn source(&self) -> LexiconSource {
        self.inner
            .read()
            .expect("lexicon lock poisoned")
            .source
            .clone()
    }

    /// Re-read the backing file. On any error the active lexicon is kept.
    pub fn reload(&self) -> Result<(), LexiconError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let lex = read_lexicon_file(path)?;
        let mut guard = self.inner.write().expect("lexicon lock poisoned");
        guard.lexicon = Arc::new(lex);
        guard.source = LexiconSource::File(path.clone());
        info!(target: "lexicon", path = %path.display(), "lexicon reloaded");
        Ok(())
    }
}

/// Read and compile a lexicon file. Public for tools/tests.
pub fn read_lexicon_file(path: &Path) -> Result<Lexicon, LexiconError> {
    let bytes = fs::read(path).map_err(|source| LexiconError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file: LexiconFile =
        serde_json::from_slice(&bytes).map_err(|source| LexiconError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    if file.positive.is_empty() && file.negative.is_empty() {
        return Err(LexiconError::Empty {
            path: path.to_path_buf(),
        });
    }
    fill_missing_from_seed(&mut file);
    Ok(Lexicon::compile(file))
}

fn fill_missing_from_seed(file: &mut LexiconFile) {
    let seed = builtin_seed();
    if file.positive.is_empty() {
        file.positive = seed.positive;
    }
    if file.negative.is_empty() {
        file.negative = seed.negative;
    }
    if file.intensifiers.is_empty() {
        file.intensifiers = seed.intensifiers;
    }
    if file.downtoners.is_empty() {
        file.downtoners = seed.downtoners;
    }
    if file.negations.is_empty() {
        file.negations = seed.negations;
    }
    if file.contrast.is_empty() {
        file.contrast = seed.contrast;
    }
    if file.sarcasm.is_empty() {
        file.sarcasm = seed.sarcasm;
    }
    if file.neutral_soft.is_empty() {
        file.neutral_soft = seed.neutral_soft;
    }
    if file.behavior_patterns.is_empty() {
        file.behavior_patterns = seed.behavior_patterns;
    }
    if file.slang.is_empty() {
        file.slang = seed.slang;
    }
    if file.aspects.is_empty() {
        file.aspects = seed.aspects;
    }
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn weighted(list: &[(&str, f32)]) -> HashMap<String, f32> {
    list.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Small built-in Vietnamese travel lexicon used when no resource is available.
pub fn builtin_seed() -> LexiconFile {
    LexiconFile {
        positive: weighted(&[
            ("đẹp", 0.6),
            ("tốt", 0.6),
            ("tuyệt", 0.8),
            ("tuyệt vời", 0.9),
            ("xuất sắc", 0.9),
            ("hoàn hảo", 0.9),
            ("ngon", 0.6),
            ("sạch", 0.5),
            ("sạch sẽ", 0.6),
            ("thân thiện", 0.6),
            ("nhiệt tình", 0.6),
            ("chu đáo", 0.6),
            ("hài lòng", 0.7),
            ("thích", 0.5),
            ("ấn tượng", 0.6),
            ("thoải mái", 0.5),
            ("yên tĩnh", 0.4),
            ("hợp lý", 0.4),
            ("rẻ", 0.3),
            ("nên đi", 0.6),
            ("good", 0.5),
            ("nice", 0.5),
        ]),
        negative: weighted(&[
            ("tệ", 0.7),
            ("tệ hại", 0.9),
            ("kém", 0.6),
            ("xấu", 0.6),
            ("bẩn", 0.6),
            ("đắt", 0.4),
            ("chặt chém", 0.8),
            ("lừa đảo", 0.9),
            ("thất vọng", 0.8),
            ("tồi", 0.7),
            ("ồn ào", 0.4),
            ("chán", 0.5),
            ("xa trung tâm", 0.3),
            ("chờ lâu", 0.4),
            ("bad", 0.6),
            ("terrible", 0.9),
        ]),
        intensifiers: weighted(&[
            ("rất", 1.5),
            ("quá", 1.5),
            ("cực kỳ", 1.8),
            ("vô cùng", 1.8),
            ("siêu", 1.7),
            ("thật sự", 1.4),
            ("hoàn toàn", 1.5),
        ]),
        downtoners: weighted(&[("hơi", 0.5), ("khá", 0.7), ("tương đối", 0.6)]),
        negations: owned(&[
            "không", "chẳng", "chả", "chưa", "đừng", "không hề", "chẳng hề", "không phải",
            "chưa từng", "thiếu",
        ]),
        contrast: owned(&[
            "nhưng", "nhưng mà", "tuy nhiên", "mặc dù", "tuy", "thế nhưng", "tuy vậy", "dù vậy",
            "but", "however",
        ]),
        sarcasm: owned(&["haha", "hihi", "hehe", "nhỉ", "nhể", ":))", "=))", "😏", "😅"]),
        neutral_soft: owned(&["ok", "ổn", "được", "tạm"]),
        behavior_patterns: vec![
            ["không".into(), "quay lại".into()],
            ["chẳng".into(), "quay lại".into()],
            ["không".into(), "giới thiệu".into()],
            ["không".into(), "đáng".into()],
            ["thất vọng".into(), "hoàn toàn".into()],
        ],
        slang: [
            ("ko", "không"),
            ("k", "không"),
            ("hok", "không"),
            ("dc", "được"),
            ("đc", "được"),
            ("oke", "ok"),
            ("okie", "ok"),
        ]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect(),
        aspects: [
            ("cleanliness", &["sạch", "sạch sẽ", "bẩn", "dơ", "vệ sinh", "mất vệ sinh", "hôi"][..]),
            (
                "service",
                &[
                    "nhân viên", "dịch vụ", "phục vụ", "thân thiện", "nhiệt tình", "chu đáo",
                    "lễ tân", "thái độ", "thô lỗ", "hướng dẫn viên",
                ][..],
            ),
            (
                "price",
                &["giá", "giá cả", "đắt", "rẻ", "chặt chém", "hợp lý", "đáng tiền", "vé"][..],
            ),
            ("food", &["đồ ăn", "món ăn", "ngon", "hải sản", "bữa sáng", "quán ăn"][..]),
            ("location", &["vị trí", "xa trung tâm", "gần biển", "đường đi", "trung tâm"][..]),
            ("scenery", &["cảnh", "view", "phong cảnh", "bãi biển", "núi"][..]),
            ("room", &["phòng", "khách sạn", "giường", "tiện nghi"][..]),
        ]
        .iter()
        .map(|(aspect, cues)| (aspect.to_string(), owned(cues)))
        .collect(),
    }
}
