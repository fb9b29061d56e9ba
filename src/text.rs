// src/text.rs
//! Text primitives shared by the rule engine and the spam gate: Unicode-aware
//! normalisation (diacritics kept), sentence-aware tokenisation, slang mapping,
//! and the anonymised id used in logs.

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\w+").expect("word regex"));

/// Characters that end a sentence for modifier lookback purposes.
const SENTENCE_BREAKS: [char; 6] = ['.', ',', ';', '!', '?', '\n'];

/// A word token and the sentence it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub sentence: usize,
}

/// Lowercase (full Unicode) and collapse whitespace runs into one space.
/// Newlines are kept since they separate sentences.
pub fn normalize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for ch in lowered.chars() {
        if ch == '\n' {
            out.push('\n');
            pending_space = false;
        } else if ch.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() && !out.ends_with('\n') {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        }
    }
    out.trim().to_string()
}

/// Tokenise normalised text into word tokens, tagging each with its sentence index.
/// `slang` pairs are applied per sentence, longest phrase first, on token boundaries.
pub fn tokenize(normalized: &str, slang: &[(String, String)]) -> Vec<Token> {
    let mut out = Vec::new();
    let mut sentence = 0usize;
    for piece in normalized.split(SENTENCE_BREAKS) {
        let words: Vec<&str> = WORD_RE.find_iter(piece).map(|m| m.as_str()).collect();
        if words.is_empty() {
            continue;
        }
        let joined = apply_slang(&words.join(" "), slang);
        for w in joined.split_whitespace() {
            out.push(Token {
                text: w.to_string(),
                sentence,
            });
        }
        sentence += 1;
    }
    out
}

fn apply_slang(sentence: &str, slang: &[(String, String)]) -> String {
    if slang.is_empty() {
        return sentence.to_string();
    }
    let mut padded = format!(" {sentence} ");
    for (from, to) in slang {
        let pat = format!(" {from} ");
        let rep = format!(" {to} ");
        if from == to {
            continue;
        }
        // Second pass catches adjacent occurrences that shared a padding space.
        for _ in 0..2 {
            if padded.contains(&pat) {
                padded = padded.replace(&pat, &rep);
            }
        }
    }
    padded.trim().to_string()
}

/// Stable key for duplicate detection: normalised words joined by single spaces.
pub fn dedup_key(input: &str) -> String {
    let lowered = input.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short SHA-256 prefix of the text. Raw review text never goes to the logs.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn normalize_keeps_diacritics_and_collapses_space() {
        assert_eq!(normalize("  Rất   ĐẸP\tvà  Sạch  "), "rất đẹp và sạch");
    }

    #[test]
    fn tokenize_splits_sentences_on_punctuation() {
        let toks = tokenize("phòng đẹp, giá đắt. nhân viên tốt", &[]);
        assert_eq!(texts(&toks), vec!["phòng", "đẹp", "giá", "đắt", "nhân", "viên", "tốt"]);
        assert_eq!(toks[1].sentence, 0);
        assert_eq!(toks[2].sentence, 1);
        assert_eq!(toks[6].sentence, 2);
    }

    #[test]
    fn emoji_and_punctuation_produce_no_tokens() {
        assert!(tokenize("!!! ... 😍😍 :))", &[]).is_empty());
    }

    #[test]
    fn slang_is_mapped_on_word_boundaries() {
        let slang = vec![
            ("ko".to_string(), "không".to_string()),
            ("dc".to_string(), "được".to_string()),
        ];
        let toks = tokenize("ko dc ko kong", &slang);
        assert_eq!(texts(&toks), vec!["không", "được", "không", "kong"]);
    }

    #[test]
    fn dedup_key_ignores_case_and_punctuation() {
        assert_eq!(dedup_key("Rất ĐẸP!!!  "), dedup_key("rất đẹp"));
    }

    #[test]
    fn anon_hash_is_short_and_stable() {
        let a = anon_hash("xin chào");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_hash("xin chào"));
        assert_ne!(a, anon_hash("xin chao"));
    }
}
