//! Text similarity helpers.
//!
//! Lightweight lexical measures used where no embedding is available: the
//! MMR diversity filter and the heuristic reranker. Tokenization is
//! whitespace-based for alphabetic scripts and per-character for CJK, so
//! Chinese text degrades to character-set overlap rather than to a single
//! giant token.

use std::collections::HashSet;

/// Split text into comparison tokens.
///
/// Whitespace-delimited words, lowercased; runs of CJK characters are
/// additionally split into single characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for word in text.split_whitespace() {
        let lower = word.to_lowercase();
        if lower.chars().any(is_cjk) {
            for ch in lower.chars().filter(|c| !c.is_ascii_punctuation()) {
                tokens.insert(ch.to_string());
            }
        } else {
            let trimmed: String = lower
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if !trimmed.is_empty() {
                tokens.insert(trimmed);
            }
        }
    }
    tokens
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

/// Token-set Jaccard similarity in [0, 1]
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let set_a = tokenize(a);
    let set_b = tokenize(b);

    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Character n-gram overlap similarity in [0, 1].
///
/// More forgiving than token Jaccard for morphology and for short CJK
/// strings; `n` of 2 is the usual choice.
pub fn ngram_similarity(a: &str, b: &str, n: usize) -> f64 {
    let grams_a = char_ngrams(a, n);
    let grams_b = char_ngrams(b, n);

    if grams_a.is_empty() || grams_b.is_empty() {
        return 0.0;
    }

    let intersection = grams_a.intersection(&grams_b).count();
    let union = grams_a.union(&grams_b).count();
    intersection as f64 / union as f64
}

fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if chars.len() < n || n == 0 {
        return chars.into_iter().map(|c| c.to_string()).collect();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}
