// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Text analysis shared by scoring, search and title generation.
//!
//! Everything here is pure and allocation-light. Term sets are `BTreeSet`s so
//! that any arithmetic folded over them runs in a fixed order.

use std::collections::BTreeSet;

/// Words that carry no topical signal.
const STOP_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "are", "as", "at", "be", "been", "being", "but", "by",
    "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her",
    "him", "his", "i", "if", "in", "is", "it", "its", "me", "might", "must", "my", "of", "on",
    "or", "our", "shall", "she", "should", "so", "that", "the", "their", "them", "these",
    "they", "this", "those", "to", "us", "was", "we", "were", "will", "with", "would", "you",
    "your",
];

/// Suffixes removed by [`stem`], longest first.
const SUFFIXES: &[&str] = &[
    "ations", "ation", "ness", "ment", "ings", "ing", "ies", "ied", "ers", "est", "ed", "es",
    "er", "ly", "s",
];

/// Minimum number of characters left after stripping a suffix.
const MIN_STEM_LEN: usize = 3;

/// Shortest query term matched inside longer words.
pub const MIN_SUBSTRING_CHARS: usize = 3;

/// Average characters per token for English text.
const CHARS_PER_TOKEN: f64 = 4.0;

/// Check whether a lowercased word is a stop word.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Split text into lowercased alphanumeric words, keeping stop words.
///
/// Apostrophes inside a word are dropped so that "what's" becomes "whats".
pub fn words(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if (ch == '\'' || ch == '\u{2019}') && !current.is_empty() {
            continue;
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Significant terms of a text: lowercased words minus stop words and
/// single-character noise.
pub fn terms(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 2 && !is_stop_word(w))
        .collect()
}

/// Distinct significant terms of a text.
pub fn term_set(text: &str) -> BTreeSet<String> {
    terms(text).into_iter().collect()
}

/// Light suffix-stripping stemmer.
///
/// Not linguistically complete; it only needs to map inflections of the same
/// word onto a shared key ("cities"/"city", "running"/"runs").
pub fn stem(term: &str) -> String {
    let len = term.chars().count();
    for suffix in SUFFIXES {
        if term.ends_with(suffix) && len - suffix.chars().count() >= MIN_STEM_LEN {
            let mut base = term[..term.len() - suffix.len()].to_string();
            // "boxes" -> "box", but "types" -> "type"
            if *suffix == "es" && !["s", "x", "z", "ch", "sh"].iter().any(|e| base.ends_with(e)) {
                continue;
            }
            if *suffix == "ies" || *suffix == "ied" {
                base.push('y');
            }
            // "running" -> "runn" -> "run"
            let mut chars = base.chars().rev();
            if let (Some(a), Some(b)) = (chars.next(), chars.next()) {
                if a == b && !"aeiouls".contains(a) {
                    base.pop();
                }
            }
            return base;
        }
    }
    term.to_string()
}

/// Character trigrams of a term, padded so short terms still produce grams.
pub fn trigrams(term: &str) -> BTreeSet<String> {
    let padded: Vec<char> = format!("  {} ", term).chars().collect();
    padded
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Dice coefficient of two terms' trigram sets, in `[0, 1]`.
pub fn trigram_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let ga = trigrams(a);
    let gb = trigrams(b);
    let shared = ga.intersection(&gb).count();
    (2 * shared) as f32 / (ga.len() + gb.len()) as f32
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Estimate the number of tokens in a string (~4 characters per token).
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as usize
}
