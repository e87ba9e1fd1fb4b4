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

//! Relevance scoring
//!
//! Scores how pertinent a message is to a reference text (a query or the most
//! recent user turn). The score is a weighted blend of two parts:
//!
//! - **Lexical**: soft term overlap, each reference term weighted by its rarity
//!   within the session (smoothed IDF). A term matches a candidate term exactly,
//!   through a shared stem, or through trigram similarity.
//! - **Recency**: exponential decay by distance from the newest message.
//!
//! Scores are bounded to `[0, 1]` and deterministic for identical input.

use crate::config::ScoringConfig;
use crate::message::Message;
use crate::text;
use std::collections::{BTreeSet, HashMap};

/// Similarity credited when two terms share a stem.
const STEM_MATCH: f32 = 0.85;
/// Scale applied to trigram similarity above the threshold.
const TRIGRAM_SCALE: f32 = 0.7;
/// Terms shorter than this never match through trigrams.
const MIN_TRIGRAM_LEN: usize = 4;

/// Pre-analysed text: distinct terms and their stems.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedText {
    pub terms: BTreeSet<String>,
    pub stems: BTreeSet<String>,
}

impl AnalyzedText {
    pub fn new(content: &str) -> Self {
        let terms = text::term_set(content);
        let stems = terms.iter().map(|t| text::stem(t)).collect();
        Self { terms, stems }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// A reference text prepared for repeated scoring.
#[derive(Debug, Clone, Default)]
pub struct Reference {
    terms: Vec<(String, String)>,
}

impl Reference {
    pub fn new(reference: &str) -> Self {
        let terms = text::term_set(reference)
            .into_iter()
            .map(|t| {
                let stem = text::stem(&t);
                (t, stem)
            })
            .collect();
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Reference terms in sorted order.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(t, _)| t.as_str())
    }
}

/// Document frequencies over one corpus (normally one session).
#[derive(Debug, Clone, Default)]
pub struct CorpusStats {
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
}

impl CorpusStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build statistics over a set of analysed documents.
    pub fn from_documents<'a>(docs: impl IntoIterator<Item = &'a AnalyzedText>) -> Self {
        let mut stats = Self::new();
        for doc in docs {
            stats.add(doc);
        }
        stats
    }

    pub fn add(&mut self, doc: &AnalyzedText) {
        self.doc_count += 1;
        for term in &doc.terms {
            *self.doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
    }

    pub fn remove(&mut self, doc: &AnalyzedText) {
        self.doc_count = self.doc_count.saturating_sub(1);
        for term in &doc.terms {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    /// Whether any document holds `term`.
    pub fn contains(&self, term: &str) -> bool {
        self.doc_freq.contains_key(term)
    }

    /// Smoothed inverse document frequency; always >= 1.
    pub fn idf(&self, term: &str) -> f32 {
        let df = self.doc_freq.get(term).copied().unwrap_or(0);
        (((self.doc_count + 1) as f32) / ((df + 1) as f32)).ln() + 1.0
    }
}

/// A message index paired with its relevance score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredMessage {
    pub index: usize,
    pub score: f32,
}

/// Hybrid lexical + recency scorer.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    config: ScoringConfig,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl RelevanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Full relevance of a candidate at `position` in a history of `total`.
    ///
    /// Empty references and candidates without terms score `0.0`.
    pub fn score(
        &self,
        reference: &Reference,
        candidate: &AnalyzedText,
        position: usize,
        total: usize,
        corpus: &CorpusStats,
    ) -> f32 {
        if reference.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        let lexical = self.lexical(reference, candidate, corpus);
        let recency = self.recency(position, total);
        let weights = self.config.lexical_weight + self.config.recency_weight;
        ((self.config.lexical_weight * lexical + self.config.recency_weight * recency) / weights)
            .clamp(0.0, 1.0)
    }

    /// IDF-weighted soft overlap in `[0, 1]`.
    pub fn lexical(&self, reference: &Reference, candidate: &AnalyzedText, corpus: &CorpusStats) -> f32 {
        if reference.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        let mut matched = 0.0f32;
        let mut total = 0.0f32;
        for (term, stem) in &reference.terms {
            let idf = corpus.idf(term);
            total += idf;
            matched += idf * self.term_similarity(term, stem, candidate);
        }
        (matched / total).clamp(0.0, 1.0)
    }

    /// Fraction of reference terms with any soft match, ignoring rarity.
    pub fn coverage(&self, reference: &Reference, candidate: &AnalyzedText) -> f32 {
        if reference.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        let hits = reference
            .terms
            .iter()
            .filter(|(term, stem)| self.term_similarity(term, stem, candidate) > 0.0)
            .count();
        hits as f32 / reference.terms.len() as f32
    }

    /// Exponential decay from the newest message (1.0) backwards.
    pub fn recency(&self, position: usize, total: usize) -> f32 {
        if total == 0 || position >= total {
            return 0.0;
        }
        let age = (total - 1 - position) as f32;
        (-std::f32::consts::LN_2 * age / self.config.recency_half_life).exp()
    }

    /// Score every message against `reference` and sort best first.
    ///
    /// Ties keep conversation order. IDF is computed over `messages`.
    pub fn rank(&self, reference: &str, messages: &[Message]) -> Vec<ScoredMessage> {
        let reference = Reference::new(reference);
        let docs: Vec<AnalyzedText> = messages.iter().map(|m| AnalyzedText::new(&m.content)).collect();
        let corpus = CorpusStats::from_documents(&docs);
        let mut scored: Vec<ScoredMessage> = docs
            .iter()
            .enumerate()
            .map(|(index, doc)| ScoredMessage {
                index,
                score: self.score(&reference, doc, index, docs.len(), &corpus),
            })
            .collect();
        sort_by_score(&mut scored);
        scored
    }

    fn term_similarity(&self, term: &str, stem: &str, candidate: &AnalyzedText) -> f32 {
        if candidate.terms.contains(term) {
            return 1.0;
        }
        if candidate.stems.contains(stem) {
            return STEM_MATCH;
        }
        let len = term.chars().count();
        if len < MIN_TRIGRAM_LEN {
            return 0.0;
        }
        let mut best = 0.0f32;
        for other in &candidate.terms {
            let other_len = other.chars().count();
            // Dice over trigrams cannot reach the threshold past this length gap.
            let bound = 2.0 * (len.min(other_len) + 1) as f32 / (len + other_len + 2) as f32;
            if other_len < MIN_TRIGRAM_LEN || bound < self.config.trigram_threshold {
                continue;
            }
            let sim = text::trigram_similarity(term, other);
            if sim >= self.config.trigram_threshold && sim > best {
                best = sim;
            }
        }
        best * TRIGRAM_SCALE
    }
}

/// Stable sort, highest score first.
pub fn sort_by_score(scored: &mut [ScoredMessage]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
}
