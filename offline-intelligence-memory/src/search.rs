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

//! Memory search
//!
//! Two passes over stored messages:
//!
//! - **keyword**: the whole query as a word-aligned phrase, any query term
//!   as a token, or a query term of three or more characters inside a longer
//!   word ("pop" in "population")
//! - **semantic**: soft term coverage against the relevance scorer, for
//!   messages the keyword pass missed
//!
//! Match predicates only look at the query and the message itself, so adding
//! a matching message never lowers `total`.

use crate::config::SearchConfig;
use crate::message::Message;
use crate::scorer::{Reference, RelevanceScorer};
use crate::session::SessionState;
use crate::text;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Keyword score of a term found only inside a longer word, relative to a
/// whole-token match.
const SUBSTRING_WEIGHT: f32 = 0.8;

/// Which strategies produced the hits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Keyword,
    Semantic,
    Hybrid,
    None,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Keyword => "keyword",
            SearchType::Semantic => "semantic",
            SearchType::Hybrid => "hybrid",
            SearchType::None => "none",
        }
    }
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pass that matched a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Keyword,
    Semantic,
}

/// One matching message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub session_id: String,
    pub position: usize,
    pub message: Message,
    pub score: f32,
    pub source: HitSource,
    /// Ingestion sequence, newer is larger
    pub seq: u64,
}

/// Outcome of a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Number of matches before `limit` was applied
    pub total: usize,
    pub search_type: SearchType,
    /// Best matches, at most `limit`
    pub hits: Vec<SearchHit>,
}

impl SearchResult {
    pub fn none() -> Self {
        Self {
            total: 0,
            search_type: SearchType::None,
            hits: Vec::new(),
        }
    }
}

/// A query prepared once and matched against many sessions
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    phrase: String,
    terms: Vec<String>,
    /// Terms long enough to match inside longer words
    fragments: Vec<String>,
    reference: Reference,
}

impl PreparedQuery {
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// Whether the query has any indexable term
    pub fn has_terms(&self) -> bool {
        !self.terms.is_empty()
    }
}

/// Keyword + semantic search over session histories
#[derive(Debug, Clone)]
pub struct MemorySearch {
    config: SearchConfig,
    scorer: RelevanceScorer,
}

impl Default for MemorySearch {
    fn default() -> Self {
        Self::new(SearchConfig::default(), RelevanceScorer::default())
    }
}

impl MemorySearch {
    pub fn new(config: SearchConfig, scorer: RelevanceScorer) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn scorer(&self) -> &RelevanceScorer {
        &self.scorer
    }

    /// Prepare a query. Queries without any word yield `None`.
    pub fn prepare(&self, query: &str) -> Option<PreparedQuery> {
        let words = text::words(query);
        if words.is_empty() {
            return None;
        }
        let terms: Vec<String> = text::term_set(query).into_iter().collect();
        let fragments = terms
            .iter()
            .filter(|t| t.chars().count() >= text::MIN_SUBSTRING_CHARS)
            .cloned()
            .collect();
        Some(PreparedQuery {
            phrase: padded(&words),
            terms,
            fragments,
            reference: Reference::new(query),
        })
    }

    /// Collect the matches of one session into `hits`.
    ///
    /// Only the newest `max_scan_messages` messages are examined.
    pub fn scan(&self, query: &PreparedQuery, session: &SessionState, hits: &mut Vec<SearchHit>) {
        let messages = session.messages();
        let analyzed = session.analyzed();
        let start = messages.len().saturating_sub(self.config.max_scan_messages);

        for (stored, doc) in messages[start..].iter().zip(&analyzed[start..]) {
            let content = padded(&text::words(&stored.message.content));
            let keyword = if content.contains(&query.phrase) {
                Some(1.0)
            } else {
                let exact = fraction(&query.terms, |t| doc.terms.contains(t));
                let partial = fraction(&query.fragments, |f| doc.terms.iter().any(|t| t.contains(f)));
                let score = exact.max(partial * SUBSTRING_WEIGHT);
                (score > 0.0).then_some(score)
            };

            let (score, source) = match keyword {
                Some(score) => (score, HitSource::Keyword),
                None if self.config.semantic => {
                    let coverage = self.scorer.coverage(&query.reference, doc);
                    if coverage <= 0.0 || coverage < self.config.semantic_threshold {
                        continue;
                    }
                    let score = self.scorer.score(
                        &query.reference,
                        doc,
                        stored.position,
                        messages.len(),
                        session.corpus(),
                    );
                    (score, HitSource::Semantic)
                }
                None => continue,
            };

            hits.push(SearchHit {
                session_id: session.id().to_string(),
                position: stored.position,
                message: stored.message.clone(),
                score,
                source,
                seq: stored.seq,
            });
        }
    }

    /// Rank collected hits and apply `limit`.
    ///
    /// Once keyword hits reach the fallback threshold, semantic hits rank
    /// behind every keyword hit.
    pub fn finish(&self, mut hits: Vec<SearchHit>, limit: usize) -> SearchResult {
        if hits.is_empty() {
            return SearchResult::none();
        }
        let keyword = hits.iter().filter(|h| h.source == HitSource::Keyword).count();
        let semantic = hits.len() - keyword;
        let search_type = match (keyword > 0, semantic > 0) {
            (true, true) => SearchType::Hybrid,
            (true, false) => SearchType::Keyword,
            _ => SearchType::Semantic,
        };

        let keyword_first = keyword >= self.config.keyword_fallback_threshold;
        hits.sort_by(|a, b| {
            let by_source = if keyword_first {
                source_rank(a.source).cmp(&source_rank(b.source))
            } else {
                Ordering::Equal
            };
            by_source
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| b.seq.cmp(&a.seq))
        });

        let total = hits.len();
        hits.truncate(limit);
        SearchResult {
            total,
            search_type,
            hits,
        }
    }

    /// Search a single session.
    pub fn search_session(&self, query: &str, session: &SessionState, limit: usize) -> SearchResult {
        let Some(prepared) = self.prepare(query) else {
            return SearchResult::none();
        };
        let mut hits = Vec::new();
        self.scan(&prepared, session, &mut hits);
        self.finish(hits, limit)
    }
}

/// Words joined with single spaces and padded so that `contains` only
/// matches on word boundaries.
fn padded(words: &[String]) -> String {
    format!(" {} ", words.join(" "))
}

/// Share of `items` accepted by `matches`; 0 for an empty list.
fn fraction(items: &[String], matches: impl Fn(&str) -> bool) -> f32 {
    if items.is_empty() {
        return 0.0;
    }
    items.iter().filter(|i| matches(i.as_str())).count() as f32 / items.len() as f32
}

fn source_rank(source: HitSource) -> u8 {
    match source {
        HitSource::Keyword => 0,
        HitSource::Semantic => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    fn session(id: &str, messages: &[Message]) -> SessionState {
        let mut state = SessionState::new(SessionId::parse(id).unwrap());
        let mut seq = 0;
        state.merge(messages, || {
            seq += 1;
            seq
        });
        state
    }

    fn paris() -> SessionState {
        session(
            "s1",
            &[
                Message::system("You are helpful"),
                Message::user("What is Paris?"),
                Message::assistant("A city in France"),
                Message::user("What's its population?"),
            ],
        )
    }

    #[test]
    fn test_keyword_match() {
        let search = MemorySearch::default();
        let result = search.search_session("population", &paris(), 10);
        assert_eq!(result.total, 1);
        assert_eq!(result.search_type, SearchType::Keyword);
        assert_eq!(result.hits[0].position, 3);
        assert_eq!(result.hits[0].score, 1.0);
    }

    #[test]
    fn test_substring_is_keyword_match() {
        let search = MemorySearch::default();
        let state = session(
            "s",
            &[Message::user("What's its population?"), Message::user("Parisian cafes")],
        );

        let result = search.search_session("pop", &state, 10);
        assert_eq!(result.total, 1);
        assert_eq!(result.search_type, SearchType::Keyword);
        assert_eq!(result.hits[0].message.content, "What's its population?");
        assert!((result.hits[0].score - SUBSTRING_WEIGHT).abs() < f32::EPSILON);

        let result = search.search_session("paris", &state, 10);
        assert_eq!(result.search_type, SearchType::Keyword);
        assert_eq!(result.hits[0].position, 1);

        // whole-token matches outrank partial ones
        let state = session("s", &[Message::user("population"), Message::user("pop music")]);
        let result = search.search_session("pop", &state, 10);
        assert_eq!(result.total, 2);
        assert_eq!(result.hits[0].message.content, "pop music");
        assert_eq!(result.hits[0].score, 1.0);

        // two-character terms only match whole tokens
        let state = session("s", &[Message::user("golang tips")]);
        assert_eq!(search.search_session("go", &state, 10).total, 0);
    }

    #[test]
    fn test_semantic_match() {
        let search = MemorySearch::default();
        let result = search.search_session("cities", &paris(), 10);
        assert_eq!(result.search_type, SearchType::Semantic);
        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].source, HitSource::Semantic);
        assert_eq!(result.hits[0].message.content, "A city in France");
    }

    #[test]
    fn test_hybrid_and_limit() {
        let search = MemorySearch::default();
        let result = search.search_session("paris cities", &paris(), 1);
        assert_eq!(result.search_type, SearchType::Hybrid);
        assert_eq!(result.total, 2);
        assert_eq!(result.hits.len(), 1);

        let result = search.search_session("paris", &paris(), 0);
        assert_eq!(result.total, 1);
        assert!(result.hits.is_empty());
    }

    #[test]
    fn test_blank_query() {
        let search = MemorySearch::default();
        assert_eq!(search.search_session("  ", &paris(), 10), SearchResult::none());
        assert_eq!(search.search_session("volcano", &paris(), 10), SearchResult::none());
    }

    #[test]
    fn test_phrase_of_stop_words() {
        let search = MemorySearch::default();
        let result = search.search_session("You are", &paris(), 10);
        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].position, 0);
    }

    #[test]
    fn test_ties_prefer_recent() {
        let search = MemorySearch::default();
        let state = session("s", &[Message::user("rust traits"), Message::user("rust macros")]);
        let result = search.search_session("rust", &state, 10);
        assert_eq!(result.hits[0].position, 1);
        assert_eq!(result.hits[1].position, 0);
    }

    #[test]
    fn test_keyword_first_after_threshold() {
        let state = session(
            "s",
            &[Message::user("the cities of europe"), Message::user("rust city planning")],
        );

        let interleaved = MemorySearch::default().search_session("city tokyo", &state, 10);
        assert_eq!(interleaved.hits[0].source, HitSource::Semantic);

        let search = MemorySearch::new(
            SearchConfig {
                keyword_fallback_threshold: 1,
                ..Default::default()
            },
            RelevanceScorer::default(),
        );
        let result = search.search_session("city tokyo", &state, 10);
        assert_eq!(result.search_type, SearchType::Hybrid);
        assert_eq!(result.hits[0].source, HitSource::Keyword);
        assert_eq!(result.hits[1].source, HitSource::Semantic);
    }

    #[test]
    fn test_semantic_disabled() {
        let search = MemorySearch::new(
            SearchConfig {
                semantic: false,
                ..Default::default()
            },
            RelevanceScorer::default(),
        );
        assert_eq!(search.search_session("cities", &paris(), 10).total, 0);
    }
}
