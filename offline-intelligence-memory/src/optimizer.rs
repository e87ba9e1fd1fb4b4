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

//! Context optimization
//!
//! Reduces a message history to a subset that fits a budget while keeping the
//! conversation readable:
//!
//! 1. The most recent system message and the newest non-system messages are
//!    always kept.
//! 2. The remaining messages are scored against the query (or, without one,
//!    the latest user message).
//! 3. The best candidates are admitted greedily until the message and token
//!    budgets are spent.
//! 4. Everything kept is returned in its original order.

use crate::config::OptimizerConfig;
use crate::message::Message;
use crate::scorer::{sort_by_score, AnalyzedText, CorpusStats, Reference, RelevanceScorer, ScoredMessage};
use crate::text;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Size limits for one optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    /// Maximum messages in the result
    pub max_messages: usize,
    /// Maximum estimated tokens in the result
    pub max_tokens: Option<usize>,
}

impl Budget {
    /// A message-count budget with no token limit
    pub fn messages(max_messages: usize) -> Self {
        Self {
            max_messages,
            max_tokens: None,
        }
    }

    /// Add a token limit
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl From<&OptimizerConfig> for Budget {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            max_tokens: config.max_tokens,
        }
    }
}

/// Outcome of optimizing one history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Kept messages, in original order
    pub optimized_messages: Vec<Message>,
    /// Number of input messages
    pub original_count: usize,
    /// Number of kept messages
    pub optimized_count: usize,
    /// `optimized_count / original_count`, or 1.0 for an empty input
    pub compression_ratio: f32,
    /// Estimated tokens of the input
    pub original_tokens: usize,
    /// Estimated tokens of the output
    pub optimized_tokens: usize,
    /// How many kept messages were retained unconditionally
    pub retained_mandatory: usize,
}

impl OptimizationResult {
    /// Result for an empty history
    pub fn empty() -> Self {
        Self {
            optimized_messages: Vec::new(),
            original_count: 0,
            optimized_count: 0,
            compression_ratio: 1.0,
            original_tokens: 0,
            optimized_tokens: 0,
            retained_mandatory: 0,
        }
    }

    /// Whether anything was dropped
    pub fn is_compressed(&self) -> bool {
        self.optimized_count < self.original_count
    }
}

/// Budgeted, relevance-driven history reduction
#[derive(Debug, Clone)]
pub struct ContextOptimizer {
    config: OptimizerConfig,
    scorer: RelevanceScorer,
}

impl Default for ContextOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default(), RelevanceScorer::default())
    }
}

impl ContextOptimizer {
    pub fn new(config: OptimizerConfig, scorer: RelevanceScorer) -> Self {
        Self { config, scorer }
    }

    /// Budget taken from the configuration
    pub fn default_budget(&self) -> Budget {
        Budget::from(&self.config)
    }

    /// Optimize `messages` under `budget`.
    ///
    /// A blank `user_query` is treated as absent.
    pub fn optimize(&self, messages: &[Message], user_query: Option<&str>, budget: &Budget) -> OptimizationResult {
        if messages.is_empty() {
            return OptimizationResult::empty();
        }
        let total = messages.len();
        let mandatory = self.mandatory(messages);
        let mandatory_count = mandatory.iter().filter(|m| **m).count();

        let reference = Reference::new(self.reference_text(messages, user_query));

        // Newest candidates first when applying the work bound, then back
        // into conversation order so ties resolve to the earlier message.
        let mut candidates: Vec<usize> = (0..total)
            .rev()
            .filter(|&i| !mandatory[i])
            .take(self.config.max_candidates)
            .collect();
        candidates.reverse();

        let mut scored = self.score_candidates(messages, &mandatory, &candidates, &reference);
        sort_by_score(&mut scored);

        let mut keep = mandatory.clone();
        let mut count = mandatory_count;
        let mut tokens: usize = messages
            .iter()
            .zip(&mandatory)
            .filter(|(_, m)| **m)
            .map(|(msg, _)| text::estimate_tokens(&msg.content))
            .sum();

        for candidate in &scored {
            if count >= budget.max_messages {
                break;
            }
            let cost = text::estimate_tokens(&messages[candidate.index].content);
            if let Some(max_tokens) = budget.max_tokens {
                if tokens + cost > max_tokens {
                    continue;
                }
            }
            keep[candidate.index] = true;
            count += 1;
            tokens += cost;
        }

        let optimized_messages: Vec<Message> = messages
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(m, _)| m.clone())
            .collect();
        let optimized_count = optimized_messages.len();
        let original_tokens = messages.iter().map(|m| text::estimate_tokens(&m.content)).sum();

        debug!(
            original = total,
            optimized = optimized_count,
            mandatory = mandatory_count,
            scored = scored.len(),
            "Optimized context"
        );

        OptimizationResult {
            optimized_messages,
            original_count: total,
            optimized_count,
            compression_ratio: optimized_count as f32 / total as f32,
            original_tokens,
            optimized_tokens: tokens,
            retained_mandatory: mandatory_count,
        }
    }

    /// Messages kept regardless of budget.
    fn mandatory(&self, messages: &[Message]) -> Vec<bool> {
        let mut mandatory = vec![false; messages.len()];
        if self.config.preserve_system {
            if let Some(i) = messages.iter().rposition(|m| m.role.is_system()) {
                mandatory[i] = true;
            }
        }
        for (i, _) in messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| !m.role.is_system())
            .take(self.config.recent_messages)
        {
            mandatory[i] = true;
        }
        mandatory
    }

    fn reference_text<'a>(&self, messages: &'a [Message], user_query: Option<&'a str>) -> &'a str {
        match user_query.map(str::trim) {
            Some(query) if !query.is_empty() => query,
            _ => messages
                .iter()
                .rev()
                .find(|m| m.role.is_user())
                .map(|m| m.content.as_str())
                .unwrap_or(""),
        }
    }

    fn score_candidates(
        &self,
        messages: &[Message],
        mandatory: &[bool],
        candidates: &[usize],
        reference: &Reference,
    ) -> Vec<ScoredMessage> {
        let total = messages.len();
        if reference.is_empty() {
            // Nothing to compare against; prefer what is most recent.
            return candidates
                .iter()
                .map(|&index| ScoredMessage {
                    index,
                    score: self.scorer.recency(index, total),
                })
                .collect();
        }

        let docs: Vec<AnalyzedText> = candidates
            .iter()
            .map(|&i| AnalyzedText::new(&messages[i].content))
            .collect();
        let mut corpus = CorpusStats::from_documents(&docs);
        for (msg, _) in messages.iter().zip(mandatory).filter(|(_, m)| **m) {
            corpus.add(&AnalyzedText::new(&msg.content));
        }

        candidates
            .iter()
            .zip(&docs)
            .map(|(&index, doc)| ScoredMessage {
                index,
                score: self.scorer.score(reference, doc, index, total, &corpus),
            })
            .collect()
    }
}
