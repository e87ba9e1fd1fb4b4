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

//! Session topics
//!
//! A topic is a short phrase naming what a conversation is about. Phrases
//! following a question or "about"-style cue win; messages without a cue
//! contribute their significant words instead. Topics recurring across
//! messages rank first, then the most recently raised ones.

use crate::config::TopicConfig;
use crate::message::Message;
use crate::text;
use crate::title::capitalize;
use std::collections::{HashMap, HashSet};

/// Words that introduce the subject of a question.
const QUESTION_CUES: &[&str] = &[
    "how", "hows", "what", "whats", "when", "where", "wheres", "which", "who", "whos", "why",
];

/// Words that introduce the subject of a statement.
const SUBJECT_CUES: &[&str] = &["about", "concerning", "discussing", "regarding"];

/// Extracts topic phrases from message histories
#[derive(Debug, Clone, Default)]
pub struct TopicExtractor {
    config: TopicConfig,
}

impl TopicExtractor {
    pub fn new(config: TopicConfig) -> Self {
        Self { config }
    }

    /// Topics of a history, strongest first. Empty when nothing qualifies.
    pub fn extract(&self, messages: &[Message]) -> Vec<String> {
        // phrase -> (occurrences, first-seen rank scanning newest first)
        let mut seen: HashMap<String, (usize, usize)> = HashMap::new();

        let recent = messages
            .iter()
            .rev()
            .filter(|m| !m.role.is_system() && m.is_substantive())
            .take(self.config.recent_messages);

        for message in recent {
            let words = text::words(&message.content);
            let mut phrases = self.cued_phrases(&words);
            if phrases.is_empty() {
                phrases = words
                    .iter()
                    .filter(|w| self.is_significant(w))
                    .cloned()
                    .collect();
            }
            let mut unique = HashSet::new();
            phrases.retain(|p| unique.insert(p.clone()));
            for phrase in phrases {
                let rank = seen.len();
                seen.entry(phrase).or_insert((0, rank)).0 += 1;
            }
        }

        let mut ranked: Vec<(String, (usize, usize))> = seen.into_iter().collect();
        ranked.sort_by(|(_, (count_a, rank_a)), (_, (count_b, rank_b))| {
            count_b.cmp(count_a).then(rank_a.cmp(rank_b))
        });
        ranked
            .into_iter()
            .take(self.config.max_topics)
            .map(|(phrase, _)| capitalize(&phrase))
            .collect()
    }

    /// Phrases that follow a cue word, in text order.
    fn cued_phrases(&self, words: &[String]) -> Vec<String> {
        let mut phrases = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let word = word.as_str();
            if !QUESTION_CUES.contains(&word) && !SUBJECT_CUES.contains(&word) {
                continue;
            }
            let phrase: Vec<&str> = words[i + 1..]
                .iter()
                .take_while(|w| !QUESTION_CUES.contains(&w.as_str()) && !SUBJECT_CUES.contains(&w.as_str()))
                .take(self.config.max_words)
                .filter(|w| self.is_significant(w))
                .map(String::as_str)
                .collect();
            if !phrase.is_empty() {
                phrases.push(phrase.join(" "));
            }
        }
        phrases
    }

    fn is_significant(&self, word: &str) -> bool {
        word.chars().count() >= self.config.min_word_chars
            && !text::is_stop_word(word)
            && !QUESTION_CUES.contains(&word)
            && !SUBJECT_CUES.contains(&word)
            && !word.chars().all(|c| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(messages: &[Message]) -> Vec<String> {
        TopicExtractor::default().extract(messages)
    }

    #[test]
    fn test_question_cues() {
        let found = topics(&[
            Message::system("You are helpful"),
            Message::user("What is Paris?"),
            Message::assistant("A city in France"),
            Message::user("What's its population?"),
        ]);
        assert_eq!(found, vec!["Population", "City", "France"]);
    }

    #[test]
    fn test_recurring_topics_rank_first() {
        let found = topics(&[
            Message::user("Tell me about borrow checker errors"),
            Message::assistant("Lifetimes are the usual cause"),
            Message::user("Still confused about borrow checker errors"),
        ]);
        assert_eq!(found, vec!["Borrow checker errors", "Lifetimes", "Usual"]);
    }

    #[test]
    fn test_limits() {
        let extractor = TopicExtractor::new(TopicConfig {
            max_topics: 1,
            recent_messages: 1,
            ..Default::default()
        });
        let found = extractor.extract(&[
            Message::user("how to bake sourdough"),
            Message::user("regarding tokio runtime tuning and more"),
        ]);
        assert_eq!(found, vec!["Tokio runtime tuning"]);
    }

    #[test]
    fn test_nothing_to_extract() {
        assert!(topics(&[]).is_empty());
        assert!(topics(&[Message::system("You are helpful assistant")]).is_empty());
        assert!(topics(&[Message::user("ok 42 ?!")]).is_empty());
    }
}
