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

//! Conversation titles
//!
//! Titles are extracted from the opening of the conversation, not generated:
//! the first substantive user message is trimmed to a few words and title
//! cased.

use crate::config::TitleConfig;
use crate::message::Message;
use crate::text;

/// Words kept lower case inside a title.
const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "at", "but", "by", "for", "in", "nor", "of", "on", "or", "the", "to",
    "with",
];

/// Characters stripped from the start of the title source.
const LEADING_MARKUP: &[char] = &['#', '>', '*', '-', '"', '\'', '`', '_', '~'];

/// Extractive title generator
#[derive(Debug, Clone, Default)]
pub struct TitleGenerator {
    config: TitleConfig,
}

impl TitleGenerator {
    pub fn new(config: TitleConfig) -> Self {
        Self { config }
    }

    /// Title for a history. Never empty.
    pub fn generate(&self, messages: &[Message]) -> String {
        let source = messages
            .iter()
            .find(|m| m.role.is_user() && m.is_substantive())
            .or_else(|| {
                messages
                    .iter()
                    .find(|m| !m.role.is_system() && m.is_substantive())
            });

        match source.map(|m| self.from_text(&m.content)) {
            Some(title) if !title.is_empty() => title,
            _ => self.config.fallback.clone(),
        }
    }

    fn from_text(&self, content: &str) -> String {
        let normalized = text::normalize_whitespace(content);
        let stripped = normalized.trim_start_matches(|c: char| LEADING_MARKUP.contains(&c) || c.is_whitespace());

        let words: Vec<&str> = stripped
            .split_whitespace()
            .filter(|w| w.chars().any(char::is_alphanumeric))
            .take(self.config.max_words)
            .collect();

        let mut title = String::new();
        for word in words {
            let extra = if title.is_empty() { 0 } else { 1 };
            if title.chars().count() + extra + word.chars().count() > self.config.max_chars {
                if title.is_empty() {
                    title = word.chars().take(self.config.max_chars).collect();
                }
                break;
            }
            if extra == 1 {
                title.push(' ');
            }
            title.push_str(word);
        }

        let title = title.trim_end_matches(|c: char| !c.is_alphanumeric());
        title_case(title)
    }
}

/// Title-case a phrase, keeping words with inner capitals as written.
pub fn title_case(phrase: &str) -> String {
    let has_lower = phrase.chars().any(char::is_lowercase);
    let phrase = if has_lower {
        phrase.to_string()
    } else {
        phrase.to_lowercase()
    };

    phrase
        .split(' ')
        .enumerate()
        .map(|(i, word)| {
            if word.chars().skip(1).any(char::is_uppercase) {
                word.to_string()
            } else if i > 0 && SMALL_WORDS.contains(&word.to_lowercase().as_str()) {
                word.to_lowercase()
            } else {
                capitalize(word)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
