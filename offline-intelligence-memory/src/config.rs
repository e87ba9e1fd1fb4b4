// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Memory engine configuration

use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration for the memory engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Context optimizer settings
    pub optimizer: OptimizerConfig,
    /// Relevance scoring settings
    pub scoring: ScoringConfig,
    /// Memory search settings
    pub search: SearchConfig,
    /// Title generation settings
    pub title: TitleConfig,
    /// Topic extraction settings
    pub topics: TopicConfig,
    /// Persistence settings
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Parse a configuration from TOML text. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override selected settings from `OI_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> MemoryResult<()> {
        if let Some(v) = env_parse::<usize>("OI_MAX_MESSAGES")? {
            self.optimizer.max_messages = v;
        }
        if let Some(v) = env_parse::<usize>("OI_MAX_TOKENS")? {
            self.optimizer.max_tokens = Some(v);
        }
        if let Some(v) = env_parse::<usize>("OI_RECENT_MESSAGES")? {
            self.optimizer.recent_messages = v;
        }
        if let Some(v) = env_parse::<bool>("OI_CROSS_SESSION_SEARCH")? {
            self.search.cross_session = v;
        }
        if let Ok(dir) = env::var("OI_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        self.validate()
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> MemoryResult<()> {
        let s = &self.scoring;
        for (name, value) in [
            ("scoring.lexical_weight", s.lexical_weight),
            ("scoring.recency_weight", s.recency_weight),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(MemoryError::Config(format!("{} must be >= 0", name)));
            }
        }
        if s.lexical_weight + s.recency_weight <= 0.0 {
            return Err(MemoryError::Config(
                "scoring weights must not both be zero".to_string(),
            ));
        }
        if !s.recency_half_life.is_finite() || s.recency_half_life <= 0.0 {
            return Err(MemoryError::Config(
                "scoring.recency_half_life must be > 0".to_string(),
            ));
        }
        for (name, value) in [
            ("scoring.trigram_threshold", s.trigram_threshold),
            ("search.semantic_threshold", self.search.semantic_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::Config(format!("{} must be within [0, 1]", name)));
            }
        }
        if self.title.max_words == 0 || self.title.max_chars == 0 {
            return Err(MemoryError::Config(
                "title.max_words and title.max_chars must be > 0".to_string(),
            ));
        }
        if self.title.fallback.trim().is_empty() {
            return Err(MemoryError::Config("title.fallback must not be empty".to_string()));
        }
        if self.topics.max_words == 0 {
            return Err(MemoryError::Config("topics.max_words must be > 0".to_string()));
        }
        Ok(())
    }

    /// Set the message-count budget
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.optimizer.max_messages = max_messages;
        self
    }

    /// Set the token budget
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.optimizer.max_tokens = Some(max_tokens);
        self
    }

    /// Persist sessions as JSON files under `dir`
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage.data_dir = Some(dir.into());
        self
    }

    /// Enable or disable session-less search
    pub fn with_cross_session_search(mut self, enabled: bool) -> Self {
        self.search.cross_session = enabled;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> MemoryResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| MemoryError::Config(format!("{} has an invalid value: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Context optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of messages in an optimized result.
    pub max_messages: usize,
    /// Optional aggregate token budget (estimated at ~4 chars per token).
    pub max_tokens: Option<usize>,
    /// Newest non-system messages always kept verbatim.
    pub recent_messages: usize,
    /// Keep the most recent system message regardless of budget.
    pub preserve_system: bool,
    /// Upper bound on candidates scored per call.
    pub max_candidates: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_tokens: None,
            recent_messages: 2,
            preserve_system: true,
            max_candidates: 2_000,
        }
    }
}

/// Relevance scoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of the lexical overlap component.
    pub lexical_weight: f32,
    /// Weight of the recency component.
    pub recency_weight: f32,
    /// Age (in messages) at which the recency component halves.
    pub recency_half_life: f32,
    /// Minimum trigram similarity for two terms to count as related.
    pub trigram_threshold: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            lexical_weight: 0.7,
            recency_weight: 0.3,
            recency_half_life: 8.0,
            trigram_threshold: 0.55,
        }
    }
}

/// Memory search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Allow searches without a session id to span every session.
    pub cross_session: bool,
    /// Run the relevance-based pass in addition to keyword matching.
    pub semantic: bool,
    /// Keyword hit count at which semantic hits stop interleaving.
    pub keyword_fallback_threshold: usize,
    /// Minimum soft term coverage for a semantic match.
    pub semantic_threshold: f32,
    /// Newest messages examined per session.
    pub max_scan_messages: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cross_session: true,
            semantic: true,
            keyword_fallback_threshold: 3,
            semantic_threshold: 0.5,
            max_scan_messages: 10_000,
        }
    }
}

/// Title generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Maximum words in a generated title.
    pub max_words: usize,
    /// Maximum characters in a generated title.
    pub max_chars: usize,
    /// Title used when a history has no substantive content.
    pub fallback: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            max_words: 6,
            max_chars: 60,
            fallback: "New Conversation".to_string(),
        }
    }
}

/// Topic extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Maximum topics reported per session.
    pub max_topics: usize,
    /// Words shorter than this never form part of a topic.
    pub min_word_chars: usize,
    /// Maximum words in one topic phrase.
    pub max_words: usize,
    /// Newest messages examined.
    pub recent_messages: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            max_topics: 3,
            min_word_chars: 3,
            max_words: 4,
            recent_messages: 20,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for JSON session files. `None` keeps history in memory only.
    pub data_dir: Option<PathBuf>,
}
