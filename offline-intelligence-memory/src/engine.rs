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

//! Memory engine - main entry point for memory operations
//!
//! Owns the session store, the term index and the three components
//! (optimizer, search, titles) and routes every call to them.

use crate::config::EngineConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::message::Message;
use crate::optimizer::{Budget, ContextOptimizer, OptimizationResult};
use crate::scorer::RelevanceScorer;
use crate::search::{MemorySearch, PreparedQuery, SearchResult};
use crate::session::{SessionId, SessionStats};
use crate::store::{SessionHandle, SessionStore};
use crate::storage::{HistoryBackend, InMemoryBackend, JsonFileBackend};
use crate::title::TitleGenerator;
use crate::topics::TopicExtractor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Engine-wide counters
#[derive(Debug, Default)]
struct EngineCounters {
    optimize_calls: AtomicU64,
    search_calls: AtomicU64,
    title_calls: AtomicU64,
    divergent_merges: AtomicU64,
}

/// Snapshot of engine activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub sessions: usize,
    pub messages: usize,
    pub indexed_terms: usize,
    pub optimize_calls: u64,
    pub search_calls: u64,
    pub title_calls: u64,
    /// Merges that replaced stored history
    pub divergent_merges: u64,
}

/// Main memory engine
///
/// `MemoryEngine` is `Send + Sync`; share it behind an `Arc`. Calls on
/// different sessions run in parallel.
#[derive(Debug)]
pub struct MemoryEngine {
    config: EngineConfig,
    store: SessionStore,
    optimizer: ContextOptimizer,
    search: MemorySearch,
    titles: TitleGenerator,
    topics: TopicExtractor,
    counters: EngineCounters,
}

impl MemoryEngine {
    /// Create an engine. Sessions persist as JSON files when
    /// `storage.data_dir` is set and live in memory otherwise.
    pub fn new(config: EngineConfig) -> MemoryResult<Self> {
        let backend: Arc<dyn HistoryBackend> = match &config.storage.data_dir {
            Some(dir) => Arc::new(JsonFileBackend::new(dir)?),
            None => Arc::new(InMemoryBackend::new()),
        };
        Self::with_backend(config, backend)
    }

    /// Create an engine over a caller-provided backend.
    pub fn with_backend(config: EngineConfig, backend: Arc<dyn HistoryBackend>) -> MemoryResult<Self> {
        config.validate()?;
        info!(
            max_messages = config.optimizer.max_messages,
            cross_session = config.search.cross_session,
            "Initializing memory engine"
        );

        let store = SessionStore::open(backend)?;
        let scorer = RelevanceScorer::new(config.scoring.clone());

        Ok(Self {
            optimizer: ContextOptimizer::new(config.optimizer.clone(), scorer.clone()),
            search: MemorySearch::new(config.search.clone(), scorer),
            titles: TitleGenerator::new(config.title.clone()),
            topics: TopicExtractor::new(config.topics.clone()),
            store,
            config,
            counters: EngineCounters::default(),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Context optimization
    // ========================================================================

    /// Optimize a history under the configured budget.
    ///
    /// `messages` are authoritative for this call and are merged into the
    /// stored session. Fails only for a blank `session_id`.
    pub fn optimize_context(
        &self,
        session_id: &str,
        messages: &[Message],
        user_query: Option<&str>,
    ) -> MemoryResult<OptimizationResult> {
        self.optimize_context_with_budget(session_id, messages, user_query, self.optimizer.default_budget())
    }

    /// Optimize a history under an explicit budget.
    pub fn optimize_context_with_budget(
        &self,
        session_id: &str,
        messages: &[Message],
        user_query: Option<&str>,
        budget: Budget,
    ) -> MemoryResult<OptimizationResult> {
        let id = SessionId::parse(session_id)?;
        self.counters.optimize_calls.fetch_add(1, Ordering::Relaxed);

        let outcome = self.store.merge(&id, messages);
        if outcome.replaced > 0 {
            self.counters.divergent_merges.fetch_add(1, Ordering::Relaxed);
        }

        let result = self.optimizer.optimize(messages, user_query, &budget);
        debug!(
            session_id = %id,
            original = result.original_count,
            optimized = result.optimized_count,
            ratio = result.compression_ratio,
            "Context optimized"
        );
        Ok(result)
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Search stored messages.
    ///
    /// With a session id only that session is searched; an unknown or blank
    /// id yields an empty result. Without one every session is searched when
    /// cross-session search is enabled.
    pub fn search(&self, query: &str, session_id: Option<&str>, limit: usize) -> SearchResult {
        self.counters.search_calls.fetch_add(1, Ordering::Relaxed);
        let Some(prepared) = self.search.prepare(query) else {
            return SearchResult::none();
        };

        let handles = match session_id {
            Some(id) => match self.store.get(id) {
                Some(handle) => vec![handle],
                None => return SearchResult::none(),
            },
            None if self.config.search.cross_session => self.cross_session_candidates(&prepared),
            None => {
                debug!("Cross-session search is disabled");
                return SearchResult::none();
            }
        };

        let mut hits = Vec::new();
        for handle in &handles {
            let state = handle.lock();
            self.search.scan(&prepared, &state, &mut hits);
        }
        let result = self.search.finish(hits, limit);
        debug!(
            sessions = handles.len(),
            total = result.total,
            search_type = %result.search_type,
            "Search completed"
        );
        result
    }

    /// Sessions that can hold a match, in id order.
    fn cross_session_candidates(&self, query: &PreparedQuery) -> Vec<SessionHandle> {
        let ids: Vec<SessionId> = if query.has_terms() {
            self.store
                .index()
                .candidates(query.reference(), self.config.scoring.trigram_threshold)
                .into_iter()
                .collect()
        } else {
            self.store.session_ids()
        };
        ids.iter().filter_map(|id| self.store.get(id.as_str())).collect()
    }

    // ========================================================================
    // Titles
    // ========================================================================

    /// Title for a history. Never empty.
    pub fn generate_title(&self, messages: &[Message]) -> String {
        self.counters.title_calls.fetch_add(1, Ordering::Relaxed);
        self.titles.generate(messages)
    }

    /// Generate a title from a stored session and record it.
    pub fn title_session(&self, session_id: &str) -> MemoryResult<String> {
        let id = SessionId::parse(session_id)?;
        let history = self
            .session_history(id.as_str())
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        let title = self.generate_title(&history);
        self.store.set_title(id.as_str(), &title);
        Ok(title)
    }

    /// Record a caller-chosen title.
    pub fn set_session_title(&self, session_id: &str, title: &str) -> MemoryResult<()> {
        let id = SessionId::parse(session_id)?;
        if title.trim().is_empty() {
            return Err(MemoryError::InvalidArgument("title must not be empty".to_string()));
        }
        if self.store.set_title(id.as_str(), title.trim()) {
            Ok(())
        } else {
            Err(MemoryError::NotFound(id.to_string()))
        }
    }

    // ========================================================================
    // Topics
    // ========================================================================

    /// Topic phrases for a history, strongest first. May be empty.
    pub fn extract_topics(&self, messages: &[Message]) -> Vec<String> {
        self.topics.extract(messages)
    }

    /// Topic phrases of a stored session
    pub fn session_topics(&self, session_id: &str) -> Option<Vec<String>> {
        let handle = self.store.get(session_id)?;
        let history = handle.lock().history();
        Some(self.topics.extract(&history))
    }

    // ========================================================================
    // Session API
    // ========================================================================

    /// Append messages to a session, creating it if needed. Returns the new
    /// history length.
    pub fn append_messages(&self, session_id: &str, messages: &[Message]) -> MemoryResult<usize> {
        let id = SessionId::parse(session_id)?;
        Ok(self.store.append(&id, messages))
    }

    /// Stored history of a session
    pub fn session_history(&self, session_id: &str) -> Option<Vec<Message>> {
        let handle = self.store.get(session_id)?;
        let mut state = handle.lock();
        state.touch();
        Some(state.history())
    }

    /// Statistics for a session, topics included
    pub fn session_stats(&self, session_id: &str) -> Option<SessionStats> {
        let handle = self.store.get(session_id)?;
        let state = handle.lock();
        let mut stats = state.stats();
        stats.topics = self.topics.extract(&state.history());
        Some(stats)
    }

    /// Exempt a session from idle eviction.
    pub fn pin_session(&self, session_id: &str) -> MemoryResult<()> {
        self.set_pinned(session_id, true)
    }

    /// Make a session subject to idle eviction again.
    pub fn unpin_session(&self, session_id: &str) -> MemoryResult<()> {
        self.set_pinned(session_id, false)
    }

    fn set_pinned(&self, session_id: &str, pinned: bool) -> MemoryResult<()> {
        let id = SessionId::parse(session_id)?;
        if !self.store.set_pinned(id.as_str(), pinned) {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        debug!(session_id, pinned, "Session pin changed");
        Ok(())
    }

    /// All session ids, sorted
    pub fn list_sessions(&self) -> Vec<String> {
        self.store
            .session_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    /// Forget a session. Returns whether it existed.
    pub fn evict_session(&self, session_id: &str) -> bool {
        let removed = self.store.remove(session_id);
        if removed {
            info!(session_id, "Evicted session");
        }
        removed
    }

    /// Forget every unpinned session idle for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: chrono::Duration) -> usize {
        let evicted = self.store.remove_idle(Utc::now() - max_idle);
        if evicted > 0 {
            info!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// Engine activity snapshot
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            sessions: self.store.session_count(),
            messages: self.store.message_count(),
            indexed_terms: self.store.index().term_count(),
            optimize_calls: self.counters.optimize_calls.load(Ordering::Relaxed),
            search_calls: self.counters.search_calls.load(Ordering::Relaxed),
            title_calls: self.counters.title_calls.load(Ordering::Relaxed),
            divergent_merges: self.counters.divergent_merges.load(Ordering::Relaxed),
        }
    }

    /// Flush every session to the backend and release the engine.
    pub fn shutdown(self) -> MemoryResult<()> {
        info!(sessions = self.store.session_count(), "Shutting down memory engine");
        self.store.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchType;

    fn paris() -> Vec<Message> {
        vec![
            Message::system("You are helpful"),
            Message::user("What is Paris?"),
            Message::assistant("A city in France"),
            Message::user("What's its population?"),
        ]
    }

    fn engine() -> MemoryEngine {
        MemoryEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemoryEngine>();
    }

    #[test]
    fn test_blank_session_id_rejected() {
        let engine = engine();
        let err = engine.optimize_context("  ", &paris(), None).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));
        assert!(engine.list_sessions().is_empty());
    }

    #[test]
    fn test_optimize_seeds_store() {
        let engine = engine();
        let result = engine.optimize_context("s1", &paris(), None).unwrap();
        assert_eq!(result.optimized_count, 4);
        assert_eq!(engine.session_history("s1").unwrap(), paris());
        assert_eq!(engine.stats().optimize_calls, 1);
    }

    #[test]
    fn test_search_unknown_session_does_not_create_it() {
        let engine = engine();
        let result = engine.search("population", Some("ghost"), 10);
        assert_eq!(result, SearchResult::none());
        assert!(engine.session_stats("ghost").is_none());
    }

    #[test]
    fn test_cross_session_search() {
        let engine = engine();
        engine.append_messages("a", &[Message::user("tokio runtime tuning")]).unwrap();
        engine.append_messages("b", &[Message::user("Tokio tasks and runtimes")]).unwrap();
        engine.append_messages("c", &[Message::user("baking sourdough")]).unwrap();

        let result = engine.search("runtime", None, 10);
        assert_eq!(result.total, 2);
        assert_eq!(result.search_type, SearchType::Keyword);
        assert_eq!(result.hits[0].session_id, "a");
        assert_eq!(result.hits[0].score, 1.0);

        let result = engine.search("sour", None, 10);
        assert_eq!(result.total, 1);
        assert_eq!(result.hits[0].session_id, "c");

        let result = engine.search("tuned", None, 10);
        assert_eq!(result.search_type, SearchType::Semantic);
        assert_eq!(result.hits[0].session_id, "a");

        let gated = MemoryEngine::new(EngineConfig::default().with_cross_session_search(false)).unwrap();
        gated.append_messages("a", &[Message::user("tokio runtime")]).unwrap();
        assert_eq!(gated.search("runtime", None, 10).search_type, SearchType::None);
        assert_eq!(gated.search("runtime", Some("a"), 10).total, 1);
    }

    #[test]
    fn test_titles() {
        let engine = engine();
        assert_eq!(engine.generate_title(&paris()), "What Is Paris");

        engine.append_messages("s1", &paris()).unwrap();
        assert_eq!(engine.title_session("s1").unwrap(), "What Is Paris");
        assert_eq!(engine.session_stats("s1").unwrap().title.as_deref(), Some("What Is Paris"));

        engine.set_session_title("s1", "Paris Facts").unwrap();
        assert_eq!(engine.session_stats("s1").unwrap().title.as_deref(), Some("Paris Facts"));

        assert!(matches!(engine.title_session("nope"), Err(MemoryError::NotFound(_))));
        assert!(matches!(
            engine.set_session_title("s1", " "),
            Err(MemoryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_eviction() {
        let engine = engine();
        engine.append_messages("s1", &paris()).unwrap();
        engine.append_messages("s2", &paris()).unwrap();

        assert!(engine.evict_session("s1"));
        assert!(!engine.evict_session("s1"));
        assert_eq!(engine.search("paris", Some("s1"), 10).total, 0);
        assert_eq!(engine.search("paris", None, 10).total, 1);

        assert_eq!(engine.evict_idle(chrono::Duration::hours(1)), 0);
        assert_eq!(engine.evict_idle(chrono::Duration::seconds(-1)), 1);
        assert_eq!(engine.stats().sessions, 0);
        assert_eq!(engine.stats().indexed_terms, 0);
    }

    #[test]
    fn test_pinning() {
        let engine = engine();
        engine.append_messages("keep", &paris()).unwrap();
        engine.append_messages("drop", &paris()).unwrap();

        engine.pin_session("keep").unwrap();
        assert!(engine.session_stats("keep").unwrap().pinned);
        assert_eq!(engine.evict_idle(chrono::Duration::seconds(-1)), 1);
        assert_eq!(engine.list_sessions(), vec!["keep".to_string()]);

        engine.unpin_session("keep").unwrap();
        assert_eq!(engine.evict_idle(chrono::Duration::seconds(-1)), 1);

        assert!(matches!(engine.pin_session("keep"), Err(MemoryError::NotFound(_))));
        assert!(matches!(engine.pin_session(""), Err(MemoryError::InvalidArgument(_))));
    }

    #[test]
    fn test_topics() {
        let engine = engine();
        assert!(engine.session_topics("s1").is_none());

        engine.append_messages("s1", &paris()).unwrap();
        let topics = engine.session_topics("s1").unwrap();
        assert_eq!(topics, vec!["Population", "City", "France"]);
        assert_eq!(engine.session_stats("s1").unwrap().topics, topics);
        assert_eq!(engine.extract_topics(&paris()), topics);
        assert!(engine.extract_topics(&[]).is_empty());
    }
}
