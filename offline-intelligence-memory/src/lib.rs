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

//! Offline Intelligence Memory
//!
//! A local conversation-memory engine that provides:
//! - **Context Optimization**: Reduce a message history to a budget while
//!   keeping the system prompt, the latest turns and the most relevant context
//! - **Memory Search**: Keyword and relevance-based search over past messages,
//!   within one session or across all of them
//! - **Title Generation**: Short extractive titles for conversations
//! - **Session Upkeep**: Topic phrases per session, pinning, idle eviction
//!
//! Everything runs in-process and synchronously. No network, no models.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      Memory Engine                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐   │
//! │  │   Context   │  │   Memory    │  │      Title       │   │
//! │  │  Optimizer  │  │   Search    │  │    Generator     │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────────────┘   │
//! │         └────────┬───────┘                                │
//! │          ┌───────▼────────┐                               │
//! │          │ Relevance      │                               │
//! │          │ Scorer         │                               │
//! │          └───────┬────────┘                               │
//! │  ┌───────────────▼──────────────┐  ┌──────────────────┐   │
//! │  │ Session Store (per-session   │──│ Global Term      │   │
//! │  │ locks, analysed messages)    │  │ Index            │   │
//! │  └───────────────┬──────────────┘  └──────────────────┘   │
//! │  ┌───────────────▼──────────────┐                         │
//! │  │ History Backend (JSON files) │                         │
//! │  └──────────────────────────────┘                         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use offline_intelligence_memory::{EngineConfig, MemoryEngine, Message};
//!
//! let engine = MemoryEngine::new(EngineConfig::default())?;
//! let history = vec![
//!     Message::system("You are helpful"),
//!     Message::user("What is Paris?"),
//!     Message::assistant("A city in France"),
//!     Message::user("What's its population?"),
//! ];
//!
//! let optimized = engine.optimize_context("s1", &history, None)?;
//! assert_eq!(optimized.optimized_count, 4);
//!
//! let found = engine.search("population", Some("s1"), 10);
//! assert_eq!(found.total, 1);
//!
//! assert_eq!(engine.generate_title(&history), "What Is Paris");
//! # Ok::<(), offline_intelligence_memory::MemoryError>(())
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod message;
pub mod optimizer;
pub mod scorer;
pub mod search;
pub mod session;
pub mod storage;
pub mod store;
pub mod text;
pub mod title;
pub mod topics;

// Re-exports
pub use config::{
    EngineConfig, OptimizerConfig, ScoringConfig, SearchConfig, StorageConfig, TitleConfig, TopicConfig,
};
pub use engine::{EngineStats, MemoryEngine};
pub use error::{MemoryError, MemoryResult};
pub use message::{Message, Role, StoredMessage};
pub use optimizer::{Budget, ContextOptimizer, OptimizationResult};
pub use scorer::RelevanceScorer;
pub use search::{HitSource, MemorySearch, SearchHit, SearchResult, SearchType};
pub use session::{SessionId, SessionStats};
pub use storage::{HistoryBackend, InMemoryBackend, JsonFileBackend};
pub use title::TitleGenerator;
pub use topics::TopicExtractor;
