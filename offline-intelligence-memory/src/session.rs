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

//! Session history
//!
//! A session is an ordered message history keyed by an opaque caller-chosen
//! id. Each session keeps its messages alongside their analysed terms and the
//! document frequencies the scorer needs, so nothing is re-tokenised per call.

use crate::error::{MemoryError, MemoryResult};
use crate::message::{Message, StoredMessage};
use crate::scorer::{AnalyzedText, CorpusStats};
use crate::text;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

/// Opaque, non-blank session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate a caller-supplied id. Blank ids are rejected.
    pub fn parse(raw: &str) -> MemoryResult<Self> {
        if raw.trim().is_empty() {
            return Err(MemoryError::InvalidArgument(
                "session_id must not be empty".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted form of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub title: Option<String>,
    /// Pinned sessions survive idle eviction
    #[serde(default)]
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a merge did to a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Messages added to the history
    pub appended: usize,
    /// Stored messages dropped because the caller's history diverged
    pub replaced: usize,
    /// Terms that entered the session vocabulary
    pub added_terms: Vec<String>,
    /// Terms that left the session vocabulary
    pub removed_terms: Vec<String>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.appended > 0 || self.replaced > 0
    }
}

/// Point-in-time statistics for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub message_count: usize,
    pub estimated_tokens: usize,
    pub role_counts: BTreeMap<String, usize>,
    pub title: Option<String>,
    pub pinned: bool,
    /// Filled in by the engine, which owns the topic extractor
    #[serde(default)]
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory state of one session
#[derive(Debug)]
pub struct SessionState {
    id: SessionId,
    messages: Vec<StoredMessage>,
    analyzed: Vec<AnalyzedText>,
    corpus: CorpusStats,
    estimated_tokens: usize,
    title: Option<String>,
    pinned: bool,
    /// Set once the session leaves the store; writes must not resurrect it
    evicted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

impl SessionState {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            analyzed: Vec::new(),
            corpus: CorpusStats::new(),
            estimated_tokens: 0,
            title: None,
            pinned: false,
            evicted: false,
            created_at: now,
            updated_at: now,
            last_accessed: now,
        }
    }

    /// Rebuild a session from its persisted record.
    pub fn from_record(record: SessionRecord) -> MemoryResult<Self> {
        for (i, stored) in record.messages.iter().enumerate() {
            if stored.position != i {
                return Err(MemoryError::InternalInvariantViolation(format!(
                    "session {} has message at position {} stored at index {}",
                    record.session_id, stored.position, i
                )));
            }
        }
        let analyzed: Vec<AnalyzedText> = record
            .messages
            .iter()
            .map(|m| AnalyzedText::new(&m.message.content))
            .collect();
        let corpus = CorpusStats::from_documents(&analyzed);
        let estimated_tokens = record
            .messages
            .iter()
            .map(|m| text::estimate_tokens(&m.message.content))
            .sum();
        Ok(Self {
            id: record.session_id,
            messages: record.messages,
            analyzed,
            corpus,
            estimated_tokens,
            title: record.title,
            pinned: record.pinned,
            evicted: false,
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_accessed: record.updated_at,
        })
    }

    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            session_id: self.id.clone(),
            messages: self.messages.clone(),
            title: self.title.clone(),
            pinned: self.pinned,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn analyzed(&self) -> &[AnalyzedText] {
        &self.analyzed
    }

    pub fn corpus(&self) -> &CorpusStats {
        &self.corpus
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.updated_at = Utc::now();
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
        self.updated_at = Utc::now();
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Highest ingestion sequence held by this session.
    pub fn max_seq(&self) -> Option<u64> {
        self.messages.iter().map(|m| m.seq).max()
    }

    /// Distinct terms across the whole history.
    pub fn vocabulary(&self) -> BTreeSet<String> {
        self.analyzed.iter().flat_map(|a| a.terms.iter().cloned()).collect()
    }

    /// Plain copy of the history.
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    /// Reconcile the stored history with a caller-supplied one.
    ///
    /// - supplied is a prefix of (or equal to) stored: nothing changes
    /// - stored is a prefix of supplied: the tail is appended
    /// - a stored suffix equals a supplied prefix longer than the common
    ///   prefix: the non-overlapping part is appended
    /// - otherwise the stored tail from the first difference is replaced
    ///
    /// `next_seq` hands out ingestion sequence numbers for new messages.
    pub fn merge(&mut self, supplied: &[Message], mut next_seq: impl FnMut() -> u64) -> MergeOutcome {
        let stored = self.messages.len();
        let common = self
            .messages
            .iter()
            .zip(supplied)
            .take_while(|(s, m)| s.message == **m)
            .count();

        if common == supplied.len() {
            return MergeOutcome::default();
        }

        let (keep, tail) = if common == stored {
            (stored, &supplied[stored..])
        } else {
            match self.suffix_overlap(supplied) {
                Some(overlap) if overlap > common => (stored, &supplied[overlap..]),
                _ => (common, &supplied[common..]),
            }
        };

        let removed_docs: Vec<AnalyzedText> = self.analyzed.drain(keep..).collect();
        let removed_msgs: Vec<StoredMessage> = self.messages.drain(keep..).collect();
        let added_docs: Vec<AnalyzedText> = tail.iter().map(|m| AnalyzedText::new(&m.content)).collect();

        let touched: BTreeSet<&String> = removed_docs
            .iter()
            .chain(added_docs.iter())
            .flat_map(|d| d.terms.iter())
            .collect();
        let before: BTreeSet<String> = touched
            .iter()
            .filter(|t| self.corpus.contains(t))
            .map(|t| (*t).clone())
            .collect();

        for (doc, msg) in removed_docs.iter().zip(&removed_msgs) {
            self.corpus.remove(doc);
            self.estimated_tokens -= text::estimate_tokens(&msg.message.content);
        }
        for (message, doc) in tail.iter().zip(&added_docs) {
            self.corpus.add(doc);
            self.estimated_tokens += text::estimate_tokens(&message.content);
            self.messages.push(StoredMessage {
                message: message.clone(),
                position: self.messages.len(),
                seq: next_seq(),
            });
        }
        self.analyzed.extend(added_docs.iter().cloned());

        let mut outcome = MergeOutcome {
            appended: tail.len(),
            replaced: removed_msgs.len(),
            ..Default::default()
        };
        for term in touched {
            let was = before.contains(term);
            let is = self.corpus.contains(term);
            if is && !was {
                outcome.added_terms.push(term.clone());
            } else if was && !is {
                outcome.removed_terms.push(term.clone());
            }
        }
        if outcome.changed() {
            let now = Utc::now();
            self.updated_at = now;
            self.last_accessed = now;
        }
        outcome
    }

    /// Longest stored suffix that equals a prefix of `supplied`.
    fn suffix_overlap(&self, supplied: &[Message]) -> Option<usize> {
        let max = self.messages.len().min(supplied.len());
        let start = self.messages.len();
        (1..=max).rev().find(|&len| {
            self.messages[start - len..]
                .iter()
                .zip(&supplied[..len])
                .all(|(s, m)| s.message == *m)
        })
    }

    pub fn stats(&self) -> SessionStats {
        let mut role_counts = BTreeMap::new();
        for stored in &self.messages {
            *role_counts.entry(stored.message.role.as_str().to_string()).or_insert(0) += 1;
        }
        SessionStats {
            session_id: self.id.to_string(),
            message_count: self.messages.len(),
            estimated_tokens: self.estimated_tokens,
            role_counts,
            title: self.title.clone(),
            pinned: self.pinned,
            topics: Vec::new(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new(SessionId::parse("s1").unwrap())
    }

    fn counter() -> impl FnMut() -> u64 {
        let mut n = 0;
        move || {
            n += 1;
            n
        }
    }

    fn contents(state: &SessionState) -> Vec<String> {
        state.history().into_iter().map(|m| m.content).collect()
    }

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("   ").is_err());
        assert_eq!(SessionId::parse(" a ").unwrap().as_str(), " a ");
    }

    #[test]
    fn test_merge_appends_extension() {
        let mut s = state();
        let mut seq = counter();
        let out = s.merge(&[Message::user("a"), Message::assistant("b")], &mut seq);
        assert_eq!(out.appended, 2);

        let out = s.merge(
            &[Message::user("a"), Message::assistant("b"), Message::user("c")],
            &mut seq,
        );
        assert_eq!(out.appended, 1);
        assert_eq!(out.replaced, 0);
        assert_eq!(contents(&s), vec!["a", "b", "c"]);
        assert_eq!(s.messages()[2].position, 2);
        assert_eq!(s.messages()[2].seq, 3);
    }

    #[test]
    fn test_merge_prefix_is_noop() {
        let mut s = state();
        let mut seq = counter();
        s.merge(&[Message::user("a"), Message::assistant("b")], &mut seq);
        let out = s.merge(&[Message::user("a")], &mut seq);
        assert!(!out.changed());
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_merge_recent_window() {
        let mut s = state();
        let mut seq = counter();
        s.merge(
            &[Message::user("a"), Message::assistant("b"), Message::user("c")],
            &mut seq,
        );
        let out = s.merge(&[Message::assistant("b"), Message::user("c"), Message::assistant("d")], &mut seq);
        assert_eq!(out.appended, 1);
        assert_eq!(contents(&s), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_merge_divergence_replaces_tail() {
        let mut s = state();
        let mut seq = counter();
        s.merge(
            &[Message::user("rust ownership"), Message::assistant("borrowing rules")],
            &mut seq,
        );
        let out = s.merge(
            &[Message::user("rust ownership"), Message::assistant("lifetimes explained")],
            &mut seq,
        );
        assert_eq!(out.replaced, 1);
        assert_eq!(out.appended, 1);
        assert!(out.removed_terms.contains(&"borrowing".to_string()));
        assert!(out.added_terms.contains(&"lifetimes".to_string()));
        assert!(!s.corpus().contains("borrowing"));
        assert_eq!(contents(&s), vec!["rust ownership", "lifetimes explained"]);
    }

    #[test]
    fn test_record_round_trip() {
        let mut s = state();
        s.merge(&[Message::system("be brief"), Message::user("hello there")], counter());
        s.set_title("Hello There");
        s.set_pinned(true);
        s.mark_evicted();

        let restored = SessionState::from_record(s.to_record()).unwrap();
        assert_eq!(restored.history(), s.history());
        assert_eq!(restored.title(), Some("Hello There"));
        assert!(restored.is_pinned());
        assert!(!restored.is_evicted());
        assert_eq!(restored.stats().estimated_tokens, s.stats().estimated_tokens);
        assert!(restored.corpus().contains("hello"));
    }

    #[test]
    fn test_record_with_broken_positions() {
        let mut record = state().to_record();
        record.messages.push(StoredMessage {
            message: Message::user("x"),
            position: 4,
            seq: 1,
        });
        let err = SessionState::from_record(record).unwrap_err();
        assert!(matches!(err, MemoryError::InternalInvariantViolation(_)));
    }

    #[test]
    fn test_stats() {
        let mut s = state();
        s.merge(
            &[Message::system("sys"), Message::user("abcd"), Message::user("efgh")],
            counter(),
        );
        let stats = s.stats();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.role_counts.get("user"), Some(&2));
        assert_eq!(stats.estimated_tokens, 3);
    }
}
