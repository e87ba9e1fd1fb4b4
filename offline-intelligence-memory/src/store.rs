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

//! Message store
//!
//! Sessions live in a `DashMap` of individually locked states, so calls on
//! different sessions never contend. The store also maintains the global
//! [`TermIndex`] and writes every mutation through to the backend.
//!
//! Lock order is map shard, then session, then index. Nothing takes a
//! session lock while holding the index lock, and nothing touches the map
//! while holding a session lock.
//!
//! A session removed from the map is marked evicted under its own lock.
//! Writers that were already waiting on that lock see the mark and leave the
//! index and backend alone.

use crate::error::MemoryResult;
use crate::index::TermIndex;
use crate::message::Message;
use crate::session::{MergeOutcome, SessionId, SessionState};
use crate::storage::HistoryBackend;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared handle to one session
pub type SessionHandle = Arc<Mutex<SessionState>>;

/// All sessions known to an engine
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<SessionId, SessionHandle>,
    index: TermIndex,
    next_seq: AtomicU64,
    backend: Arc<dyn HistoryBackend>,
}

impl SessionStore {
    /// Create a store and load every session the backend holds.
    pub fn open(backend: Arc<dyn HistoryBackend>) -> MemoryResult<Self> {
        let store = Self {
            sessions: DashMap::new(),
            index: TermIndex::new(),
            next_seq: AtomicU64::new(1),
            backend,
        };

        let records = store.backend.load_all()?;
        let mut max_seq = 0;
        for record in records {
            let session_id = record.session_id.clone();
            let state = match SessionState::from_record(record) {
                Ok(state) => state,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Skipping inconsistent session record");
                    continue;
                }
            };
            max_seq = max_seq.max(state.max_seq().unwrap_or(0));
            let vocabulary: Vec<String> = state.vocabulary().into_iter().collect();
            store.index.update(state.id(), &vocabulary, &[]);
            store
                .sessions
                .insert(state.id().clone(), Arc::new(Mutex::new(state)));
        }
        store.next_seq.store(max_seq + 1, Ordering::SeqCst);

        if !store.sessions.is_empty() {
            info!(sessions = store.sessions.len(), "Restored session history");
        }
        Ok(store)
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_or_create(&self, id: &SessionId) -> SessionHandle {
        if let Some(handle) = self.get(id.as_str()) {
            return handle;
        }
        let handle = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::new(id.clone()))));
        Arc::clone(handle.value())
    }

    /// Reconcile a session with a caller-supplied history, creating the
    /// session if needed.
    pub fn merge(&self, id: &SessionId, messages: &[Message]) -> MergeOutcome {
        self.merge_into(&self.get_or_create(id), id, messages)
    }

    fn merge_into(&self, handle: &SessionHandle, id: &SessionId, messages: &[Message]) -> MergeOutcome {
        let mut state = handle.lock();
        if state.is_evicted() {
            debug!(session_id = %id, "Session evicted during merge");
            return MergeOutcome::default();
        }
        let outcome = state.merge(messages, || self.next_seq.fetch_add(1, Ordering::SeqCst));
        state.touch();

        if outcome.replaced > 0 {
            warn!(
                session_id = %id,
                replaced = outcome.replaced,
                appended = outcome.appended,
                "Supplied history diverged from stored history; replacing stored tail"
            );
        } else if outcome.appended > 0 {
            debug!(session_id = %id, appended = outcome.appended, "Appended messages");
        }

        if outcome.changed() {
            self.index
                .update(id, &outcome.added_terms, &outcome.removed_terms);
            self.persist(&state);
        }
        outcome
    }

    /// Append messages unconditionally. Returns the new history length, or 0
    /// when the session was evicted before the append could land.
    pub fn append(&self, id: &SessionId, messages: &[Message]) -> usize {
        self.append_into(&self.get_or_create(id), id, messages)
    }

    fn append_into(&self, handle: &SessionHandle, id: &SessionId, messages: &[Message]) -> usize {
        let mut state = handle.lock();
        if state.is_evicted() {
            debug!(session_id = %id, "Session evicted during append");
            return 0;
        }
        let mut combined = state.history();
        combined.extend_from_slice(messages);
        let outcome = state.merge(&combined, || self.next_seq.fetch_add(1, Ordering::SeqCst));
        state.touch();
        if outcome.changed() {
            self.index
                .update(id, &outcome.added_terms, &outcome.removed_terms);
            self.persist(&state);
        }
        state.len()
    }

    /// Record a title on an existing session.
    pub fn set_title(&self, id: &str, title: &str) -> bool {
        self.update(id, |state| state.set_title(title))
    }

    /// Pin or unpin an existing session.
    pub fn set_pinned(&self, id: &str, pinned: bool) -> bool {
        self.update(id, |state| state.set_pinned(pinned))
    }

    /// Drop a session from memory, the index and the backend.
    pub fn remove(&self, id: &str) -> bool {
        self.remove_where(id, |_| true)
    }

    /// Drop every unpinned session not accessed since `cutoff`.
    pub fn remove_idle(&self, cutoff: DateTime<Utc>) -> usize {
        self.session_ids()
            .iter()
            .filter(|id| {
                self.remove_where(id.as_str(), |state| {
                    !state.is_pinned() && state.last_accessed() < cutoff
                })
            })
            .count()
    }

    /// Session ids in sorted order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total stored messages across sessions.
    pub fn message_count(&self) -> usize {
        self.handles().iter().map(|h| h.lock().len()).sum()
    }

    pub fn index(&self) -> &TermIndex {
        &self.index
    }

    /// Write every session to the backend and flush it.
    pub fn flush(&self) -> MemoryResult<()> {
        for handle in self.handles() {
            let state = handle.lock();
            if !state.is_evicted() {
                self.backend.save(&state.to_record())?;
            }
        }
        self.backend.flush()
    }

    fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Apply a metadata change to a live session and persist it.
    fn update(&self, id: &str, change: impl FnOnce(&mut SessionState)) -> bool {
        let Some(handle) = self.get(id) else {
            return false;
        };
        let mut state = handle.lock();
        if state.is_evicted() {
            return false;
        }
        change(&mut state);
        self.persist(&state);
        true
    }

    /// Remove a session if `condition` holds under its lock.
    ///
    /// The shard stays write-locked until the index and backend are clean, so
    /// a session re-created under the same id cannot lose its writes to this
    /// cleanup.
    fn remove_where(&self, id: &str, condition: impl FnOnce(&SessionState) -> bool) -> bool {
        self.sessions
            .remove_if(id, |id, handle| {
                let mut state = handle.lock();
                if !condition(&state) {
                    return false;
                }
                state.mark_evicted();
                self.index.remove_session(id);
                if let Err(e) = self.backend.delete(id) {
                    warn!(session_id = %id, error = %e, "Failed to delete persisted session");
                }
                true
            })
            .is_some()
    }

    fn persist(&self, state: &SessionState) {
        if let Err(e) = self.backend.save(&state.to_record()) {
            warn!(session_id = %state.id(), error = %e, "Failed to persist session");
        }
    }
}
