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

//! Global term index for session-less search.

use crate::scorer::Reference;
use crate::session::SessionId;
use crate::text;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Maps each term to the sessions whose vocabulary holds it.
///
/// Readers never block each other. Callers must not hold a session lock
/// while waiting on anything that itself locks sessions.
#[derive(Debug, Default)]
pub struct TermIndex {
    by_term: RwLock<HashMap<String, BTreeSet<SessionId>>>,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a vocabulary change for one session.
    pub fn update(&self, session: &SessionId, added: &[String], removed: &[String]) {
        if added.is_empty() && removed.is_empty() {
            return;
        }
        let mut by_term = self.by_term.write();
        for term in removed {
            if let Some(sessions) = by_term.get_mut(term) {
                sessions.remove(session);
                if sessions.is_empty() {
                    by_term.remove(term);
                }
            }
        }
        for term in added {
            by_term
                .entry(term.clone())
                .or_default()
                .insert(session.clone());
        }
    }

    /// Drop every posting of a session.
    pub fn remove_session(&self, session: &SessionId) {
        let mut by_term = self.by_term.write();
        by_term.retain(|_, sessions| {
            sessions.remove(session);
            !sessions.is_empty()
        });
    }

    /// Sessions holding any reference term, by exact match, containment,
    /// shared stem or trigram similarity at or above `threshold`.
    pub fn candidates(&self, reference: &Reference, threshold: f32) -> BTreeSet<SessionId> {
        let by_term = self.by_term.read();
        let mut out = BTreeSet::new();
        for term in reference.terms() {
            if let Some(sessions) = by_term.get(term) {
                out.extend(sessions.iter().cloned());
            }
            let stem = text::stem(term);
            let partial = term.chars().count() >= text::MIN_SUBSTRING_CHARS;
            for (vocab, sessions) in by_term.iter() {
                if vocab == term {
                    continue;
                }
                if (partial && vocab.contains(term))
                    || text::stem(vocab) == stem
                    || text::trigram_similarity(term, vocab) >= threshold
                {
                    out.extend(sessions.iter().cloned());
                }
            }
        }
        out
    }

    /// Number of distinct indexed terms.
    pub fn term_count(&self) -> usize {
        self.by_term.read().len()
    }

    /// Sessions indexed under `term`.
    pub fn sessions_for(&self, term: &str) -> BTreeSet<SessionId> {
        self.by_term.read().get(term).cloned().unwrap_or_default()
    }
}
