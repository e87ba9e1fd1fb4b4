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

//! Persistence layer for session history
//!
//! The engine keeps every session in memory and writes through to a
//! [`HistoryBackend`] after each mutation. Two backends ship with the crate:
//! [`InMemoryBackend`] for tests and ephemeral engines, and
//! [`JsonFileBackend`] which keeps one JSON document per session.

use crate::error::{MemoryError, MemoryResult};
use crate::session::{SessionId, SessionRecord};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable storage for session records
pub trait HistoryBackend: Send + Sync + Debug {
    /// Load every stored session.
    fn load_all(&self) -> MemoryResult<Vec<SessionRecord>>;

    /// Insert or overwrite one session.
    fn save(&self, record: &SessionRecord) -> MemoryResult<()>;

    /// Remove one session. Missing sessions are not an error.
    fn delete(&self, session_id: &SessionId) -> MemoryResult<()>;

    /// Make previous writes durable.
    fn flush(&self) -> MemoryResult<()> {
        Ok(())
    }
}

/// Keeps records in process memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: Mutex<BTreeMap<SessionId, SessionRecord>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl HistoryBackend for InMemoryBackend {
    fn load_all(&self) -> MemoryResult<Vec<SessionRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    fn save(&self, record: &SessionRecord) -> MemoryResult<()> {
        self.records
            .lock()
            .insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, session_id: &SessionId) -> MemoryResult<()> {
        self.records.lock().remove(session_id);
        Ok(())
    }
}

/// One pretty-printed JSON file per session
///
/// File names are the blake3 hash of the session id, so any id is safe on
/// disk. Writes go to a temporary file that is renamed into place.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Open (and create if needed) a data directory.
    pub fn new(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, session_id: &SessionId) -> PathBuf {
        let hash = blake3::hash(session_id.as_str().as_bytes());
        self.path.join(format!("{}.json", hex::encode(&hash.as_bytes()[..16])))
    }
}

impl HistoryBackend for JsonFileBackend {
    fn load_all(&self) -> MemoryResult<Vec<SessionRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<SessionRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        records.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        debug!(count = records.len(), path = %self.path.display(), "Loaded session files");
        Ok(records)
    }

    fn save(&self, record: &SessionRecord) -> MemoryResult<()> {
        let file = self.file_for(&record.session_id);
        let tmp = file.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &file)
            .map_err(|e| MemoryError::Storage(format!("{}: {}", file.display(), e)))?;
        Ok(())
    }

    fn delete(&self, session_id: &SessionId) -> MemoryResult<()> {
        match std::fs::remove_file(self.file_for(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
