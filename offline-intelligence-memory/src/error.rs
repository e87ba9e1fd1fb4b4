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

//! Memory engine error types

use thiserror::Error;

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors that can occur in the memory engine
///
/// Only structurally invalid calls and construction failures reach callers of
/// the public operations. A session without history is a valid state and is
/// answered with a neutral result instead of [`MemoryError::NotFound`].
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed or missing required argument (e.g. an empty session id)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An instance or result could not be constructed
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// Referenced session has no stored history
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Internal bookkeeping is broken
    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolation(String),

    /// Persistence backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Whether the caller supplied bad input, as opposed to an engine fault.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, MemoryError::InvalidArgument(_) | MemoryError::Config(_))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for MemoryError {
    fn from(e: toml::de::Error) -> Self {
        MemoryError::Config(e.to_string())
    }
}
