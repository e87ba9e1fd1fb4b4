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

//! Conversation messages
//!
//! A message is one turn of a conversation: a role tag and text content.
//! Messages are immutable once stored and their order within a session is
//! significant.

use serde::{Deserialize, Serialize};

/// Role of the author of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Instructions for the model
    System,
    /// The human side of the conversation
    User,
    /// The model side of the conversation
    Assistant,
    /// Any other tag (tool, function, ...), kept verbatim
    Other(String),
}

impl Role {
    /// Parse a role tag. Known tags are matched case-insensitively.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Other(tag.to_string()),
        }
    }

    /// Tag as written on the wire
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other(tag) => tag,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Role::System)
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Role::User)
    }
}

impl From<String> for Role {
    fn from(tag: String) -> Self {
        Role::parse(&tag)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Message {
    /// Create a message from a role tag and content
    pub fn new(role: impl AsRef<str>, content: impl Into<String>) -> Self {
        Self {
            role: Role::parse(role.as_ref()),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Whether the content carries anything beyond whitespace and punctuation
    pub fn is_substantive(&self) -> bool {
        self.content.chars().any(char::is_alphanumeric)
    }
}

/// A message as held by the store, with its position and ingestion sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The message itself
    pub message: Message,
    /// Zero-based position within the session
    pub position: usize,
    /// Engine-wide ingestion sequence; higher is more recent
    pub seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse("user"), Role::User);
        assert_eq!(Role::parse("  Assistant "), Role::Assistant);
        assert_eq!(Role::parse("SYSTEM"), Role::System);
        assert_eq!(Role::parse("tool"), Role::Other("tool".to_string()));
        assert_eq!(Role::parse("tool").as_str(), "tool");
    }

    #[test]
    fn test_role_serializes_as_tag() {
        let msg = Message::new("assistant", "hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);

        let back: Message = serde_json::from_str(r#"{"role":"User","content":"x"}"#).unwrap();
        assert_eq!(back.role, Role::User);
    }

    #[test]
    fn test_substantive_content() {
        assert!(Message::user("What is Paris?").is_substantive());
        assert!(!Message::user("").is_substantive());
        assert!(!Message::user("  ?! ").is_substantive());
        assert!(Message::user("日本").is_substantive());
    }
}
