// src/model.rs
// Data model shared by the session and the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One entry in the transcript. `text` is HTML-safe: user-supplied text is
/// escaped before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
        }
    }
}

/// Payload of a document held by a session. Imported catalog files are
/// remote-backed references: the bytes stay server-side and are never
/// fabricated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentContent {
    Inline(Vec<u8>),
    RemoteBacked,
}

impl DocumentContent {
    pub fn len(&self) -> usize {
        match self {
            DocumentContent::Inline(bytes) => bytes.len(),
            DocumentContent::RemoteBacked => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A document known to a session, unique by name. The payload is opaque:
/// only the name ever reaches the remote services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub size: usize,
    pub uploaded_at: DateTime<Utc>,
    pub content: DocumentContent,
}

impl Document {
    pub fn inline(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len(),
            uploaded_at: Utc::now(),
            content: DocumentContent::Inline(bytes),
        }
    }

    /// A reference to a file that lives server-side; no local payload.
    pub fn remote_backed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            uploaded_at: Utc::now(),
            content: DocumentContent::RemoteBacked,
        }
    }
}

/// One row of the server-side file listing. `size` and `created` arrive
/// already formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFileEntry {
    pub name: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub created: String,
}

impl ServerFileEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: String::new(),
            created: String::new(),
        }
    }
}
