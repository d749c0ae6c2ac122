//! Incoming chat messages, as delivered by the host chat room.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::message::ThreadId;

/// A message received from a chat room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID
    pub id: String,

    /// The chat room this message belongs to; doubles as the thread id
    pub chat_id: String,

    /// Sender identifier
    pub sender: String,

    /// The text the user typed
    pub body: String,

    /// Files and cells attached to the message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(chat_id: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            sender: sender.into(),
            body: body.into(),
            attachments: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// The conversation thread this message is part of.
    pub fn thread_id(&self) -> ThreadId {
        ThreadId::from(self.chat_id.as_str())
    }
}

/// An attachment on a chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Type of attachment
    pub kind: AttachmentKind,

    /// Path relative to the workspace root
    pub path: String,

    /// For notebook cells, the id of the attached cell
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,

    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Attachment {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::File,
            path: path.into(),
            cell_id: None,
            mime_type: None,
        }
    }

    pub fn notebook_cell(path: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::NotebookCell,
            path: path.into(),
            cell_id: Some(cell_id.into()),
            mime_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    File,
    NotebookCell,
    Other,
}
