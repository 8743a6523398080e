use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-user conversation context. History is capped and the whole record
/// expires after the retention window; expiry is enforced on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: String,
    pub messages: Vec<ConversationMessage>,
    pub last_activity: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl Conversation {
    pub fn new(user_id: &str, now: NaiveDateTime, ttl: Duration) -> Self {
        Self {
            user_id: user_id.to_string(),
            messages: vec![],
            last_activity: now,
            expires_at: now + ttl,
        }
    }

    /// Append a message, dropping the oldest entries past `max_history`.
    pub fn push(&mut self, message: ConversationMessage, max_history: usize) {
        self.messages.push(message);
        if self.messages.len() > max_history {
            let excess = self.messages.len() - max_history;
            self.messages.drain(..excess);
        }
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "assistant")
            .map(|m| m.content.as_str())
    }

    /// Refresh the activity timestamp and push expiry out by `ttl`.
    pub fn touch(&mut self, now: NaiveDateTime, ttl: Duration) {
        self.last_activity = now;
        self.expires_at = now + ttl;
    }
}

/// A webhook message as queued for deferred processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: Option<String>,
    #[serde(default)]
    pub image_count: u32,
}
