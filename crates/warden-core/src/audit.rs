use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::domain::{ChatId, UserId};
use crate::Result;

/// Longest text fragment kept in an audit record.
pub const AUDIT_MAX_TEXT: usize = 500;

pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

/// Truncate to `max_len` characters, marking the cut with an ellipsis.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len).collect();
    format!("{kept}...")
}

/// One audit record. Unused fields stay out of the serialized form.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            user_id: None,
            username: None,
            chat_id: None,
            command: None,
            content: None,
            reason: None,
            error: None,
            context: None,
        }
    }

    pub fn command(user_id: UserId, username: &str, chat_id: ChatId, command: &str) -> Self {
        Self {
            user_id: Some(user_id.0),
            username: Some(username.to_string()),
            chat_id: Some(chat_id.0),
            command: Some(command.to_string()),
            ..Self::base("command")
        }
    }

    pub fn violation(chat_id: ChatId, user_id: UserId, reason: &str, excerpt: &str) -> Self {
        Self {
            chat_id: Some(chat_id.0),
            user_id: Some(user_id.0),
            reason: Some(reason.to_string()),
            content: Some(excerpt.to_string()),
            ..Self::base("violation")
        }
    }

    pub fn mute(chat_id: ChatId, user_id: UserId, reason: &str) -> Self {
        Self {
            chat_id: Some(chat_id.0),
            user_id: Some(user_id.0),
            reason: Some(reason.to_string()),
            ..Self::base("mute")
        }
    }

    pub fn unmute(chat_id: ChatId, user_id: UserId, by: UserId) -> Self {
        Self {
            chat_id: Some(chat_id.0),
            user_id: Some(user_id.0),
            context: Some(format!("lifted by {}", by.0)),
            ..Self::base("unmute")
        }
    }

    pub fn approve(chat_id: ChatId, by: UserId, days: i64) -> Self {
        Self {
            chat_id: Some(chat_id.0),
            user_id: Some(by.0),
            context: Some(format!("approved for {days} days")),
            ..Self::base("approve")
        }
    }

    pub fn broadcast(by: UserId, delivered: usize, failed: usize) -> Self {
        Self {
            user_id: Some(by.0),
            context: Some(format!("delivered {delivered}, failed {failed}")),
            ..Self::base("broadcast")
        }
    }

    pub fn rate_limit(user_id: UserId, username: &str, chat_id: ChatId) -> Self {
        Self {
            user_id: Some(user_id.0),
            username: Some(username.to_string()),
            chat_id: Some(chat_id.0),
            ..Self::base("rate_limit")
        }
    }

    pub fn error(context: &str, error: &str) -> Self {
        Self {
            context: Some(context.to_string()),
            error: Some(error.to_string()),
            ..Self::base("error")
        }
    }

    pub fn with_chat(mut self, chat_id: ChatId) -> Self {
        self.chat_id = Some(chat_id.0);
        self
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id.0);
        self
    }
}

/// Append-only audit trail, one JSON line or plain-text block per event.
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: &Path, json: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            json,
        }
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(content) = event.content.take() {
            event.content = Some(truncate_text(&content, AUDIT_MAX_TEXT));
        }
        if let Some(error) = event.error.take() {
            event.error = Some(truncate_text(&error, AUDIT_MAX_TEXT));
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
        } else {
            writeln!(file, "{}", "=".repeat(60))?;
            writeln!(file, "[{}] {}", event.timestamp, event.event)?;
            if let Some(user_id) = event.user_id {
                writeln!(file, "user: {user_id}")?;
            }
            if let Some(username) = &event.username {
                writeln!(file, "username: {username}")?;
            }
            if let Some(chat_id) = event.chat_id {
                writeln!(file, "chat: {chat_id}")?;
            }
            if let Some(command) = &event.command {
                writeln!(file, "command: {command}")?;
            }
            if let Some(reason) = &event.reason {
                writeln!(file, "reason: {reason}")?;
            }
            if let Some(content) = &event.content {
                writeln!(file, "content: {content}")?;
            }
            if let Some(error) = &event.error {
                writeln!(file, "error: {error}")?;
            }
            if let Some(context) = &event.context {
                writeln!(file, "context: {context}")?;
            }
        }
        Ok(())
    }
}
