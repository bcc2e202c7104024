use std::sync::Arc;

use regex::Regex;

use crate::clock::Clock;
use crate::domain::{ChatId, UserId};
use crate::store::{FilteredWord, RecordStore};
use crate::Result;

/// Matches http/https URLs anywhere in the text, case-insensitively.
const LINK_PATTERN: &str =
    r"(?i)https?://(?:[a-zA-Z]|[0-9]|[$-_@.&+]|[!*\(\),]|(?:%[0-9a-fA-F]{2}))+";

/// What a message was removed for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    UnauthorizedLink,
    FilteredWord(String),
}

impl Violation {
    /// Human-readable reason stored with the mute and shown in the chat.
    pub fn reason(&self) -> String {
        match self {
            Violation::UnauthorizedLink => "Posted unauthorized link".to_string(),
            Violation::FilteredWord(word) => format!("Posted filtered word: {word}"),
        }
    }
}

/// Decides whether a message violates a channel's content rules and manages
/// the per-channel word lists.
pub struct ContentPolicy {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    link_pattern: Regex,
}

/// Outcome of an `add_words` call, split for reporting back to the admin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WordChanges {
    pub added: Vec<String>,
    pub already_present: Vec<String>,
}

impl ContentPolicy {
    pub fn new(store: Arc<RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let link_pattern = Regex::new(LINK_PATTERN).expect("link pattern compiles");
        Self {
            store,
            clock,
            link_pattern,
        }
    }

    /// Scan a message. Links outrank filtered words; words are checked as
    /// lowercase substrings in list order, first hit wins.
    pub async fn scan(&self, channel_id: ChatId, text: &str) -> Option<Violation> {
        if self.link_pattern.is_match(text) {
            return Some(Violation::UnauthorizedLink);
        }
        let lowered = text.to_lowercase();
        for entry in self.store.list_words(channel_id).await {
            if lowered.contains(&entry.word) {
                return Some(Violation::FilteredWord(entry.word));
            }
        }
        None
    }

    /// Add words to a channel's filter. Words are trimmed and lowercased;
    /// empty tokens are dropped.
    pub async fn add_words(
        &self,
        channel_id: ChatId,
        words: &[String],
        added_by: UserId,
    ) -> Result<WordChanges> {
        let mut changes = WordChanges::default();
        let now = self.clock.now();
        for raw in words {
            let word = raw.trim().to_lowercase();
            if word.is_empty() {
                continue;
            }
            let inserted = self
                .store
                .insert_word(
                    channel_id,
                    FilteredWord {
                        word: word.clone(),
                        added_by,
                        added_at: now,
                    },
                )
                .await?;
            if inserted {
                changes.added.push(word);
            } else {
                changes.already_present.push(word);
            }
        }
        Ok(changes)
    }

    /// Remove one word. Returns false when it was not in the list.
    pub async fn remove_word(&self, channel_id: ChatId, word: &str) -> Result<bool> {
        let word = word.trim().to_lowercase();
        if word.is_empty() {
            return Ok(false);
        }
        self.store.remove_word(channel_id, &word).await
    }

    pub async fn list_words(&self, channel_id: ChatId) -> Vec<FilteredWord> {
        self.store.list_words(channel_id).await
    }

    pub async fn count_words(&self, channel_id: ChatId) -> usize {
        self.store.list_words(channel_id).await.len()
    }
}
