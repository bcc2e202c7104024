use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{ChatId, MessageId, UserId};
use crate::Result;

/// A group the operator has approved for moderation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovedChannel {
    pub channel_id: ChatId,
    pub title: String,
    pub approved_by: UserId,
    pub approved_at: DateTime<Utc>,
    /// Cached result of the last permission probe.
    pub has_admin_permissions: bool,
    /// `None` means the approval never expires.
    pub valid_until: Option<DateTime<Utc>>,
}

/// A group the bot was added to that still awaits operator approval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingGroup {
    pub group_id: ChatId,
    pub title: String,
    pub invited_by: UserId,
    pub added_at: DateTime<Utc>,
    /// Our "awaiting approval" reply in the group.
    pub request_message_id: MessageId,
}

/// A word banned in one channel. Matching is case-insensitive substring.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilteredWord {
    pub word: String,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

/// An active temporary restriction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutedUser {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub muted_until: DateTime<Utc>,
    pub muted_by: UserId,
    pub reason: String,
    /// The enforcement notice carrying the unmute button, once sent.
    pub notice_message_id: Option<MessageId>,
}

/// Fixed-window command counter for one user.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CommandUsage {
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    approved_channels: Vec<ApprovedChannel>,
    pending_groups: Vec<PendingGroup>,
    filtered_words: HashMap<i64, Vec<FilteredWord>>,
    muted_users: Vec<MutedUser>,
    command_usage: HashMap<i64, CommandUsage>,
}

/// Keyed persistence for every moderation record.
///
/// Tables live in memory behind one lock and are snapshotted to a JSON file
/// on each mutation. No moderation semantics here: components interpret the
/// records, the store only keeps them.
pub struct RecordStore {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
}

impl RecordStore {
    /// Open (or create) a store backed by a JSON snapshot file.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            tables: Mutex::new(tables),
        })
    }

    /// Volatile store for tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        if let Some(path) = &self.path {
            std::fs::write(path, serde_json::to_string(tables)?)?;
        }
        Ok(())
    }

    // ============== Approved channels ==============

    /// Insert a channel record. Returns false (and writes nothing) when a
    /// record for the channel already exists.
    pub async fn insert_channel(&self, channel: ApprovedChannel) -> Result<bool> {
        let mut t = self.tables.lock().await;
        if t.approved_channels
            .iter()
            .any(|c| c.channel_id == channel.channel_id)
        {
            return Ok(false);
        }
        t.approved_channels.push(channel);
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn get_channel(&self, channel_id: ChatId) -> Option<ApprovedChannel> {
        let t = self.tables.lock().await;
        t.approved_channels
            .iter()
            .find(|c| c.channel_id == channel_id)
            .cloned()
    }

    pub async fn remove_channel(&self, channel_id: ChatId) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let before = t.approved_channels.len();
        t.approved_channels.retain(|c| c.channel_id != channel_id);
        if t.approved_channels.len() == before {
            return Ok(false);
        }
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn set_channel_permissions(
        &self,
        channel_id: ChatId,
        has_admin_permissions: bool,
    ) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let Some(channel) = t
            .approved_channels
            .iter_mut()
            .find(|c| c.channel_id == channel_id)
        else {
            return Ok(false);
        };
        channel.has_admin_permissions = has_admin_permissions;
        self.persist(&t)?;
        Ok(true)
    }

    /// All approved channels in approval order.
    pub async fn list_channels(&self) -> Vec<ApprovedChannel> {
        let t = self.tables.lock().await;
        t.approved_channels.clone()
    }

    // ============== Pending groups ==============

    pub async fn insert_pending(&self, group: PendingGroup) -> Result<bool> {
        let mut t = self.tables.lock().await;
        if t.pending_groups.iter().any(|g| g.group_id == group.group_id) {
            return Ok(false);
        }
        t.pending_groups.push(group);
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn get_pending(&self, group_id: ChatId) -> Option<PendingGroup> {
        let t = self.tables.lock().await;
        t.pending_groups
            .iter()
            .find(|g| g.group_id == group_id)
            .cloned()
    }

    pub async fn remove_pending(&self, group_id: ChatId) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let before = t.pending_groups.len();
        t.pending_groups.retain(|g| g.group_id != group_id);
        if t.pending_groups.len() == before {
            return Ok(false);
        }
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn list_pending(&self) -> Vec<PendingGroup> {
        let t = self.tables.lock().await;
        t.pending_groups.clone()
    }

    // ============== Filtered words ==============

    /// Insert a word for a channel. Returns false when the word is already
    /// in that channel's list.
    pub async fn insert_word(&self, channel_id: ChatId, word: FilteredWord) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let list = t.filtered_words.entry(channel_id.0).or_default();
        if list.iter().any(|w| w.word == word.word) {
            return Ok(false);
        }
        list.push(word);
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn remove_word(&self, channel_id: ChatId, word: &str) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let Some(list) = t.filtered_words.get_mut(&channel_id.0) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|w| w.word != word);
        if list.len() == before {
            return Ok(false);
        }
        if list.is_empty() {
            t.filtered_words.remove(&channel_id.0);
        }
        self.persist(&t)?;
        Ok(true)
    }

    /// Words for a channel in insertion order.
    pub async fn list_words(&self, channel_id: ChatId) -> Vec<FilteredWord> {
        let t = self.tables.lock().await;
        t.filtered_words
            .get(&channel_id.0)
            .cloned()
            .unwrap_or_default()
    }

    // ============== Muted users ==============

    /// Insert or replace the mute record for (chat, user).
    pub async fn upsert_mute(&self, mute: MutedUser) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.muted_users
            .retain(|m| !(m.chat_id == mute.chat_id && m.user_id == mute.user_id));
        t.muted_users.push(mute);
        self.persist(&t)?;
        Ok(())
    }

    pub async fn get_mute(&self, chat_id: ChatId, user_id: UserId) -> Option<MutedUser> {
        let t = self.tables.lock().await;
        t.muted_users
            .iter()
            .find(|m| m.chat_id == chat_id && m.user_id == user_id)
            .cloned()
    }

    pub async fn remove_mute(&self, chat_id: ChatId, user_id: UserId) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let before = t.muted_users.len();
        t.muted_users
            .retain(|m| !(m.chat_id == chat_id && m.user_id == user_id));
        if t.muted_users.len() == before {
            return Ok(false);
        }
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn set_mute_notice(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        notice_message_id: MessageId,
    ) -> Result<bool> {
        let mut t = self.tables.lock().await;
        let Some(mute) = t
            .muted_users
            .iter_mut()
            .find(|m| m.chat_id == chat_id && m.user_id == user_id)
        else {
            return Ok(false);
        };
        mute.notice_message_id = Some(notice_message_id);
        self.persist(&t)?;
        Ok(true)
    }

    pub async fn count_mutes(&self, chat_id: Option<ChatId>) -> usize {
        let t = self.tables.lock().await;
        match chat_id {
            Some(id) => t.muted_users.iter().filter(|m| m.chat_id == id).count(),
            None => t.muted_users.len(),
        }
    }

    // ============== Command usage ==============

    /// Read-modify-write a user's usage counter under the table lock.
    /// The caller owns the windowing logic; leaving `None` clears the row.
    pub async fn update_usage<R>(
        &self,
        user_id: UserId,
        f: impl FnOnce(&mut Option<CommandUsage>) -> R,
    ) -> Result<R> {
        let mut t = self.tables.lock().await;
        let mut entry = t.command_usage.get(&user_id.0).copied();
        let out = f(&mut entry);
        match entry {
            Some(usage) => {
                t.command_usage.insert(user_id.0, usage);
            }
            None => {
                t.command_usage.remove(&user_id.0);
            }
        }
        self.persist(&t)?;
        Ok(out)
    }

    pub async fn get_usage(&self, user_id: UserId) -> Option<CommandUsage> {
        let t = self.tables.lock().await;
        t.command_usage.get(&user_id.0).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tmp_store_path(prefix: &str) -> PathBuf {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        std::env::temp_dir().join(format!("{}-{}-{}.json", prefix, std::process::id(), millis))
    }

    fn channel(id: i64, title: &str) -> ApprovedChannel {
        ApprovedChannel {
            channel_id: ChatId(id),
            title: title.to_string(),
            approved_by: UserId(1),
            approved_at: Utc::now(),
            has_admin_permissions: true,
            valid_until: Some(Utc::now() + chrono::Duration::days(7)),
        }
    }

    fn word(text: &str) -> FilteredWord {
        FilteredWord {
            word: text.to_string(),
            added_by: UserId(1),
            added_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_insert_is_unique_and_ordered() {
        let store = RecordStore::in_memory();
        assert!(store.insert_channel(channel(-1, "first")).await.unwrap());
        assert!(store.insert_channel(channel(-2, "second")).await.unwrap());
        assert!(!store.insert_channel(channel(-1, "dup")).await.unwrap());

        let listed = store.list_channels().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "first");
        assert_eq!(listed[1].title, "second");
    }

    #[tokio::test]
    async fn word_lists_keep_insertion_order_per_channel() {
        let store = RecordStore::in_memory();
        let chat = ChatId(-100);
        assert!(store.insert_word(chat, word("spam")).await.unwrap());
        assert!(store.insert_word(chat, word("scam")).await.unwrap());
        assert!(!store.insert_word(chat, word("spam")).await.unwrap());

        let words: Vec<String> = store
            .list_words(chat)
            .await
            .into_iter()
            .map(|w| w.word)
            .collect();
        assert_eq!(words, vec!["spam", "scam"]);

        assert!(store.list_words(ChatId(-200)).await.is_empty());
    }

    #[tokio::test]
    async fn remove_word_reports_absence() {
        let store = RecordStore::in_memory();
        let chat = ChatId(-100);
        store.insert_word(chat, word("spam")).await.unwrap();
        assert!(store.remove_word(chat, "spam").await.unwrap());
        assert!(!store.remove_word(chat, "spam").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_mute_replaces_existing_row() {
        let store = RecordStore::in_memory();
        let base = MutedUser {
            user_id: UserId(7),
            chat_id: ChatId(-1),
            muted_until: Utc::now(),
            muted_by: UserId(1),
            reason: "first".to_string(),
            notice_message_id: None,
        };
        store.upsert_mute(base.clone()).await.unwrap();
        store
            .upsert_mute(MutedUser {
                reason: "second".to_string(),
                ..base
            })
            .await
            .unwrap();

        assert_eq!(store.count_mutes(None).await, 1);
        let row = store.get_mute(ChatId(-1), UserId(7)).await.unwrap();
        assert_eq!(row.reason, "second");
    }

    #[tokio::test]
    async fn usage_update_can_clear_the_row() {
        let store = RecordStore::in_memory();
        store
            .update_usage(UserId(5), |entry| {
                *entry = Some(CommandUsage {
                    window_start: Utc::now(),
                    count: 1,
                });
            })
            .await
            .unwrap();
        assert!(store.get_usage(UserId(5)).await.is_some());

        store
            .update_usage(UserId(5), |entry| {
                *entry = None;
            })
            .await
            .unwrap();
        assert!(store.get_usage(UserId(5)).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let path = tmp_store_path("warden-store-test");
        {
            let store = RecordStore::open(&path).unwrap();
            store.insert_channel(channel(-5, "kept")).await.unwrap();
            store.insert_word(ChatId(-5), word("spam")).await.unwrap();
        }

        let reopened = RecordStore::open(&path).unwrap();
        let listed = reopened.list_channels().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "kept");
        assert_eq!(reopened.list_words(ChatId(-5)).await.len(), 1);

        let _ = std::fs::remove_file(&path);
    }
}
