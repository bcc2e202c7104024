//! In-memory fakes shared by the unit tests in this crate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::Config;
use crate::domain::{ChatId, MessageId, MessageRef, UserId};
use crate::errors::Error;
use crate::ports::{
    AdminStatus, BotPermissions, ChatPort, InlineKeyboard, MemberPermissions, OutgoingMessage,
};
use crate::Result;

/// Clock whose time only moves when a test says so.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub(crate) fn test_config() -> Arc<Config> {
    Arc::new(Config {
        bot_token: "test-token".to_string(),
        developer_id: 9000,
        developer_contact: Some("@operator".to_string()),
        mute_duration: chrono::Duration::minutes(3),
        expiry_warning_days: 3,
        command_limit: 5,
        admin_command_limit: 10,
        command_window: chrono::Duration::seconds(60),
        store_path: PathBuf::from("unused.json"),
        api_timeout: Duration::from_secs(10),
        broadcast_concurrency: 8,
        audit_log_path: std::env::temp_dir().join("warden-test-audit.log"),
        audit_log_json: false,
    })
}

/// In-memory `ChatPort` that records every call and fails on demand.
#[derive(Default)]
pub(crate) struct FakeChat {
    pub admins: Mutex<HashMap<(i64, i64), AdminStatus>>,
    pub bot_perms: Mutex<HashMap<i64, BotPermissions>>,
    pub titles: Mutex<HashMap<i64, String>>,
    pub fail_deletes: AtomicBool,
    pub fail_restricts: AtomicBool,
    pub fail_sends: AtomicBool,
    pub fail_status_probes: AtomicBool,
    pub fail_perm_probes: AtomicBool,
    pub perm_probes: AtomicUsize,
    pub deletes: Mutex<Vec<MessageRef>>,
    pub restricts: Mutex<Vec<(ChatId, UserId, MemberPermissions, Option<DateTime<Utc>>)>>,
    pub sends: Mutex<Vec<(ChatId, OutgoingMessage)>>,
    pub edits: Mutex<Vec<(MessageRef, String)>>,
    next_message_id: AtomicI32,
}

impl FakeChat {
    pub const BOT: UserId = UserId(999_000);

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn grant_admin(&self, chat_id: ChatId, user_id: UserId) {
        self.admins
            .lock()
            .unwrap()
            .insert((chat_id.0, user_id.0), AdminStatus::Administrator);
    }

    pub fn set_bot_permissions(&self, chat_id: ChatId, perms: BotPermissions) {
        self.bot_perms.lock().unwrap().insert(chat_id.0, perms);
    }

    pub fn set_title(&self, chat_id: ChatId, title: &str) {
        self.titles
            .lock()
            .unwrap()
            .insert(chat_id.0, title.to_string());
    }

    pub fn probe_count(&self) -> usize {
        self.perm_probes.load(Ordering::SeqCst)
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.html.clone())
            .collect()
    }
}

pub(crate) fn full_permissions() -> BotPermissions {
    BotPermissions {
        is_admin: true,
        can_delete_messages: true,
        can_restrict_members: true,
    }
}

#[async_trait]
impl ChatPort for FakeChat {
    fn bot_user_id(&self) -> UserId {
        Self::BOT
    }

    async fn admin_status(&self, chat_id: ChatId, user_id: UserId) -> Result<AdminStatus> {
        if self.fail_status_probes.load(Ordering::SeqCst) {
            return Err(Error::Platform("status probe failed".to_string()));
        }
        Ok(self
            .admins
            .lock()
            .unwrap()
            .get(&(chat_id.0, user_id.0))
            .copied()
            .unwrap_or(AdminStatus::Other))
    }

    async fn bot_permissions(&self, chat_id: ChatId) -> Result<BotPermissions> {
        self.perm_probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_perm_probes.load(Ordering::SeqCst) {
            return Err(Error::Platform("permission probe failed".to_string()));
        }
        Ok(self
            .bot_perms
            .lock()
            .unwrap()
            .get(&chat_id.0)
            .copied()
            .unwrap_or_default())
    }

    async fn chat_title(&self, chat_id: ChatId) -> Result<String> {
        match self.titles.lock().unwrap().get(&chat_id.0) {
            Some(title) => Ok(title.clone()),
            None => Err(Error::Platform("chat not found".to_string())),
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Platform("delete failed".to_string()));
        }
        self.deletes.lock().unwrap().push(message);
        Ok(())
    }

    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.fail_restricts.load(Ordering::SeqCst) {
            return Err(Error::Platform("restrict failed".to_string()));
        }
        self.restricts
            .lock()
            .unwrap()
            .push((chat_id, user_id, permissions, until));
        Ok(())
    }

    async fn send_message(&self, chat_id: ChatId, message: OutgoingMessage) -> Result<MessageRef> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Platform("send failed".to_string()));
        }
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sends.lock().unwrap().push((chat_id, message));
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        html: &str,
        _keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Platform("edit failed".to_string()));
        }
        self.edits.lock().unwrap().push((message, html.to_string()));
        Ok(())
    }
}
