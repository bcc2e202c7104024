use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::{ChatId, MessageRef, UserId};
use crate::ports::{
    AdminStatus, BotPermissions, ChatPort, InlineKeyboard, MemberPermissions, OutgoingMessage,
};
use crate::Result;

/// Minimum spacing between outbound messages, globally and per chat.
/// Defaults sit just under Telegram's documented limits.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    pub global_min_interval: Duration,
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return how long to wait for it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let at = self.next.max(now);
        self.next = at + self.interval;
        at.saturating_duration_since(now)
    }
}

/// Decorator that paces outbound sends and edits.
///
/// Deletions, restrictions, and reads pass straight through: holding back an
/// enforcement call only gives the violating message more screen time.
pub struct ThrottledChat {
    inner: Arc<dyn ChatPort>,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
    config: ThrottleConfig,
}

impl ThrottledChat {
    pub fn new(inner: Arc<dyn ChatPort>, config: ThrottleConfig) -> Self {
        Self {
            inner,
            global: Mutex::new(IntervalLimiter::new(config.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
            config,
        }
    }

    async fn pace(&self, chat_id: ChatId) {
        let global_wait = {
            let mut limiter = self.global.lock().await;
            limiter.reserve()
        };
        let chat_limiter = {
            let mut map = self.per_chat.lock().await;
            map.entry(chat_id.0)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(IntervalLimiter::new(
                        self.config.per_chat_min_interval,
                    )))
                })
                .clone()
        };
        let chat_wait = {
            let mut limiter = chat_limiter.lock().await;
            limiter.reserve()
        };
        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl ChatPort for ThrottledChat {
    fn bot_user_id(&self) -> UserId {
        self.inner.bot_user_id()
    }

    async fn admin_status(&self, chat_id: ChatId, user_id: UserId) -> Result<AdminStatus> {
        self.inner.admin_status(chat_id, user_id).await
    }

    async fn bot_permissions(&self, chat_id: ChatId) -> Result<BotPermissions> {
        self.inner.bot_permissions(chat_id).await
    }

    async fn chat_title(&self, chat_id: ChatId) -> Result<String> {
        self.inner.chat_title(chat_id).await
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.inner.delete_message(message).await
    }

    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.inner
            .restrict_user(chat_id, user_id, permissions, until)
            .await
    }

    async fn send_message(&self, chat_id: ChatId, message: OutgoingMessage) -> Result<MessageRef> {
        self.pace(chat_id).await;
        self.inner.send_message(chat_id, message).await
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.pace(message.chat_id).await;
        self.inner.edit_message(message, html, keyboard).await
    }
}
