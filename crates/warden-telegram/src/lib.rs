//! Telegram adapter for the Warden moderation core.
//!
//! [`TelegramChat`] implements the core's `ChatPort` on top of teloxide;
//! `router` wires the dispatcher and `handlers` hold the update endpoints.

use std::future::IntoFuture;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberKind, ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode,
};

use warden_core::domain::{ChatId, MessageId, MessageRef, UserId};
use warden_core::ports::{
    AdminStatus, BotPermissions, ButtonAction, ChatPort, InlineKeyboard, MemberPermissions,
    OutgoingMessage,
};
use warden_core::{Error, Result};

pub mod handlers;
pub mod router;

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn tg_user(user_id: UserId) -> teloxide::types::UserId {
    teloxide::types::UserId(user_id.0 as u64)
}

fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
    teloxide::types::MessageId(message_id.0)
}

fn tg_permissions(permissions: MemberPermissions) -> ChatPermissions {
    let mut out = ChatPermissions::empty();
    if permissions.can_send_messages {
        out |= ChatPermissions::SEND_MESSAGES;
    }
    if permissions.can_send_media {
        out |= ChatPermissions::SEND_MEDIA_MESSAGES;
    }
    if permissions.can_send_other {
        out |= ChatPermissions::SEND_POLLS | ChatPermissions::SEND_OTHER_MESSAGES;
    }
    if permissions.can_add_web_page_previews {
        out |= ChatPermissions::ADD_WEB_PAGE_PREVIEWS;
    }
    out
}

/// One button per row. A button with an unparseable URL is dropped rather
/// than failing the whole send.
fn tg_keyboard(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .buttons
        .iter()
        .filter_map(|b| {
            let button = match &b.action {
                ButtonAction::Callback(data) => {
                    InlineKeyboardButton::callback(b.label.clone(), data.clone())
                }
                ButtonAction::Url(raw) => {
                    InlineKeyboardButton::url(b.label.clone(), url::Url::parse(raw).ok()?)
                }
            };
            Some(vec![button])
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn map_err(e: teloxide::RequestError) -> Error {
    Error::Platform(format!("telegram error: {e}"))
}

/// `ChatPort` backed by the Telegram Bot API.
pub struct TelegramChat {
    bot: Bot,
    bot_user_id: UserId,
    bot_username: String,
    call_timeout: Duration,
}

impl TelegramChat {
    /// Resolve the bot's own identity and build the port.
    pub async fn connect(bot: Bot, call_timeout: Duration) -> Result<Self> {
        let me = bot.get_me().await.map_err(map_err)?;
        Ok(Self {
            bot_user_id: UserId(me.user.id.0 as i64),
            bot_username: me.username().to_string(),
            bot,
            call_timeout,
        })
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    /// Run a Telegram call with the configured timeout, honoring one
    /// flood-control `RetryAfter` before giving up.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match tokio::time::timeout(self.call_timeout, op().into_future()).await {
                Err(_) => return Err(Error::Platform("telegram call timed out".to_string())),
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(teloxide::RequestError::RetryAfter(delay))) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(delay).await;
                }
                Ok(Err(e)) => return Err(map_err(e)),
            }
        }
    }
}

#[async_trait]
impl ChatPort for TelegramChat {
    fn bot_user_id(&self) -> UserId {
        self.bot_user_id
    }

    async fn admin_status(&self, chat_id: ChatId, user_id: UserId) -> Result<AdminStatus> {
        let member = self
            .with_retry(|| self.bot.get_chat_member(tg_chat(chat_id), tg_user(user_id)))
            .await?;
        Ok(match member.kind {
            ChatMemberKind::Owner(_) => AdminStatus::Owner,
            ChatMemberKind::Administrator(_) => AdminStatus::Administrator,
            _ => AdminStatus::Other,
        })
    }

    async fn bot_permissions(&self, chat_id: ChatId) -> Result<BotPermissions> {
        let member = self
            .with_retry(|| {
                self.bot
                    .get_chat_member(tg_chat(chat_id), tg_user(self.bot_user_id))
            })
            .await?;
        Ok(match member.kind {
            ChatMemberKind::Owner(_) => BotPermissions {
                is_admin: true,
                can_delete_messages: true,
                can_restrict_members: true,
            },
            ChatMemberKind::Administrator(admin) => BotPermissions {
                is_admin: true,
                can_delete_messages: admin.can_delete_messages,
                can_restrict_members: admin.can_restrict_members,
            },
            _ => BotPermissions::default(),
        })
    }

    async fn chat_title(&self, chat_id: ChatId) -> Result<String> {
        let chat = self
            .with_retry(|| self.bot.get_chat(tg_chat(chat_id)))
            .await?;
        Ok(chat
            .title()
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("chat {}", chat_id.0)))
    }

    async fn delete_message(&self, message: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(tg_chat(message.chat_id), tg_msg_id(message.message_id))
        })
        .await?;
        Ok(())
    }

    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let perms = tg_permissions(permissions);
        self.with_retry(|| {
            let mut req = self
                .bot
                .restrict_chat_member(tg_chat(chat_id), tg_user(user_id), perms);
            if let Some(until) = until {
                req = req.until_date(until);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn send_message(&self, chat_id: ChatId, message: OutgoingMessage) -> Result<MessageRef> {
        let sent = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(tg_chat(chat_id), message.html.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(reply_to) = message.reply_to {
                    req = req.reply_to_message_id(tg_msg_id(reply_to));
                }
                if let Some(keyboard) = &message.keyboard {
                    req = req.reply_markup(tg_keyboard(keyboard));
                }
                req
            })
            .await?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(sent.id.0),
        })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let html = html.to_string();
        self.with_retry(|| {
            let mut req = self
                .bot
                .edit_message_text(
                    tg_chat(message.chat_id),
                    tg_msg_id(message.message_id),
                    html.clone(),
                )
                .parse_mode(ParseMode::Html);
            if let Some(keyboard) = &keyboard {
                req = req.reply_markup(tg_keyboard(keyboard));
            }
            req
        })
        .await?;
        Ok(())
    }
}
