use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ChatId, MessageId, MessageRef, UserId};
use crate::Result;

/// A member's standing in a chat, reduced to what moderation cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminStatus {
    Owner,
    Administrator,
    /// Regular member, restricted member, or not in the chat at all.
    Other,
}

impl AdminStatus {
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Owner | Self::Administrator)
    }
}

/// The bot's own privileges in a chat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BotPermissions {
    pub is_admin: bool,
    pub can_delete_messages: bool,
    pub can_restrict_members: bool,
}

impl BotPermissions {
    /// True when the bot can actually enforce: delete and restrict.
    pub fn sufficient(self) -> bool {
        self.is_admin && self.can_delete_messages && self.can_restrict_members
    }
}

/// Permission set applied by [`ChatPort::restrict_user`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemberPermissions {
    pub can_send_messages: bool,
    pub can_send_media: bool,
    pub can_send_other: bool,
    pub can_add_web_page_previews: bool,
}

impl MemberPermissions {
    pub fn muted() -> Self {
        Self {
            can_send_messages: false,
            can_send_media: false,
            can_send_other: false,
            can_add_web_page_previews: false,
        }
    }

    pub fn unrestricted() -> Self {
        Self {
            can_send_messages: true,
            can_send_media: true,
            can_send_other: true,
            can_add_web_page_previews: true,
        }
    }
}

/// What pressing an inline button does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    /// Sends the payload back as a callback query.
    Callback(String),
    /// Opens the link.
    Url(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// One button per row, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    /// A keyboard with one callback button.
    pub fn single(label: &str, callback_data: &str) -> Self {
        Self {
            buttons: vec![InlineButton::callback(label, callback_data)],
        }
    }
}

/// An outbound message. `html` is rendered with Telegram HTML parse mode.
#[derive(Clone, Debug)]
pub struct OutgoingMessage {
    pub html: String,
    pub reply_to: Option<MessageId>,
    pub keyboard: Option<InlineKeyboard>,
}

impl OutgoingMessage {
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            html: text.into(),
            reply_to: None,
            keyboard: None,
        }
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Transport operations the moderation core needs from the chat platform.
///
/// Telegram is the production implementation; tests use in-memory fakes.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// The bot's own user id, so it never moderates itself.
    fn bot_user_id(&self) -> UserId;

    async fn admin_status(&self, chat_id: ChatId, user_id: UserId) -> Result<AdminStatus>;
    async fn bot_permissions(&self, chat_id: ChatId) -> Result<BotPermissions>;
    async fn chat_title(&self, chat_id: ChatId) -> Result<String>;

    async fn delete_message(&self, message: MessageRef) -> Result<()>;
    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn send_message(&self, chat_id: ChatId, message: OutgoingMessage) -> Result<MessageRef>;
    async fn edit_message(
        &self,
        message: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()>;
}
