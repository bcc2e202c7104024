use std::sync::Arc;

use teloxide::prelude::*;
use tracing::error;

use warden_core::audit::{truncate_text, AuditEvent};
use warden_core::domain::{ChatId, MessageId, UserId};
use warden_core::engine::InboundMessage;
use warden_core::formatting::escape_html;

use super::notify_developer;
use crate::router::AppState;

/// Passive moderation for plain group traffic. Nothing is ever reported to
/// the chat from here; unexpected failures go to the operator.
pub async fn handle_group_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !(msg.chat.is_group() || msg.chat.is_supergroup()) {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };

    let inbound = InboundMessage {
        chat_id: ChatId(msg.chat.id.0),
        message_id: MessageId(msg.id.0),
        sender: UserId(user.id.0 as i64),
        sender_username: user.username.clone(),
        text: text.to_string(),
    };

    if let Err(e) = state.engine.moderate_message(&inbound).await {
        error!(chat = msg.chat.id.0, error = %e, "moderation pipeline failed");
        state
            .engine
            .audit(AuditEvent::error("moderate_message", &e.to_string()).with_chat(inbound.chat_id));
        notify_developer(
            &state,
            format!(
                "⚠️ Moderation failed in chat <code>{}</code>:\n<code>{}</code>",
                msg.chat.id.0,
                escape_html(&truncate_text(&e.to_string(), 500))
            ),
        )
        .await;
    }
    Ok(())
}
