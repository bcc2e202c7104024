use std::sync::Arc;

use teloxide::prelude::*;
use tracing::error;

use warden_core::audit::AuditEvent;
use warden_core::domain::{ChatId, MessageId, MessageRef, UserId};
use warden_core::errors::Error;
use warden_core::formatting::escape_html;
use warden_core::ports::InlineKeyboard;

use super::commands;
use crate::router::AppState;

/// Inline-button presses: the welcome/help navigation buttons and the
/// unmute button attached to mute notices.
pub async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(data) = query.data.clone() else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };
    let Some(message) = query.message.as_ref() else {
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };
    let view = MessageRef {
        chat_id: ChatId(message.chat.id.0),
        message_id: MessageId(message.id.0),
    };
    let requester = UserId(query.from.id.0 as i64);

    match data.as_str() {
        "help" => {
            let text = commands::help_text(state.engine.is_developer(requester));
            let back = InlineKeyboard::single("⬅️ Back to start", "start");
            let _ = state.chat.edit_message(view, &text, Some(back)).await;
            bot.answer_callback_query(&query.id).await?;
            Ok(())
        }
        "start" => {
            let text = commands::welcome_text(&state);
            let keyboard = commands::welcome_keyboard(&state);
            let _ = state.chat.edit_message(view, &text, Some(keyboard)).await;
            bot.answer_callback_query(&query.id).await?;
            Ok(())
        }
        _ => match parse_unmute(&data) {
            Some((chat_id, target)) => {
                unmute(bot, query, state, view, chat_id, target, requester).await
            }
            None => {
                bot.answer_callback_query(&query.id)
                    .text("Unknown action")
                    .await?;
                Ok(())
            }
        },
    }
}

fn parse_unmute(data: &str) -> Option<(ChatId, UserId)> {
    let rest = data.strip_prefix("unmute:")?;
    let mut parts = rest.split(':');
    let (Some(chat_raw), Some(user_raw), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    let chat_id = chat_raw.parse::<i64>().ok()?;
    let target = user_raw.parse::<i64>().ok()?;
    Some((ChatId(chat_id), UserId(target)))
}

async fn unmute(
    bot: Bot,
    query: CallbackQuery,
    state: Arc<AppState>,
    notice: MessageRef,
    chat_id: ChatId,
    target: UserId,
    requester: UserId,
) -> ResponseResult<()> {
    match state.mutes.unmute(chat_id, target, requester).await {
        Ok(()) => {
            state
                .engine
                .audit(AuditEvent::unmute(chat_id, target, requester));
            let by = query
                .from
                .username
                .as_deref()
                .map(|name| format!("@{}", escape_html(name)))
                .unwrap_or_else(|| "an admin".to_string());
            let _ = state
                .chat
                .edit_message(
                    notice,
                    &format!("🔊 User <code>{}</code> was unmuted by {by}.", target.0),
                    None,
                )
                .await;
            bot.answer_callback_query(&query.id).text("Unmuted").await?;
        }
        Err(Error::NotAuthorized(reason)) => {
            bot.answer_callback_query(&query.id)
                .text(reason)
                .show_alert(true)
                .await?;
        }
        Err(err) => {
            error!(chat_id = chat_id.0, user_id = target.0, error = %err, "unmute failed");
            bot.answer_callback_query(&query.id)
                .text("Could not lift the restriction. Try again.")
                .show_alert(true)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unmute_payloads() {
        assert_eq!(
            parse_unmute("unmute:-100555:777"),
            Some((ChatId(-100555), UserId(777)))
        );
        assert_eq!(parse_unmute("unmute:-100555"), None);
        assert_eq!(parse_unmute("unmute:a:b"), None);
        assert_eq!(parse_unmute("unmute:1:2:3"), None);
        assert_eq!(parse_unmute("mute:1:2"), None);
    }
}
