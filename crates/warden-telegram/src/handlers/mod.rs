mod callback;
mod commands;
mod message;

pub use callback::handle_callback;

use std::sync::Arc;

use teloxide::prelude::*;

use warden_core::domain::ChatId;
use warden_core::ports::OutgoingMessage;

use crate::router::AppState;

/// Fan-in for every incoming message: commands go to the command table,
/// everything else through the passive moderation pipeline.
pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if msg.from().is_none() {
        return Ok(());
    }
    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(msg, state).await;
        }
    }
    message::handle_group_message(msg, state).await
}

/// Best-effort direct message to the operator.
pub(crate) async fn notify_developer(state: &AppState, html: String) {
    let developer = ChatId(state.cfg.developer_id);
    let _ = state
        .chat
        .send_message(developer, OutgoingMessage::html(html))
        .await;
}
