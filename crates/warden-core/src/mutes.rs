use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::domain::{ChatId, MessageId, UserId};
use crate::errors::{Error, Result};
use crate::ports::{ChatPort, MemberPermissions};
use crate::store::{MutedUser, RecordStore};

/// Applies and lifts temporary restrictions, keeping the platform and the
/// record store in step: the platform call always comes first, and nothing
/// is persisted when it fails.
pub struct MuteCoordinator {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    chat: Arc<dyn ChatPort>,
    duration: chrono::Duration,
}

impl MuteCoordinator {
    pub fn new(
        store: Arc<RecordStore>,
        clock: Arc<dyn Clock>,
        chat: Arc<dyn ChatPort>,
        duration: chrono::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            chat,
            duration,
        }
    }

    pub fn default_duration(&self) -> chrono::Duration {
        self.duration
    }

    /// Mute for the configured default duration.
    pub async fn mute(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        muted_by: UserId,
        reason: &str,
    ) -> Result<MutedUser> {
        self.mute_for(chat_id, user_id, muted_by, reason, self.duration)
            .await
    }

    /// Restrict the user on the platform, then record it. A repeat offender
    /// gets a fresh record replacing the old one.
    pub async fn mute_for(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        muted_by: UserId,
        reason: &str,
        duration: chrono::Duration,
    ) -> Result<MutedUser> {
        let until = self.clock.now() + duration;
        self.chat
            .restrict_user(chat_id, user_id, MemberPermissions::muted(), Some(until))
            .await?;

        let record = MutedUser {
            user_id,
            chat_id,
            muted_until: until,
            muted_by,
            reason: reason.to_string(),
            notice_message_id: None,
        };
        self.store.upsert_mute(record.clone()).await?;
        info!(chat = chat_id.0, user = user_id.0, %reason, "user muted");
        Ok(record)
    }

    /// Remember which message carries the unmute button.
    pub async fn attach_notice(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        notice_message_id: MessageId,
    ) -> Result<bool> {
        self.store
            .set_mute_notice(chat_id, user_id, notice_message_id)
            .await
    }

    /// Lift a mute on behalf of `requested_by`, who must be an admin of the
    /// chat. The record only goes away once the platform restored the user.
    pub async fn unmute(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        requested_by: UserId,
    ) -> Result<()> {
        let is_admin = match self.chat.admin_status(chat_id, requested_by).await {
            Ok(status) => status.is_admin(),
            Err(_) => false,
        };
        if !is_admin {
            return Err(Error::NotAuthorized(
                "only chat admins can lift a mute".to_string(),
            ));
        }

        self.chat
            .restrict_user(chat_id, user_id, MemberPermissions::unrestricted(), None)
            .await?;
        self.store.remove_mute(chat_id, user_id).await?;
        info!(chat = chat_id.0, user = user_id.0, by = requested_by.0, "user unmuted");
        Ok(())
    }

    pub async fn get(&self, chat_id: ChatId, user_id: UserId) -> Option<MutedUser> {
        self.store.get_mute(chat_id, user_id).await
    }

    /// Mute records for one chat, or all of them.
    pub async fn count(&self, chat_id: Option<ChatId>) -> usize {
        self.store.count_mutes(chat_id).await
    }
}
