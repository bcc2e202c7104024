use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditLogger};
use crate::channels::ChannelAuthority;
use crate::clock::Clock;
use crate::config::Config;
use crate::content::{ContentPolicy, Violation};
use crate::domain::{ChatId, MessageId, MessageRef, UserId};
use crate::errors::{ChannelUnusable, Error, Result};
use crate::formatting::{escape_html, format_date};
use crate::mutes::MuteCoordinator;
use crate::ports::{ChatPort, InlineKeyboard, OutgoingMessage};
use crate::security::{self, CommandScope, RateLimiter};
use crate::store::ApprovedChannel;

/// A message observed in a group, reduced to what moderation needs.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender: UserId,
    pub sender_username: Option<String>,
    pub text: String,
}

/// Who invoked a command, and where.
#[derive(Clone, Debug)]
pub struct CommandContext {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
}

/// What the engine decided about one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The bot's own message, an admin's message, or an unusable channel.
    Skipped,
    Clean,
    Removed { violation: Violation },
    /// Deletion failed, so nobody gets muted.
    DeleteFailed { violation: Violation },
    /// The message is gone but the restriction call failed; nothing persisted.
    MuteFailed { violation: Violation },
}

/// Outcome of one broadcast fan-out, per destination.
#[derive(Clone, Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<ChatId>,
    pub failed: Vec<(ChatId, String)>,
}

/// Callback payload for the unmute button under an enforcement notice.
pub fn unmute_callback_data(chat_id: ChatId, user_id: UserId) -> String {
    format!("unmute:{}:{}", chat_id.0, user_id.0)
}

/// Orchestrates the moderation flows that span multiple components: the
/// passive message pipeline, the command gate, channel approval, and
/// broadcast fan-out.
pub struct ModerationEngine {
    cfg: Arc<Config>,
    clock: Arc<dyn Clock>,
    chat: Arc<dyn ChatPort>,
    authority: Arc<ChannelAuthority>,
    policy: Arc<ContentPolicy>,
    mutes: Arc<MuteCoordinator>,
    limiter: Arc<RateLimiter>,
    audit_log: Arc<AuditLogger>,
}

impl ModerationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        clock: Arc<dyn Clock>,
        chat: Arc<dyn ChatPort>,
        authority: Arc<ChannelAuthority>,
        policy: Arc<ContentPolicy>,
        mutes: Arc<MuteCoordinator>,
        limiter: Arc<RateLimiter>,
        audit_log: Arc<AuditLogger>,
    ) -> Self {
        Self {
            cfg,
            clock,
            chat,
            authority,
            policy,
            mutes,
            limiter,
            audit_log,
        }
    }

    pub fn is_developer(&self, user_id: UserId) -> bool {
        security::is_developer(user_id, &self.cfg)
    }

    pub async fn is_chat_admin(&self, chat_id: ChatId, user_id: UserId) -> bool {
        match self.chat.admin_status(chat_id, user_id).await {
            Ok(status) => status.is_admin(),
            Err(_) => false,
        }
    }

    /// Admission control for every command: rate limit first, then role.
    pub async fn gate(&self, ctx: &CommandContext, scope: CommandScope) -> Result<()> {
        let privileged = self.is_chat_admin(ctx.chat_id, ctx.user_id).await;
        let now = self.clock.now();
        if !self.limiter.allow(ctx.user_id, privileged, now).await? {
            self.audit(AuditEvent::rate_limit(
                ctx.user_id,
                &ctx.username,
                ctx.chat_id,
            ));
            return Err(Error::RateLimited);
        }

        match scope {
            CommandScope::Anyone => Ok(()),
            CommandScope::ChatAdmin => {
                if privileged || self.is_developer(ctx.user_id) {
                    Ok(())
                } else {
                    Err(Error::NotAuthorized(
                        "this command is for group admins".to_string(),
                    ))
                }
            }
            CommandScope::Developer => {
                if self.is_developer(ctx.user_id) {
                    Ok(())
                } else {
                    Err(Error::NotAuthorized(
                        "this command is for the bot operator".to_string(),
                    ))
                }
            }
        }
    }

    /// The passive pipeline for every non-command group message.
    ///
    /// Enforcement failures never bubble up as errors: the outcome says what
    /// happened and the chat is informed where that is useful. Admins and
    /// the bot itself are exempt, and unusable channels are watched silently.
    pub async fn moderate_message(&self, message: &InboundMessage) -> Result<MessageOutcome> {
        if message.sender == self.chat.bot_user_id() {
            return Ok(MessageOutcome::Skipped);
        }
        if self.authority.check_usable(message.chat_id).await.is_err() {
            return Ok(MessageOutcome::Skipped);
        }
        if self.is_chat_admin(message.chat_id, message.sender).await {
            return Ok(MessageOutcome::Skipped);
        }

        let Some(violation) = self.policy.scan(message.chat_id, &message.text).await else {
            return Ok(MessageOutcome::Clean);
        };
        let reason = violation.reason();
        let display = display_name(message.sender_username.as_deref(), message.sender);
        self.audit(AuditEvent::violation(
            message.chat_id,
            message.sender,
            &reason,
            &message.text,
        ));

        let target = MessageRef {
            chat_id: message.chat_id,
            message_id: message.message_id,
        };
        if let Err(e) = self.chat.delete_message(target).await {
            warn!(chat = message.chat_id.0, error = %e, "could not delete violating message");
            let notice = format!(
                "⚠️ Could not remove a message from {display}. Check the bot's delete permission."
            );
            let _ = self
                .chat
                .send_message(message.chat_id, OutgoingMessage::html(notice))
                .await;
            return Ok(MessageOutcome::DeleteFailed { violation });
        }

        if let Err(e) = self
            .mutes
            .mute(message.chat_id, message.sender, self.chat.bot_user_id(), &reason)
            .await
        {
            warn!(chat = message.chat_id.0, user = message.sender.0, error = %e, "mute failed");
            self.audit(AuditEvent::error("mute after deletion", &e.to_string()));
            return Ok(MessageOutcome::MuteFailed { violation });
        }
        self.audit(AuditEvent::mute(message.chat_id, message.sender, &reason));

        let minutes = self.mutes.default_duration().num_minutes();
        let notice = format!(
            "🔇 {display} has been muted for {minutes} minutes.\nReason: {}",
            escape_html(&reason)
        );
        let keyboard = InlineKeyboard::single(
            "🔊 Unmute",
            &unmute_callback_data(message.chat_id, message.sender),
        );
        match self
            .chat
            .send_message(
                message.chat_id,
                OutgoingMessage::html(notice).with_keyboard(keyboard),
            )
            .await
        {
            Ok(sent) => {
                let _ = self
                    .mutes
                    .attach_notice(message.chat_id, message.sender, sent.message_id)
                    .await;
            }
            Err(e) => warn!(chat = message.chat_id.0, error = %e, "could not send mute notice"),
        }

        Ok(MessageOutcome::Removed { violation })
    }

    /// Approve a channel on the operator's behalf: resolve its title, verify
    /// the bot can actually enforce there, then record the approval and
    /// announce it in the channel.
    pub async fn approve_channel(
        &self,
        ctx: &CommandContext,
        channel_id: ChatId,
        days: i64,
    ) -> Result<ApprovedChannel> {
        if days < 1 {
            return Err(Error::Validation(
                "validity must be at least 1 day".to_string(),
            ));
        }

        let title = match self.chat.chat_title(channel_id).await {
            Ok(title) => title,
            Err(_) => {
                return Err(Error::Validation(format!(
                    "chat {} was not found. Add the bot to the group first.",
                    channel_id.0
                )))
            }
        };
        let sufficient = match self.chat.bot_permissions(channel_id).await {
            Ok(perms) => perms.sufficient(),
            Err(_) => false,
        };
        if !sufficient {
            return Err(Error::ChannelUnusable(ChannelUnusable::MissingPermissions));
        }

        let record = self
            .authority
            .approve(channel_id, &title, ctx.user_id, days, true)
            .await?;

        let until = record
            .valid_until
            .map(format_date)
            .unwrap_or_else(|| "further notice".to_string());
        let announcement =
            format!("✅ This group is now protected until {until} ({days} days).");
        if let Err(e) = self
            .chat
            .send_message(channel_id, OutgoingMessage::html(announcement))
            .await
        {
            warn!(channel = channel_id.0, error = %e, "could not announce approval");
        }

        self.audit(AuditEvent::approve(channel_id, ctx.user_id, days));
        Ok(record)
    }

    /// Send a message to every live, permission-confirmed channel. At most
    /// `broadcast_concurrency` sends run at once and a slow destination is
    /// cut off after the API timeout; one failure never stops the rest.
    pub async fn broadcast(&self, by: UserId, html: &str) -> Result<BroadcastReport> {
        let now = self.clock.now();
        let targets: Vec<ChatId> = self
            .authority
            .list_approved()
            .await
            .into_iter()
            .filter(|c| c.has_admin_permissions)
            .filter(|c| c.valid_until.map(|t| t > now).unwrap_or(true))
            .map(|c| c.channel_id)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.cfg.broadcast_concurrency.max(1)));
        let mut tasks = Vec::with_capacity(targets.len());
        for channel_id in targets {
            let chat = self.chat.clone();
            let semaphore = semaphore.clone();
            let html = html.to_string();
            let deadline = self.cfg.api_timeout;
            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Err("cancelled".to_string());
                };
                let send = chat.send_message(channel_id, OutgoingMessage::html(html));
                match tokio::time::timeout(deadline, send).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("timed out".to_string()),
                }
            });
            tasks.push((channel_id, handle));
        }

        let mut report = BroadcastReport::default();
        for (channel_id, handle) in tasks {
            match handle.await {
                Ok(Ok(())) => report.delivered.push(channel_id),
                Ok(Err(reason)) => report.failed.push((channel_id, reason)),
                Err(e) => report
                    .failed
                    .push((channel_id, format!("send task failed: {e}"))),
            }
        }

        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "broadcast finished"
        );
        self.audit(AuditEvent::broadcast(
            by,
            report.delivered.len(),
            report.failed.len(),
        ));
        Ok(report)
    }

    pub fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit_log.write(event) {
            warn!(error = %e, "audit write failed");
        }
    }
}

fn display_name(username: Option<&str>, user_id: UserId) -> String {
    match username {
        Some(name) => format!("@{}", escape_html(name)),
        None => format!("user {}", user_id.0),
    }
}
