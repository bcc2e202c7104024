use std::sync::Arc;

use teloxide::prelude::*;
use tracing::error;

use warden_core::audit::{truncate_text, AuditEvent};
use warden_core::domain::{ChatId, MessageId, UserId};
use warden_core::engine::CommandContext;
use warden_core::errors::{ChannelUnusable, Error};
use warden_core::formatting::{escape_html, format_date, format_uptime};
use warden_core::ports::{InlineButton, InlineKeyboard, OutgoingMessage};
use warden_core::security::CommandScope;
use warden_core::store::PendingGroup;

use super::notify_developer;
use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (cmd, arg) = parse_command(text);
    if cmd.is_empty() {
        return Ok(());
    }

    let ctx = CommandContext {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user
            .username
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    };
    state
        .engine
        .audit(AuditEvent::command(ctx.user_id, &ctx.username, ctx.chat_id, &cmd));

    if let Err(err) = run_command(&state, &msg, &ctx, &cmd, &arg).await {
        respond_to_error(&state, &msg, &ctx, &cmd, err).await;
    }
    Ok(())
}

async fn run_command(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    cmd: &str,
    arg: &str,
) -> warden_core::Result<()> {
    match cmd {
        "start" => start(state, msg, ctx).await,
        "help" => help(state, msg, ctx).await,
        "id" => id(state, msg, ctx).await,
        "alive" => alive(state, msg, ctx).await,
        "add" => add(state, msg, ctx, arg).await,
        "channel" => channel_list(state, msg, ctx).await,
        "pending" => pending_list(state, msg, ctx).await,
        "broadcast" => broadcast(state, msg, ctx, arg).await,
        "stats" => stats(state, msg, ctx).await,
        "addwords" => add_words(state, msg, ctx, arg).await,
        "removeword" => remove_word(state, msg, ctx, arg).await,
        "listwords" => list_words(state, msg, ctx).await,
        // Not one of ours (or a typo): stay silent.
        _ => Ok(()),
    }
}

async fn reply(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    html: String,
) -> warden_core::Result<()> {
    state
        .chat
        .send_message(
            ctx.chat_id,
            OutgoingMessage::html(html).reply_to(MessageId(msg.id.0)),
        )
        .await?;
    Ok(())
}

fn ensure_group(msg: &Message) -> warden_core::Result<()> {
    if msg.chat.is_private() {
        return Err(Error::Validation(
            "this command works inside a group".to_string(),
        ));
    }
    Ok(())
}

// ============== Open commands ==============

/// Welcome view for private chats, also restored by the "back" button.
pub(super) fn welcome_text(state: &AppState) -> String {
    format!(
        "🛡 <b>Warden</b> keeps approved groups clean: unauthorized links and \
         filtered words are removed and the offender is muted for a few minutes.\n\n\
         <b>To protect your group</b>\n\
         1. Add @{} and make it admin (delete messages, restrict members)\n\
         2. Send /start in the group to request approval\n\
         3. The operator enables protection for an agreed number of days",
        escape_html(&state.bot_username)
    )
}

pub(super) fn welcome_keyboard(state: &AppState) -> InlineKeyboard {
    let mut buttons = vec![
        InlineButton::url(
            "➕ Add me to a group",
            format!("https://t.me/{}?startgroup=true", state.bot_username),
        ),
        InlineButton::callback("ℹ️ Commands", "help"),
    ];
    if let Some(contact) = &state.cfg.developer_contact {
        if let Some(handle) = contact.strip_prefix('@') {
            buttons.push(InlineButton::url(
                "👤 Contact the operator",
                format!("https://t.me/{handle}"),
            ));
        }
    }
    InlineKeyboard::new(buttons)
}

async fn start(state: &AppState, msg: &Message, ctx: &CommandContext) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Anyone).await?;

    if msg.chat.is_private() {
        state
            .chat
            .send_message(
                ctx.chat_id,
                OutgoingMessage::html(welcome_text(state))
                    .reply_to(MessageId(msg.id.0))
                    .with_keyboard(welcome_keyboard(state)),
            )
            .await?;
        return Ok(());
    }

    // In a group, /start doubles as the approval request.
    let title = msg.chat.title().unwrap_or("this group").to_string();
    if let Some(channel) = state.authority.get(ctx.chat_id).await {
        let live = channel
            .valid_until
            .map(|t| t > state.clock.now())
            .unwrap_or(true);
        if live {
            return reply(
                state,
                msg,
                ctx,
                "✅ This group is already approved and protected.".to_string(),
            )
            .await;
        }
    }
    if state.authority.is_pending(ctx.chat_id).await {
        return reply(
            state,
            msg,
            ctx,
            "⏳ This group is already waiting for approval.".to_string(),
        )
        .await;
    }

    let mut request = format!(
        "👋 Thanks for adding me to <b>{}</b>!\n\n\
         Before I can moderate here:\n\
         1. Make me admin with <i>delete messages</i> and <i>restrict members</i>\n\
         2. The operator approves the group with <code>/add {} &lt;days&gt;</code>\n\n\
         The operator has been notified.",
        escape_html(&title),
        ctx.chat_id.0
    );
    if let Some(contact) = &state.cfg.developer_contact {
        request.push_str(&format!("\nContact: {}", escape_html(contact)));
    }
    let sent = state
        .chat
        .send_message(
            ctx.chat_id,
            OutgoingMessage::html(request).reply_to(MessageId(msg.id.0)),
        )
        .await?;
    state
        .authority
        .register_pending(PendingGroup {
            group_id: ctx.chat_id,
            title: title.clone(),
            invited_by: ctx.user_id,
            added_at: state.clock.now(),
            request_message_id: sent.message_id,
        })
        .await?;

    notify_developer(
        state,
        format!(
            "📨 <b>New group awaiting approval</b>\n\
             Group: <b>{}</b> (<code>{}</code>)\n\
             Added by: @{}\n\n\
             Approve with <code>/add {} &lt;days&gt;</code>",
            escape_html(&title),
            ctx.chat_id.0,
            escape_html(&ctx.username),
            ctx.chat_id.0
        ),
    )
    .await;
    Ok(())
}

async fn help(state: &AppState, msg: &Message, ctx: &CommandContext) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Anyone).await?;
    let text = help_text(state.engine.is_developer(ctx.user_id));
    reply(state, msg, ctx, text).await
}

/// Command list. The group-admin section is informational for everyone;
/// the gate still decides who may actually run what.
pub(super) fn help_text(is_developer: bool) -> String {
    let mut text = String::from(
        "<b>Commands</b>\n\
         /start - introduction, or request approval in a group\n\
         /help - this list\n\
         /id - show this chat's id\n\
         /alive - uptime and status\n\
         \n\
         <b>Group admins</b>\n\
         /stats - moderation stats for the group\n\
         /addwords &lt;w1&gt; [w2 ...] - add filtered words\n\
         /removeword &lt;w&gt; - remove a filtered word\n\
         /listwords - show the filter list\n",
    );
    if is_developer {
        text.push_str(
            "\n<b>Operator</b>\n\
             /add &lt;chat_id&gt; &lt;days&gt; - approve a group\n\
             /channel - list approved groups\n\
             /pending - list groups awaiting approval\n\
             /broadcast &lt;text&gt; - message every protected group\n",
        );
    }
    text
}

async fn id(state: &AppState, msg: &Message, ctx: &CommandContext) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Anyone).await?;
    reply(
        state,
        msg,
        ctx,
        format!("🆔 Chat id: <code>{}</code>", ctx.chat_id.0),
    )
    .await
}

async fn alive(state: &AppState, msg: &Message, ctx: &CommandContext) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Anyone).await?;
    let uptime = state
        .clock
        .now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    if !state.engine.is_developer(ctx.user_id) {
        return reply(
            state,
            msg,
            ctx,
            format!("🟢 Warden is alive. Uptime: {}", format_uptime(uptime)),
        )
        .await;
    }

    let active = state.authority.count_active().await;
    let pending = state.authority.list_pending().await.len();
    let muted = state.mutes.count(None).await;
    let warning_days = state.cfg.expiry_warning_days;
    let expiring = state.authority.count_expiring_within(warning_days).await;
    reply(
        state,
        msg,
        ctx,
        format!(
            "🟢 <b>Warden is alive</b>\n\
             Uptime: {}\n\
             Protected groups: {active}\n\
             Pending requests: {pending}\n\
             Active mutes: {muted}\n\
             Expiring within {warning_days} days: {expiring}",
            format_uptime(uptime)
        ),
    )
    .await
}

// ============== Operator commands ==============

async fn add(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    arg: &str,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Developer).await?;

    let mut parts = arg.split_whitespace();
    let (Some(id_raw), Some(days_raw), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::Validation("usage: /add <chat_id> <days>".to_string()));
    };
    let channel_id: i64 = id_raw
        .parse()
        .map_err(|_| Error::Validation(format!("{id_raw:?} is not a chat id")))?;
    let days: i64 = days_raw
        .parse()
        .map_err(|_| Error::Validation(format!("{days_raw:?} is not a number of days")))?;

    let record = state
        .engine
        .approve_channel(ctx, ChatId(channel_id), days)
        .await?;
    let until = record
        .valid_until
        .map(format_date)
        .unwrap_or_else(|| "further notice".to_string());
    reply(
        state,
        msg,
        ctx,
        format!(
            "✅ Approved <b>{}</b> (<code>{}</code>) until {until} ({days} days).",
            escape_html(&record.title),
            channel_id
        ),
    )
    .await
}

async fn channel_list(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Developer).await?;

    let channels = state.authority.list_approved().await;
    if channels.is_empty() {
        return reply(state, msg, ctx, "No groups are approved yet.".to_string()).await;
    }

    let now = state.clock.now();
    let mut lines = vec![format!("🗂 <b>Approved groups</b> ({})", channels.len())];
    for channel in channels {
        let status = if channel.has_admin_permissions {
            "🟢"
        } else {
            "🔴 no permissions"
        };
        let validity = match channel.valid_until {
            None => "no expiry".to_string(),
            Some(until) if until <= now => format!("expired {}", format_date(until)),
            Some(until) => format!(
                "until {} ({} days left)",
                format_date(until),
                until.signed_duration_since(now).num_days()
            ),
        };
        lines.push(format!(
            "• <b>{}</b> (<code>{}</code>) {status} - {validity}",
            escape_html(&channel.title),
            channel.channel_id.0
        ));
    }
    reply(state, msg, ctx, lines.join("\n")).await
}

async fn pending_list(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Developer).await?;

    let groups = state.authority.list_pending().await;
    if groups.is_empty() {
        return reply(
            state,
            msg,
            ctx,
            "No groups are waiting for approval.".to_string(),
        )
        .await;
    }

    let mut lines = vec![format!("📥 <b>Awaiting approval</b> ({})", groups.len())];
    for group in groups {
        lines.push(format!(
            "• <b>{}</b> (<code>{}</code>) - requested by <code>{}</code> on {}",
            escape_html(&group.title),
            group.group_id.0,
            group.invited_by.0,
            format_date(group.added_at)
        ));
    }
    reply(state, msg, ctx, lines.join("\n")).await
}

async fn broadcast(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    arg: &str,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::Developer).await?;
    if arg.is_empty() {
        return Err(Error::Validation("usage: /broadcast <message>".to_string()));
    }

    let html = format!("📢 <b>Announcement</b>\n\n{}", escape_html(arg));
    let report = state.engine.broadcast(ctx.user_id, &html).await?;

    let mut text = format!(
        "📤 Broadcast delivered to {} group(s).",
        report.delivered.len()
    );
    if !report.failed.is_empty() {
        text.push_str(&format!("\n⚠️ Failed for {}:", report.failed.len()));
        for (chat_id, cause) in &report.failed {
            text.push_str(&format!(
                "\n• <code>{}</code>: {}",
                chat_id.0,
                escape_html(&truncate_text(cause, 80))
            ));
        }
    }
    reply(state, msg, ctx, text).await
}

// ============== Group admin commands ==============

async fn stats(state: &AppState, msg: &Message, ctx: &CommandContext) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::ChatAdmin).await?;
    ensure_group(msg)?;

    let Some(channel) = state.authority.get(ctx.chat_id).await else {
        return Err(Error::ChannelUnusable(ChannelUnusable::NotApproved));
    };

    let now = state.clock.now();
    let validity = match channel.valid_until {
        None => "no expiry".to_string(),
        Some(until) if until <= now => format!("expired {}", format_date(until)),
        Some(until) => format!(
            "until {} ({} days left)",
            format_date(until),
            until.signed_duration_since(now).num_days()
        ),
    };
    let words = state.policy.count_words(ctx.chat_id).await;
    let muted = state.mutes.count(Some(ctx.chat_id)).await;
    reply(
        state,
        msg,
        ctx,
        format!(
            "📊 <b>{}</b>\n\
             Approved: {}\n\
             Validity: {validity}\n\
             Filtered words: {words}\n\
             Active mutes: {muted}",
            escape_html(&channel.title),
            format_date(channel.approved_at)
        ),
    )
    .await
}

async fn add_words(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    arg: &str,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::ChatAdmin).await?;
    ensure_group(msg)?;
    state.authority.check_usable(ctx.chat_id).await?;

    let words: Vec<String> = arg.split_whitespace().map(str::to_string).collect();
    if words.is_empty() {
        return Err(Error::Validation(
            "usage: /addwords <word> [word ...]".to_string(),
        ));
    }

    let changes = state.policy.add_words(ctx.chat_id, &words, ctx.user_id).await?;
    let mut text = String::new();
    if !changes.added.is_empty() {
        text.push_str(&format!(
            "✅ Added: {}",
            escape_html(&changes.added.join(", "))
        ));
    }
    if !changes.already_present.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!(
            "↩️ Already present: {}",
            escape_html(&changes.already_present.join(", "))
        ));
    }
    reply(state, msg, ctx, text).await
}

async fn remove_word(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    arg: &str,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::ChatAdmin).await?;
    ensure_group(msg)?;
    state.authority.check_usable(ctx.chat_id).await?;

    let mut parts = arg.split_whitespace();
    let (Some(word), None) = (parts.next(), parts.next()) else {
        return Err(Error::Validation("usage: /removeword <word>".to_string()));
    };

    let text = if state.policy.remove_word(ctx.chat_id, word).await? {
        format!("🗑 Removed \"{}\" from the filter.", escape_html(word))
    } else {
        format!("\"{}\" is not in the filter list.", escape_html(word))
    };
    reply(state, msg, ctx, text).await
}

async fn list_words(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
) -> warden_core::Result<()> {
    state.engine.gate(ctx, CommandScope::ChatAdmin).await?;
    ensure_group(msg)?;
    state.authority.check_usable(ctx.chat_id).await?;

    let words = state.policy.list_words(ctx.chat_id).await;
    if words.is_empty() {
        return reply(
            state,
            msg,
            ctx,
            "No filtered words for this group yet.".to_string(),
        )
        .await;
    }

    let lines: Vec<String> = words
        .iter()
        .enumerate()
        .map(|(i, w)| format!("{}. {}", i + 1, escape_html(&w.word)))
        .collect();
    reply(
        state,
        msg,
        ctx,
        format!(
            "🧹 <b>Filtered words</b> ({})\n{}",
            words.len(),
            lines.join("\n")
        ),
    )
    .await
}

// ============== Error surfacing ==============

/// Map a command failure to its user-facing reply. Anything unexpected gets
/// a generic reply here and the full detail goes to the operator.
async fn respond_to_error(
    state: &AppState,
    msg: &Message,
    ctx: &CommandContext,
    cmd: &str,
    err: Error,
) {
    let text = match &err {
        Error::RateLimited => "⏳ Too many commands. Try again in a minute.".to_string(),
        Error::NotAuthorized(reason) => format!("⛔ {}", escape_html(reason)),
        Error::Validation(reason) => format!("⚠️ {}", escape_html(reason)),
        Error::ChannelUnusable(kind) => match kind {
            ChannelUnusable::NotApproved => "🚫 This group is not approved.".to_string(),
            ChannelUnusable::Expired => {
                "⌛ The approval for this group has expired.".to_string()
            }
            ChannelUnusable::MissingPermissions => {
                "🔐 The bot needs admin rights here (delete messages and restrict members)."
                    .to_string()
            }
        },
        _ => {
            error!(command = cmd, error = %err, "command failed");
            state.engine.audit(
                AuditEvent::error(cmd, &err.to_string())
                    .with_chat(ctx.chat_id)
                    .with_user(ctx.user_id),
            );
            notify_developer(
                state,
                format!(
                    "⚠️ <b>Error report</b>\ncommand: /{}\nchat: <code>{}</code>\nuser: <code>{}</code>\nerror: <code>{}</code>",
                    escape_html(cmd),
                    ctx.chat_id.0,
                    ctx.user_id.0,
                    escape_html(&truncate_text(&err.to_string(), 500))
                ),
            )
            .await;
            let contact = state.cfg.developer_contact.as_deref().unwrap_or("the operator");
            format!(
                "❌ Something went wrong. {} has been notified.",
                escape_html(contact)
            )
        }
    };
    let _ = state
        .chat
        .send_message(
            ctx.chat_id,
            OutgoingMessage::html(text).reply_to(MessageId(msg.id.0)),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(parse_command("/start"), ("start".to_string(), String::new()));
        assert_eq!(
            parse_command("/add -100555 7"),
            ("add".to_string(), "-100555 7".to_string())
        );
    }

    #[test]
    fn strips_bot_mentions_and_case() {
        assert_eq!(
            parse_command("/AddWords@warden_bot spam scam"),
            ("addwords".to_string(), "spam scam".to_string())
        );
        assert_eq!(parse_command("/HELP@other"), ("help".to_string(), String::new()));
    }

    #[test]
    fn help_text_reserves_the_operator_section() {
        let plain = help_text(false);
        assert!(plain.contains("/alive"));
        assert!(plain.contains("/addwords"));
        assert!(!plain.contains("/broadcast"));

        let operator = help_text(true);
        assert!(operator.contains("/addwords"));
        assert!(operator.contains("/broadcast"));
    }
}
