use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::types::{BotCommand, BotCommandScope, Recipient};
use tracing::{info, warn};

use warden_core::audit::AuditLogger;
use warden_core::channels::ChannelAuthority;
use warden_core::clock::{Clock, SystemClock};
use warden_core::config::Config;
use warden_core::content::ContentPolicy;
use warden_core::engine::ModerationEngine;
use warden_core::mutes::MuteCoordinator;
use warden_core::ports::ChatPort;
use warden_core::security::RateLimiter;
use warden_core::store::RecordStore;
use warden_core::throttle::{ThrottleConfig, ThrottledChat};

use crate::handlers;
use crate::TelegramChat;

/// Everything the handlers need, injected through dptree.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub chat: Arc<dyn ChatPort>,
    pub authority: Arc<ChannelAuthority>,
    pub policy: Arc<ContentPolicy>,
    pub mutes: Arc<MuteCoordinator>,
    pub engine: Arc<ModerationEngine>,
    pub bot_username: String,
    pub started_at: DateTime<Utc>,
}

/// Connect, wire the moderation components, and run long polling until the
/// process is stopped.
pub async fn run_polling(cfg: Arc<Config>, store: Arc<RecordStore>) -> anyhow::Result<()> {
    let bot = Bot::new(&cfg.bot_token);

    let telegram = TelegramChat::connect(bot.clone(), cfg.api_timeout).await?;
    let bot_username = telegram.bot_username().to_string();
    info!(username = %bot_username, "warden connected");

    register_command_menu(&bot, cfg.developer_id).await;

    let chat: Arc<dyn ChatPort> = Arc::new(ThrottledChat::new(
        Arc::new(telegram),
        ThrottleConfig::default(),
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let authority = Arc::new(ChannelAuthority::new(
        store.clone(),
        clock.clone(),
        chat.clone(),
    ));
    let policy = Arc::new(ContentPolicy::new(store.clone(), clock.clone()));
    let mutes = Arc::new(MuteCoordinator::new(
        store.clone(),
        clock.clone(),
        chat.clone(),
        cfg.mute_duration,
    ));
    let limiter = Arc::new(RateLimiter::new(
        store.clone(),
        cfg.command_window,
        cfg.command_limit,
        cfg.admin_command_limit,
    ));
    let audit = Arc::new(AuditLogger::new(&cfg.audit_log_path, cfg.audit_log_json));
    let engine = Arc::new(ModerationEngine::new(
        cfg.clone(),
        clock.clone(),
        chat.clone(),
        authority.clone(),
        policy.clone(),
        mutes.clone(),
        limiter,
        audit,
    ));

    let state = Arc::new(AppState {
        cfg,
        clock,
        chat,
        authority,
        policy,
        mutes,
        engine,
        bot_username,
        started_at: Utc::now(),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Register slash commands for autocomplete in Telegram clients. The
/// operator's chat gets its own menu with the approval commands.
async fn register_command_menu(bot: &Bot, developer_id: i64) {
    let everyone = vec![
        BotCommand::new("start", "Introduction, or request approval in a group"),
        BotCommand::new("help", "Show the command list"),
        BotCommand::new("id", "Show this chat's id"),
        BotCommand::new("alive", "Uptime and status"),
        BotCommand::new("stats", "Moderation stats for the group"),
        BotCommand::new("addwords", "Add filtered words"),
        BotCommand::new("removeword", "Remove a filtered word"),
        BotCommand::new("listwords", "Show the filter list"),
    ];
    if let Err(e) = bot.set_my_commands(everyone).await {
        warn!(error = %e, "failed to register bot commands");
    }

    let operator = vec![
        BotCommand::new("add", "Approve a group"),
        BotCommand::new("channel", "List approved groups"),
        BotCommand::new("pending", "List groups awaiting approval"),
        BotCommand::new("broadcast", "Message every protected group"),
    ];
    let scope = BotCommandScope::Chat {
        chat_id: Recipient::Id(teloxide::types::ChatId(developer_id)),
    };
    if let Err(e) = bot.set_my_commands(operator).scope(scope).await {
        warn!(error = %e, "failed to register operator commands");
    }
}
