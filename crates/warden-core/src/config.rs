use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Error, Result};

/// Typed configuration for the moderation bot.
///
/// Loaded once at startup from the environment (a `.env` file next to the
/// binary is honored but never overrides real environment variables).
#[derive(Clone, Debug)]
pub struct Config {
    /// Telegram bot API token.
    pub bot_token: String,
    /// The single operator allowed to approve channels and broadcast.
    pub developer_id: i64,
    /// Shown to users when something breaks and they should escalate.
    pub developer_contact: Option<String>,

    /// How long a violator stays muted.
    pub mute_duration: chrono::Duration,
    /// Channels expiring within this many days are counted as "expiring soon".
    pub expiry_warning_days: i64,

    /// Commands per window for regular users.
    pub command_limit: u32,
    /// Commands per window for chat admins.
    pub admin_command_limit: u32,
    /// Length of the fixed rate-limit window.
    pub command_window: chrono::Duration,

    /// JSON snapshot file for all moderation records.
    pub store_path: PathBuf,

    /// Upper bound for a single Telegram API call.
    pub api_timeout: Duration,
    /// Maximum concurrent sends during a broadcast.
    pub broadcast_concurrency: usize,

    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is required".to_string()))?;
        let developer_id = env_i64("DEVELOPER_ID")?
            .ok_or_else(|| Error::Config("DEVELOPER_ID is required".to_string()))?;

        Ok(Self {
            bot_token,
            developer_id,
            developer_contact: env_str("DEVELOPER_CONTACT"),
            mute_duration: chrono::Duration::minutes(
                env_i64("MUTE_DURATION_MINUTES")?.unwrap_or(3).max(1),
            ),
            expiry_warning_days: env_i64("EXPIRY_WARNING_DAYS")?.unwrap_or(3).max(1),
            command_limit: env_u32("COMMAND_LIMIT")?.unwrap_or(5).max(1),
            admin_command_limit: env_u32("ADMIN_COMMAND_LIMIT")?.unwrap_or(10).max(1),
            command_window: chrono::Duration::seconds(
                env_i64("COMMAND_WINDOW_SECS")?.unwrap_or(60).max(1),
            ),
            store_path: env_path("STORE_PATH")
                .unwrap_or_else(|| PathBuf::from("warden-store.json")),
            api_timeout: Duration::from_secs(env_u64("API_TIMEOUT_SECS")?.unwrap_or(10).max(1)),
            broadcast_concurrency: env_usize("BROADCAST_CONCURRENCY")?.unwrap_or(8).max(1),
            audit_log_path: env_path("AUDIT_LOG_PATH")
                .unwrap_or_else(|| PathBuf::from("warden-audit.log")),
            audit_log_json: env_bool("AUDIT_LOG_JSON").unwrap_or(false),
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_empty)
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = env_str(key)?;
    Some(matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}

fn env_i64(key: &str) -> Result<Option<i64>> {
    match env_str(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be an integer, got {raw:?}"))),
    }
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match env_str(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a positive integer, got {raw:?}"))),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match env_str(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a positive integer, got {raw:?}"))),
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match env_str(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a positive integer, got {raw:?}"))),
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_str(key).map(PathBuf::from)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Minimal `.env` loader: `KEY=VALUE` lines, `#` comments, optional quotes.
/// Existing environment variables always win.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }
        let mut value = value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        env::set_var(key, value);
    }
}
