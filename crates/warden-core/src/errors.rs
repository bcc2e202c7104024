/// Core error type for the moderation bot.
///
/// The adapter crate maps transport failures into `Platform`; everything
/// else is produced by the core itself. Handlers pick the user-facing reply
/// off the variant, so the split between "tell the invoker" and "tell the
/// operator" happens in one place.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("channel unusable: {0}")]
    ChannelUnusable(ChannelUnusable),

    #[error("rate limited")]
    RateLimited,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a channel cannot be moderated right now.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChannelUnusable {
    #[error("the channel is not approved")]
    NotApproved,
    #[error("the channel approval has expired")]
    Expired,
    #[error("the bot lacks admin permissions in the channel")]
    MissingPermissions,
}

pub type Result<T> = std::result::Result<T, Error>;
