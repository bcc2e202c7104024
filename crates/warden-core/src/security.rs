use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::domain::UserId;
use crate::store::{CommandUsage, RecordStore};
use crate::Result;

// ============== Authorization ==============

/// Minimum role a command requires. Enforced by the engine's gate after
/// rate limiting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandScope {
    Anyone,
    /// Admins of the chat the command was sent in. The developer always
    /// qualifies.
    ChatAdmin,
    /// The single configured operator.
    Developer,
}

pub fn is_developer(user_id: UserId, cfg: &Config) -> bool {
    user_id.0 == cfg.developer_id
}

// ============== Rate limiting (fixed window) ==============

/// Per-user command budget over a fixed window.
///
/// The first command in a window starts it; later commands increment the
/// counter without moving the window start. A command over the limit is
/// denied without consuming anything, and once the window has elapsed the
/// next command begins a fresh one. Chat admins get the higher limit.
pub struct RateLimiter {
    store: Arc<RecordStore>,
    window: chrono::Duration,
    limit: u32,
    admin_limit: u32,
}

impl RateLimiter {
    pub fn new(
        store: Arc<RecordStore>,
        window: chrono::Duration,
        limit: u32,
        admin_limit: u32,
    ) -> Self {
        Self {
            store,
            window,
            limit,
            admin_limit,
        }
    }

    /// Check and record one command at `now`. Returns false when denied.
    pub async fn allow(
        &self,
        user_id: UserId,
        privileged: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let limit = if privileged {
            self.admin_limit
        } else {
            self.limit
        };
        let window = self.window;
        self.store
            .update_usage(user_id, |entry| match entry {
                None => {
                    *entry = Some(CommandUsage {
                        window_start: now,
                        count: 1,
                    });
                    true
                }
                Some(usage) => {
                    if now.signed_duration_since(usage.window_start) >= window {
                        usage.window_start = now;
                        usage.count = 1;
                        true
                    } else if usage.count >= limit {
                        false
                    } else {
                        usage.count += 1;
                        true
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    fn limiter(store: Arc<RecordStore>) -> RateLimiter {
        RateLimiter::new(store, chrono::Duration::seconds(60), 5, 10)
    }

    #[test]
    fn developer_matches_configured_id() {
        let cfg = test_config();
        assert!(is_developer(UserId(cfg.developer_id), &cfg));
        assert!(!is_developer(UserId(42), &cfg));
    }

    #[tokio::test]
    async fn standard_user_is_denied_on_the_sixth_command() {
        let store = Arc::new(RecordStore::in_memory());
        let limiter = limiter(store);
        let now = Utc::now();

        for _ in 0..5 {
            assert!(limiter.allow(UserId(1), false, now).await.unwrap());
        }
        assert!(!limiter.allow(UserId(1), false, now).await.unwrap());
    }

    #[tokio::test]
    async fn privileged_user_gets_the_higher_limit() {
        let store = Arc::new(RecordStore::in_memory());
        let limiter = limiter(store);
        let now = Utc::now();

        for _ in 0..10 {
            assert!(limiter.allow(UserId(2), true, now).await.unwrap());
        }
        assert!(!limiter.allow(UserId(2), true, now).await.unwrap());
    }

    #[tokio::test]
    async fn window_elapse_resets_the_counter() {
        let store = Arc::new(RecordStore::in_memory());
        let limiter = limiter(store.clone());
        let start = Utc::now();

        for _ in 0..5 {
            assert!(limiter.allow(UserId(3), false, start).await.unwrap());
        }
        assert!(!limiter.allow(UserId(3), false, start).await.unwrap());

        let later = start + chrono::Duration::seconds(60);
        assert!(limiter.allow(UserId(3), false, later).await.unwrap());

        let usage = store.get_usage(UserId(3)).await.unwrap();
        assert_eq!(usage.window_start, later);
        assert_eq!(usage.count, 1);
    }

    #[tokio::test]
    async fn denied_command_consumes_nothing() {
        let store = Arc::new(RecordStore::in_memory());
        let limiter = limiter(store.clone());
        let start = Utc::now();

        for _ in 0..5 {
            limiter.allow(UserId(4), false, start).await.unwrap();
        }
        let mid = start + chrono::Duration::seconds(30);
        assert!(!limiter.allow(UserId(4), false, mid).await.unwrap());

        let usage = store.get_usage(UserId(4)).await.unwrap();
        assert_eq!(usage.count, 5);
        assert_eq!(usage.window_start, start);
    }

    #[tokio::test]
    async fn counters_are_tracked_per_user() {
        let store = Arc::new(RecordStore::in_memory());
        let limiter = limiter(store);
        let now = Utc::now();

        for _ in 0..5 {
            assert!(limiter.allow(UserId(10), false, now).await.unwrap());
        }
        assert!(!limiter.allow(UserId(10), false, now).await.unwrap());
        assert!(limiter.allow(UserId(11), false, now).await.unwrap());
    }
}
