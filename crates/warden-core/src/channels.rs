use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::clock::Clock;
use crate::domain::{ChatId, UserId};
use crate::errors::{ChannelUnusable, Error, Result};
use crate::ports::ChatPort;
use crate::store::{ApprovedChannel, PendingGroup, RecordStore};

/// Per-key lock map so read-probe-write sequences on one channel never
/// interleave. Locking channel A does not block channel B.
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Source of truth for which chats the bot moderates.
///
/// Approvals are time-boxed. Expiry is lazy: nothing runs in the background,
/// an expired record is evicted the next time [`check_usable`] touches it.
///
/// [`check_usable`]: ChannelAuthority::check_usable
pub struct ChannelAuthority {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    chat: Arc<dyn ChatPort>,
    locks: KeyedLocks,
}

impl ChannelAuthority {
    pub fn new(store: Arc<RecordStore>, clock: Arc<dyn Clock>, chat: Arc<dyn ChatPort>) -> Self {
        Self {
            store,
            clock,
            chat,
            locks: KeyedLocks::default(),
        }
    }

    /// Approve a channel for `days` days starting now. Replaces an expired
    /// record, refuses to touch a live one, and clears any pending request.
    pub async fn approve(
        &self,
        channel_id: ChatId,
        title: &str,
        approved_by: UserId,
        days: i64,
        has_admin_permissions: bool,
    ) -> Result<ApprovedChannel> {
        if days < 1 {
            return Err(Error::Validation(
                "validity must be at least 1 day".to_string(),
            ));
        }
        let _guard = self.locks.lock(channel_id.0).await;
        let now = self.clock.now();

        if let Some(existing) = self.store.get_channel(channel_id).await {
            let expired = existing.valid_until.map(|t| now > t).unwrap_or(false);
            if !expired {
                return Err(Error::Validation(format!(
                    "channel {} is already approved",
                    channel_id.0
                )));
            }
            self.store.remove_channel(channel_id).await?;
        }

        let record = ApprovedChannel {
            channel_id,
            title: title.to_string(),
            approved_by,
            approved_at: now,
            has_admin_permissions,
            valid_until: Some(now + chrono::Duration::days(days)),
        };
        self.store.insert_channel(record.clone()).await?;
        self.store.remove_pending(channel_id).await?;
        info!(channel = channel_id.0, days, "channel approved");
        Ok(record)
    }

    /// Is the channel ready for enforcement right now?
    ///
    /// Evicts the record when the approval has lapsed. When the cached
    /// permission flag is false, probes the platform once and flips the flag
    /// on success. The whole sequence holds the channel's lock.
    pub async fn check_usable(&self, channel_id: ChatId) -> Result<()> {
        let _guard = self.locks.lock(channel_id.0).await;

        let Some(channel) = self.store.get_channel(channel_id).await else {
            return Err(Error::ChannelUnusable(ChannelUnusable::NotApproved));
        };

        if let Some(until) = channel.valid_until {
            if self.clock.now() > until {
                self.store.remove_channel(channel_id).await?;
                info!(channel = channel_id.0, "approval expired, record evicted");
                return Err(Error::ChannelUnusable(ChannelUnusable::Expired));
            }
        }

        if channel.has_admin_permissions {
            return Ok(());
        }

        let confirmed = match self.chat.bot_permissions(channel_id).await {
            Ok(perms) => perms.sufficient(),
            Err(_) => false,
        };
        if !confirmed {
            return Err(Error::ChannelUnusable(ChannelUnusable::MissingPermissions));
        }
        self.store.set_channel_permissions(channel_id, true).await?;
        info!(channel = channel_id.0, "admin permissions confirmed");
        Ok(())
    }

    /// Drop a channel's approval. Returns false when there was none.
    pub async fn revoke(&self, channel_id: ChatId) -> Result<bool> {
        let _guard = self.locks.lock(channel_id.0).await;
        self.store.remove_channel(channel_id).await
    }

    /// Pure read: never evicts, expired records still show up.
    pub async fn list_approved(&self) -> Vec<ApprovedChannel> {
        self.store.list_channels().await
    }

    pub async fn get(&self, channel_id: ChatId) -> Option<ApprovedChannel> {
        self.store.get_channel(channel_id).await
    }

    /// `None`: no record. `Some(None)`: approval never expires.
    /// Negative values mean the record has lapsed but was not evicted yet.
    pub async fn days_remaining(&self, channel_id: ChatId) -> Option<Option<i64>> {
        let channel = self.store.get_channel(channel_id).await?;
        Some(
            channel
                .valid_until
                .map(|until| until.signed_duration_since(self.clock.now()).num_days()),
        )
    }

    // ============== Pending groups ==============

    /// Record a group waiting for operator approval. A group is never
    /// pending and approved at the same time.
    pub async fn register_pending(&self, group: PendingGroup) -> Result<()> {
        let _guard = self.locks.lock(group.group_id.0).await;

        if self.store.get_pending(group.group_id).await.is_some() {
            return Err(Error::Validation(format!(
                "group {} is already awaiting approval",
                group.group_id.0
            )));
        }
        if let Some(existing) = self.store.get_channel(group.group_id).await {
            let expired = existing
                .valid_until
                .map(|t| self.clock.now() > t)
                .unwrap_or(false);
            if !expired {
                return Err(Error::Validation(format!(
                    "group {} is already approved",
                    group.group_id.0
                )));
            }
        }
        self.store.insert_pending(group).await?;
        Ok(())
    }

    pub async fn is_pending(&self, group_id: ChatId) -> bool {
        self.store.get_pending(group_id).await.is_some()
    }

    pub async fn list_pending(&self) -> Vec<PendingGroup> {
        self.store.list_pending().await
    }

    // ============== Stats ==============

    /// Channels that are live and have confirmed permissions.
    pub async fn count_active(&self) -> usize {
        let now = self.clock.now();
        self.store
            .list_channels()
            .await
            .iter()
            .filter(|c| c.has_admin_permissions)
            .filter(|c| c.valid_until.map(|t| t > now).unwrap_or(true))
            .count()
    }

    /// Live channels whose approval lapses within `days` days.
    pub async fn count_expiring_within(&self, days: i64) -> usize {
        let now = self.clock.now();
        let horizon = now + chrono::Duration::days(days);
        self.store
            .list_channels()
            .await
            .iter()
            .filter(|c| {
                c.valid_until
                    .map(|t| t > now && t <= horizon)
                    .unwrap_or(false)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::testing::{full_permissions, FakeChat, ManualClock};
    use chrono::{TimeZone, Utc};

    const CHANNEL: ChatId = ChatId(-100555);
    const OPERATOR: UserId = UserId(9000);

    fn setup() -> (
        ChannelAuthority,
        Arc<RecordStore>,
        Arc<ManualClock>,
        Arc<FakeChat>,
    ) {
        let store = Arc::new(RecordStore::in_memory());
        let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap());
        let chat = FakeChat::new();
        let authority = ChannelAuthority::new(store.clone(), clock.clone(), chat.clone());
        (authority, store, clock, chat)
    }

    fn pending(group_id: ChatId) -> PendingGroup {
        PendingGroup {
            group_id,
            title: "Pending Group".to_string(),
            invited_by: UserId(77),
            added_at: Utc.with_ymd_and_hms(2026, 8, 1, 11, 0, 0).unwrap(),
            request_message_id: MessageId(5),
        }
    }

    #[tokio::test]
    async fn approve_then_check_usable_succeeds_without_probing() {
        let (authority, _, _, chat) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        authority.check_usable(CHANNEL).await.unwrap();
        assert_eq!(chat.probe_count(), 0);
    }

    #[tokio::test]
    async fn approval_lapses_after_the_validity_period() {
        let (authority, _, clock, _) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        clock.advance(chrono::Duration::days(8));
        let err = authority.check_usable(CHANNEL).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelUnusable(ChannelUnusable::Expired)
        ));

        // The record is gone: later checks see an unapproved channel.
        assert!(authority.list_approved().await.is_empty());
        let err = authority.check_usable(CHANNEL).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelUnusable(ChannelUnusable::NotApproved)
        ));
    }

    #[tokio::test]
    async fn listing_alone_never_evicts_expired_records() {
        let (authority, _, clock, _) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        clock.advance(chrono::Duration::days(30));
        assert_eq!(authority.list_approved().await.len(), 1);
        assert_eq!(authority.days_remaining(CHANNEL).await, Some(Some(-23)));
    }

    #[tokio::test]
    async fn successful_probe_flips_the_cached_flag_once() {
        let (authority, store, _, chat) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, false)
            .await
            .unwrap();
        chat.set_bot_permissions(CHANNEL, full_permissions());

        authority.check_usable(CHANNEL).await.unwrap();
        assert!(store.get_channel(CHANNEL).await.unwrap().has_admin_permissions);

        // Flag is cached now, no second probe.
        authority.check_usable(CHANNEL).await.unwrap();
        assert_eq!(chat.probe_count(), 1);
    }

    #[tokio::test]
    async fn failed_probe_leaves_the_flag_unset() {
        let (authority, store, _, chat) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, false)
            .await
            .unwrap();
        chat.fail_perm_probes
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = authority.check_usable(CHANNEL).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelUnusable(ChannelUnusable::MissingPermissions)
        ));
        assert!(!store.get_channel(CHANNEL).await.unwrap().has_admin_permissions);
    }

    #[tokio::test]
    async fn insufficient_probe_result_is_missing_permissions() {
        let (authority, _, _, chat) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, false)
            .await
            .unwrap();
        chat.set_bot_permissions(
            CHANNEL,
            crate::ports::BotPermissions {
                is_admin: true,
                can_delete_messages: true,
                can_restrict_members: false,
            },
        );

        let err = authority.check_usable(CHANNEL).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelUnusable(ChannelUnusable::MissingPermissions)
        ));
    }

    #[tokio::test]
    async fn approving_a_live_channel_twice_is_rejected() {
        let (authority, _, _, _) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        let err = authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn approving_over_an_expired_record_starts_fresh() {
        let (authority, _, clock, _) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        clock.advance(chrono::Duration::days(10));
        let record = authority
            .approve(CHANNEL, "Test Group", OPERATOR, 30, true)
            .await
            .unwrap();
        assert_eq!(record.approved_at, clock.now());
        assert_eq!(authority.days_remaining(CHANNEL).await, Some(Some(30)));
    }

    #[tokio::test]
    async fn zero_days_is_rejected() {
        let (authority, _, _, _) = setup();
        let err = authority
            .approve(CHANNEL, "Test Group", OPERATOR, 0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn approval_clears_the_pending_request() {
        let (authority, _, _, _) = setup();
        authority.register_pending(pending(CHANNEL)).await.unwrap();
        assert!(authority.is_pending(CHANNEL).await);

        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();
        assert!(!authority.is_pending(CHANNEL).await);
        assert!(authority.get(CHANNEL).await.is_some());
    }

    #[tokio::test]
    async fn pending_registration_rejects_approved_groups() {
        let (authority, _, _, _) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        let err = authority.register_pending(pending(CHANNEL)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn pending_registration_rejects_duplicates() {
        let (authority, _, _, _) = setup();
        authority.register_pending(pending(CHANNEL)).await.unwrap();
        let err = authority.register_pending(pending(CHANNEL)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn revoke_reports_whether_a_record_existed() {
        let (authority, _, _, _) = setup();
        authority
            .approve(CHANNEL, "Test Group", OPERATOR, 7, true)
            .await
            .unwrap();

        assert!(authority.revoke(CHANNEL).await.unwrap());
        assert!(!authority.revoke(CHANNEL).await.unwrap());
    }

    #[tokio::test]
    async fn stats_respect_expiry_and_permission_flags() {
        let (authority, _, clock, _) = setup();
        authority
            .approve(ChatId(-1), "Active", OPERATOR, 30, true)
            .await
            .unwrap();
        authority
            .approve(ChatId(-2), "Expiring", OPERATOR, 2, true)
            .await
            .unwrap();
        authority
            .approve(ChatId(-3), "No Perms", OPERATOR, 30, false)
            .await
            .unwrap();
        authority
            .approve(ChatId(-4), "Lapsed", OPERATOR, 1, true)
            .await
            .unwrap();
        clock.advance(chrono::Duration::days(1) + chrono::Duration::hours(1));

        assert_eq!(authority.count_active().await, 2);
        assert_eq!(authority.count_expiring_within(3).await, 1);
    }

    #[tokio::test]
    async fn days_remaining_distinguishes_unbounded_approvals() {
        let (authority, store, _, _) = setup();
        assert_eq!(authority.days_remaining(CHANNEL).await, None);

        store
            .insert_channel(ApprovedChannel {
                channel_id: CHANNEL,
                title: "Forever".to_string(),
                approved_by: OPERATOR,
                approved_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
                has_admin_permissions: true,
                valid_until: None,
            })
            .await
            .unwrap();
        assert_eq!(authority.days_remaining(CHANNEL).await, Some(None));

        // Unbounded approvals never expire.
        authority.check_usable(CHANNEL).await.unwrap();
    }
}
