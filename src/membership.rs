//! Append-only record of which users have been seen in which chat.

use crate::cache::Cache;
use crate::settings::{load_settings, UserSettings};
use crate::store::{chat_members_key, parse_chat_members_key, KvStore, StoreError, CHAT_KEY_PREFIX};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct MembershipIndex {
    store: Arc<dyn KvStore>,
    cache: Arc<Cache>,
}

impl MembershipIndex {
    pub fn new(store: Arc<dyn KvStore>, cache: Arc<Cache>) -> Self {
        Self { store, cache }
    }

    /// Record that `user_id` was seen in `chat_id`. Idempotent.
    pub async fn add(&self, user_id: i64, chat_id: i64) {
        if let Err(e) = self
            .store
            .set_add(&chat_members_key(chat_id), &user_id.to_string())
            .await
        {
            error!(
                "Error recording User{} as member of chat {}: {}",
                user_id, chat_id, e
            );
        }
        self.cache.add_member(chat_id, user_id).await;
    }

    /// Every user ever seen in `chat_id`.
    ///
    /// Rebuilds the cache first if it is stale. A chat missing from the cache
    /// is loaded whole from the store; if that fails the result is empty.
    pub async fn get_members(&self, chat_id: i64) -> HashSet<i64> {
        self.ensure_fresh().await;

        if let Some(members) = self.cache.members(chat_id).await {
            return members;
        }

        match self.load_members(chat_id).await {
            Ok(members) => {
                self.cache.put_members(chat_id, members.clone()).await;
                members
            }
            Err(e) => {
                error!("Error loading members of chat {}: {}", chat_id, e);
                HashSet::new()
            }
        }
    }

    /// Run [`refresh_all`](Self::refresh_all) if the cache is stale.
    /// Returns whether this call performed the rebuild.
    pub async fn ensure_fresh(&self) -> bool {
        ensure_fresh(self.store.as_ref(), &self.cache).await
    }

    /// Rebuild the whole cache from the store: every chat's member set and
    /// the settings of every member.
    ///
    /// Concurrent callers are collapsed: a caller that waited on an in-flight
    /// rebuild returns without repeating it. Returns whether this call
    /// performed the rebuild.
    pub async fn refresh_all(&self) -> bool {
        let seen = self.cache.rebuild_count();
        refresh_since(self.store.as_ref(), &self.cache, seen).await
    }

    async fn load_members(&self, chat_id: i64) -> Result<HashSet<i64>, StoreError> {
        load_members(self.store.as_ref(), chat_id).await
    }
}

/// Stale-cache check shared by membership and settings reads.
pub(crate) async fn ensure_fresh(store: &dyn KvStore, cache: &Cache) -> bool {
    let seen = cache.rebuild_count();
    if !cache.is_stale().await {
        return false;
    }
    refresh_since(store, cache, seen).await
}

async fn refresh_since(store: &dyn KvStore, cache: &Cache, seen: u64) -> bool {
    let _guard = cache.lock_refresh().await;
    if cache.rebuild_count() != seen {
        debug!("Cache already rebuilt by a concurrent caller");
        return false;
    }

    cache.begin_rebuild().await;
    match rebuild(store, cache).await {
        Ok((chats, users)) => {
            info!(
                "Cache refreshed: {} chats, {} users with settings",
                chats, users
            );
            true
        }
        Err(e) => {
            error!("Cache refresh failed, keeping previous snapshot: {}", e);
            false
        }
    }
}

async fn rebuild(store: &dyn KvStore, cache: &Cache) -> Result<(usize, usize), StoreError> {
    let keys = store.scan_prefix(CHAT_KEY_PREFIX).await?;

    let mut members_by_chat: HashMap<i64, HashSet<i64>> = HashMap::new();
    let mut settings_by_user: HashMap<i64, UserSettings> = HashMap::new();

    for chat_id in keys.iter().filter_map(|k| parse_chat_members_key(k)) {
        let members = match load_members(store, chat_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Skipping chat {} during refresh: {}", chat_id, e);
                continue;
            }
        };

        for &user_id in &members {
            if settings_by_user.contains_key(&user_id) {
                continue;
            }
            match load_settings(store, user_id).await {
                Ok(settings) => {
                    settings_by_user.insert(user_id, settings);
                }
                Err(e) => warn!("Skipping settings of User{} during refresh: {}", user_id, e),
            }
        }

        members_by_chat.insert(chat_id, members);
    }

    let counts = (members_by_chat.len(), settings_by_user.len());
    cache.install_snapshot(settings_by_user, members_by_chat).await;
    Ok(counts)
}

async fn load_members(store: &dyn KvStore, chat_id: i64) -> Result<HashSet<i64>, StoreError> {
    let raw = store.set_members(&chat_members_key(chat_id)).await?;
    Ok(raw
        .iter()
        .filter_map(|id| match id.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring malformed member id '{}' in chat {}", id, chat_id);
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::settings::{Mode, SettingsStore, SettingsUpdate};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    const TTL: Duration = Duration::from_secs(300);

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<Cache>,
        clock: Arc<ManualClock>,
        settings: Arc<SettingsStore>,
        index: Arc<MembershipIndex>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(Cache::with_clock(TTL, clock.clone()));
        let settings = Arc::new(SettingsStore::new(store.clone(), cache.clone()));
        let index = Arc::new(MembershipIndex::new(store.clone(), cache.clone()));
        Fixture {
            store,
            cache,
            clock,
            settings,
            index,
        }
    }

    /// Pauses after reading `gated_key` until released.
    struct GatedStore {
        inner: MemoryStore,
        gated_key: String,
        reached: Notify,
        release: Notify,
    }

    #[async_trait]
    impl KvStore for GatedStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let value = self.inner.get(key).await?;
            if key == self.gated_key {
                self.reached.notify_one();
                self.release.notified().await;
            }
            Ok(value)
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
            self.inner.set_add(key, member).await
        }

        async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
            self.inner.set_members(key).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
            self.inner.scan_prefix(prefix).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    // ==================== add / get_members Tests ====================

    #[tokio::test]
    async fn test_add_twice_yields_single_member() {
        let f = fixture();
        f.index.add(1, -100).await;
        f.index.add(1, -100).await;

        let members = f.index.get_members(-100).await;
        assert_eq!(members, HashSet::from([1]));
    }

    #[tokio::test]
    async fn test_get_members_reflects_every_add() {
        let f = fixture();
        for user in 1..=5 {
            f.index.add(user, -100).await;
        }
        assert_eq!(f.index.get_members(-100).await, (1..=5).collect::<HashSet<i64>>());

        // Adds after the chat is mirrored land in the mirror too
        f.index.add(6, -100).await;
        assert_eq!(f.index.get_members(-100).await, (1..=6).collect::<HashSet<i64>>());
    }

    #[tokio::test]
    async fn test_chats_are_independent() {
        let f = fixture();
        f.index.add(1, -100).await;
        f.index.add(2, -200).await;

        assert_eq!(f.index.get_members(-100).await, HashSet::from([1]));
        assert_eq!(f.index.get_members(-200).await, HashSet::from([2]));
        assert!(f.index.get_members(-300).await.is_empty());
    }

    #[tokio::test]
    async fn test_unmirrored_chat_is_loaded_whole_from_store() {
        let f = fixture();
        f.store.set_add("chat:-100:members", "1").await.unwrap();
        f.store.set_add("chat:-100:members", "2").await.unwrap();
        f.cache.mark_fresh().await;

        // Chat not mirrored yet: the add must not shadow the persisted members
        f.index.add(3, -100).await;
        assert_eq!(f.index.get_members(-100).await, HashSet::from([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_get_members_store_outage_returns_empty() {
        let f = fixture();
        f.cache.mark_fresh().await;
        f.store.set_available(false);

        assert!(f.index.get_members(-100).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_member_ids_are_skipped() {
        let f = fixture();
        f.store.set_add("chat:-100:members", "1").await.unwrap();
        f.store.set_add("chat:-100:members", "bogus").await.unwrap();

        assert_eq!(f.index.get_members(-100).await, HashSet::from([1]));
    }

    // ==================== Staleness / refresh_all Tests ====================

    #[tokio::test]
    async fn test_refresh_warms_members_and_settings() {
        let f = fixture();
        f.store.set_add("chat:-100:members", "1").await.unwrap();
        f.store.set_add("chat:-200:members", "2").await.unwrap();
        f.store
            .set("user:1", r#"{"language":"Spanish","mode":"overlay"}"#)
            .await
            .unwrap();

        assert!(f.index.refresh_all().await);
        assert!(!f.cache.is_stale().await);

        assert_eq!(f.cache.members(-100).await, Some(HashSet::from([1])));
        assert_eq!(f.cache.members(-200).await, Some(HashSet::from([2])));
        assert_eq!(
            f.cache.settings(1).await.and_then(|s| s.language),
            Some("Spanish".to_string())
        );
        // Member without a record gets persisted defaults
        assert_eq!(f.cache.settings(2).await, Some(UserSettings::default()));
        assert!(f.store.get("user:2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_exactly_one_refresh() {
        let f = fixture();
        f.index.add(1, -100).await;

        f.index.get_members(-100).await;
        assert_eq!(f.store.scans(), 1, "Initial cache is stale");

        f.index.get_members(-100).await;
        f.settings.get(1).await;
        assert_eq!(f.store.scans(), 1, "Fresh cache must not refresh");

        f.clock.advance(TTL - Duration::from_secs(1));
        f.index.get_members(-100).await;
        assert_eq!(f.store.scans(), 1, "Still inside the TTL window");

        f.clock.advance(Duration::from_secs(1));
        f.index.get_members(-100).await;
        f.index.get_members(-100).await;
        assert_eq!(f.store.scans(), 2, "One refresh after the TTL elapsed");
    }

    #[tokio::test]
    async fn test_settings_write_postpones_refresh() {
        let f = fixture();
        f.index.get_members(-100).await;
        assert_eq!(f.store.scans(), 1);

        f.clock.advance(TTL - Duration::from_secs(10));
        f.settings.set(1, SettingsUpdate::Mode(Mode::Overlay)).await;
        f.clock.advance(Duration::from_secs(20));

        f.index.get_members(-100).await;
        assert_eq!(f.store.scans(), 1, "Write restarted the window");
    }

    #[tokio::test]
    async fn test_concurrent_stale_triggers_collapse_into_one_rebuild() {
        let f = fixture();
        f.index.add(1, -100).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let index = f.index.clone();
                tokio::spawn(async move { index.ensure_fresh().await })
            })
            .collect();

        let mut rebuilt = 0;
        for handle in handles {
            if handle.await.expect("task panicked") {
                rebuilt += 1;
            }
        }

        assert_eq!(rebuilt, 1);
        assert_eq!(f.store.scans(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot_and_stays_stale() {
        let f = fixture();
        f.index.add(1, -100).await;
        f.index.get_members(-100).await;

        f.clock.advance(TTL);
        f.store.set_available(false);

        assert!(!f.index.refresh_all().await);
        assert!(f.cache.is_stale().await);
        assert_eq!(f.cache.members(-100).await, Some(HashSet::from([1])));
    }

    #[tokio::test]
    async fn test_explicit_refresh_runs_even_when_fresh() {
        let f = fixture();
        f.cache.mark_fresh().await;
        f.store.set_add("chat:-100:members", "9").await.unwrap();

        assert!(!f.index.ensure_fresh().await);
        assert!(f.index.refresh_all().await);
        assert_eq!(f.cache.members(-100).await, Some(HashSet::from([9])));
    }

    #[tokio::test]
    async fn test_settings_write_during_refresh_is_not_reverted() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gated_key: "user:2".to_string(),
            reached: Notify::new(),
            release: Notify::new(),
        });
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(Cache::with_clock(TTL, clock));
        let settings = Arc::new(SettingsStore::new(store.clone(), cache.clone()));
        let index = Arc::new(MembershipIndex::new(store.clone(), cache.clone()));

        store.inner.set_add("chat:-100:members", "2").await.unwrap();
        store
            .inner
            .set("user:2", r#"{"language":"Spanish","mode":"off"}"#)
            .await
            .unwrap();
        cache
            .put_settings(
                2,
                UserSettings {
                    language: Some("Spanish".to_string()),
                    mode: Mode::Off,
                },
            )
            .await;
        cache.mark_fresh().await;

        let refresh = tokio::spawn({
            let index = index.clone();
            async move { index.refresh_all().await }
        });
        store.reached.notified().await;

        // Lands after the rebuild read user:2, before it installs
        settings.set(2, SettingsUpdate::Mode(Mode::Overlay)).await;
        store.release.notify_one();
        assert!(refresh.await.expect("refresh task panicked"));

        assert_eq!(cache.settings(2).await.map(|s| s.mode), Some(Mode::Overlay));

        settings
            .set(2, SettingsUpdate::Language("French".to_string()))
            .await;
        assert_eq!(
            store.inner.get("user:2").await.unwrap(),
            Some(r#"{"language":"French","mode":"overlay"}"#.to_string())
        );
    }
}
