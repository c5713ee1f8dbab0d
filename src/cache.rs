//! In-process snapshot of user settings and chat membership.
//!
//! The whole snapshot shares one staleness timestamp: it is either fresh or
//! stale as a unit, there is no per-entry expiry. [`SettingsStore`] and
//! [`MembershipIndex`] both read and write through the same [`Cache`].
//!
//! [`SettingsStore`]: crate::settings::SettingsStore
//! [`MembershipIndex`]: crate::membership::MembershipIndex

use crate::settings::UserSettings;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Time source for staleness checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

/// Mirrored settings plus the users written since the current rebuild began.
#[derive(Default)]
struct SettingsMirror {
    entries: HashMap<i64, UserSettings>,
    written: HashSet<i64>,
}

pub struct Cache {
    settings: RwLock<SettingsMirror>,
    members: RwLock<HashMap<i64, HashSet<i64>>>,
    refreshed_at: RwLock<Option<Instant>>,
    refresh_lock: Mutex<()>,
    rebuilds: AtomicU64,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings: RwLock::new(SettingsMirror::default()),
            members: RwLock::new(HashMap::new()),
            refreshed_at: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            rebuilds: AtomicU64::new(0),
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A cache that has never been refreshed is stale.
    pub async fn is_stale(&self) -> bool {
        match *self.refreshed_at.read().await {
            Some(at) => self.clock.now().saturating_duration_since(at) >= self.ttl,
            None => true,
        }
    }

    /// Restart the staleness window from now.
    pub async fn mark_fresh(&self) {
        *self.refreshed_at.write().await = Some(self.clock.now());
    }

    /// Force the next freshness check to fail. Cached entries are kept.
    pub async fn invalidate(&self) {
        *self.refreshed_at.write().await = None;
    }

    pub async fn settings(&self, user_id: i64) -> Option<UserSettings> {
        self.settings.read().await.entries.get(&user_id).cloned()
    }

    pub async fn put_settings(&self, user_id: i64, settings: UserSettings) {
        let mut mirror = self.settings.write().await;
        mirror.entries.insert(user_id, settings);
        mirror.written.insert(user_id);
    }

    pub async fn members(&self, chat_id: i64) -> Option<HashSet<i64>> {
        self.members.read().await.get(&chat_id).cloned()
    }

    pub async fn put_members(&self, chat_id: i64, members: HashSet<i64>) {
        self.members.write().await.insert(chat_id, members);
    }

    /// Insert into an already mirrored chat. Returns false when the chat is not
    /// mirrored, so a later lookup loads the full persisted set.
    pub async fn add_member(&self, chat_id: i64, user_id: i64) -> bool {
        match self.members.write().await.get_mut(&chat_id) {
            Some(members) => {
                members.insert(user_id);
                true
            }
            None => false,
        }
    }

    /// Start tracking settings writes that a rebuild must not overwrite.
    /// Call with the refresh lock held, before reading the store.
    pub async fn begin_rebuild(&self) {
        self.settings.write().await.written.clear();
    }

    /// Swap in a rebuilt snapshot and mark the cache fresh.
    ///
    /// Membership is append-only, so ids mirrored after the rebuild read its
    /// chat are carried over instead of being dropped. Settings written since
    /// [`begin_rebuild`](Self::begin_rebuild) are newer than anything the
    /// rebuild read and are kept over the snapshot's copy.
    pub async fn install_snapshot(
        &self,
        mut settings: HashMap<i64, UserSettings>,
        mut members: HashMap<i64, HashSet<i64>>,
    ) {
        {
            let mut current = self.members.write().await;
            for (chat_id, known) in current.drain() {
                members.entry(chat_id).or_default().extend(known);
            }
            *current = members;
        }
        {
            let mut mirror = self.settings.write().await;
            let written = std::mem::take(&mut mirror.written);
            for user_id in written {
                if let Some(current) = mirror.entries.remove(&user_id) {
                    settings.insert(user_id, current);
                }
            }
            mirror.entries = settings;
        }
        self.mark_fresh().await;
        // Counted only once fresh, so a waiter that sees the new count also sees freshness
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of completed wholesale rebuilds.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Serialize full rebuilds.
    pub async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }
}
