//! Per-user learning language and delivery mode.

use crate::cache::Cache;
use crate::membership;
use crate::store::{user_key, KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// How translations are delivered to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Translations are posted in the chat
    Overlay,
    /// No translations
    #[default]
    Off,
}

pub const VALID_MODES: &[&str] = &["overlay", "off"];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid mode '{0}'")]
pub struct InvalidMode(pub String);

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Overlay => "overlay",
            Mode::Off => "off",
        }
    }

    /// Human-readable status for /getsettings
    pub fn description(&self) -> &'static str {
        match self {
            Mode::Overlay => "Active (overlay)",
            Mode::Off => "Inactive (off)",
        }
    }
}

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overlay" => Ok(Mode::Overlay),
            "off" => Ok(Mode::Off),
            _ => Err(InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub language: Option<String>,
    #[serde(default)]
    pub mode: Mode,
}

impl UserSettings {
    /// The language to translate into, if this user should receive translations.
    pub fn target_language(&self) -> Option<&str> {
        if self.mode == Mode::Off {
            return None;
        }
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}

/// A single-field change applied by [`SettingsStore::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsUpdate {
    Language(String),
    Mode(Mode),
}

impl SettingsUpdate {
    fn apply(&self, settings: &mut UserSettings) {
        match self {
            SettingsUpdate::Language(language) => settings.language = Some(language.clone()),
            SettingsUpdate::Mode(mode) => settings.mode = *mode,
        }
    }
}

impl fmt::Display for SettingsUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsUpdate::Language(language) => write!(f, "language={}", language),
            SettingsUpdate::Mode(mode) => write!(f, "mode={}", mode),
        }
    }
}

/// Settings persisted under `user:<id>` as JSON, fronted by the shared [`Cache`].
pub struct SettingsStore {
    store: Arc<dyn KvStore>,
    cache: Arc<Cache>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KvStore>, cache: Arc<Cache>) -> Self {
        Self { store, cache }
    }

    /// Current settings for `user_id`.
    ///
    /// A stale cache is rebuilt first, through the same single-flight refresh
    /// as membership reads. Users the snapshot does not cover are read through
    /// the store, creating and persisting defaults for unknown users. A store
    /// failure degrades to the cached copy, or the defaults.
    pub async fn get(&self, user_id: i64) -> UserSettings {
        membership::ensure_fresh(self.store.as_ref(), &self.cache).await;

        if !self.cache.is_stale().await {
            if let Some(settings) = self.cache.settings(user_id).await {
                return settings;
            }
        }

        match self.load(user_id).await {
            Ok(settings) => {
                self.cache.put_settings(user_id, settings.clone()).await;
                settings
            }
            Err(e) => {
                error!("Error loading settings for user {}: {}", user_id, e);
                self.cache.settings(user_id).await.unwrap_or_default()
            }
        }
    }

    /// Apply `update`, persist the full record and refresh the cache.
    ///
    /// A failed write is logged and otherwise ignored; the cached copy still
    /// reflects the change. Any write restarts the staleness window of the
    /// whole cache.
    pub async fn set(&self, user_id: i64, update: SettingsUpdate) -> UserSettings {
        let mut settings = self.get(user_id).await;
        update.apply(&mut settings);

        match self.persist(user_id, &settings).await {
            Ok(()) => info!("Updated settings for User{}: {}", user_id, update),
            Err(e) => error!("Error saving settings for user {}: {}", user_id, e),
        }

        self.cache.put_settings(user_id, settings.clone()).await;
        self.cache.mark_fresh().await;
        settings
    }

    /// Read settings straight from the store, creating defaults when absent.
    pub async fn load(&self, user_id: i64) -> Result<UserSettings, StoreError> {
        load_settings(self.store.as_ref(), user_id).await
    }

    async fn persist(&self, user_id: i64, settings: &UserSettings) -> Result<(), StoreError> {
        persist(self.store.as_ref(), user_id, settings).await
    }
}

pub(crate) async fn load_settings(
    store: &dyn KvStore,
    user_id: i64,
) -> Result<UserSettings, StoreError> {
    if let Some(raw) = store.get(&user_key(user_id)).await? {
        match serde_json::from_str(&raw) {
            Ok(settings) => return Ok(settings),
            // Unreadable records are replaced by defaults below
            Err(e) => error!("Error parsing stored settings for user {}: {}", user_id, e),
        }
    }

    let defaults = UserSettings::default();
    persist(store, user_id, &defaults).await?;
    info!("Created default settings for User{}", user_id);
    Ok(defaults)
}

async fn persist(store: &dyn KvStore, user_id: i64, settings: &UserSettings) -> Result<(), StoreError> {
    let json = serde_json::to_string(settings)?;
    store.set(&user_key(user_id), &json).await
}
