//! Persistent key-value storage.
//!
//! The relay only needs a handful of primitives: string get/set for user
//! settings, set-add/set-members for chat membership, and a prefix scan to
//! enumerate every membership key during a full cache rebuild.
//!
//! Backends are chosen by URL scheme:
//! - `redis://` / `rediss://` → [`RedisStore`]
//! - `postgres://` / `postgresql://` → [`PostgresStore`]
//! - `memory://` → [`MemoryStore`] (process-local, lost on restart)

mod memory;
mod postgres_store;
mod redis_store;

pub use memory::MemoryStore;
pub use postgres_store::PostgresStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Prefix shared by every chat membership key.
pub const CHAT_KEY_PREFIX: &str = "chat:";
const CHAT_KEY_SUFFIX: &str = ":members";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("failed to encode or decode record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unsupported store URL '{0}' (expected redis://, rediss://, postgres:// or memory://)")]
    UnsupportedUrl(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Add `member` to the set at `key`. Adding an existing member is a no-op.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// All members of the set at `key` (empty when the key does not exist).
    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// Every key (string or set) starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Open the backend named by `url`.
pub async fn connect(url: &str) -> Result<Arc<dyn KvStore>, StoreError> {
    let scheme = url.split("://").next().unwrap_or_default();
    let store: Arc<dyn KvStore> = match scheme {
        "redis" | "rediss" => {
            info!("Using Redis store");
            Arc::new(RedisStore::connect(url).await?)
        }
        "postgres" | "postgresql" => {
            info!("Using PostgreSQL store");
            Arc::new(PostgresStore::connect(url).await?)
        }
        "memory" => {
            info!("Using in-memory store (settings are lost on restart)");
            Arc::new(MemoryStore::new())
        }
        _ => return Err(StoreError::UnsupportedUrl(url.to_string())),
    };
    Ok(store)
}

pub fn user_key(user_id: i64) -> String {
    format!("user:{}", user_id)
}

pub fn chat_members_key(chat_id: i64) -> String {
    format!("{}{}{}", CHAT_KEY_PREFIX, chat_id, CHAT_KEY_SUFFIX)
}

/// Extract the chat id from a `chat:<id>:members` key.
pub fn parse_chat_members_key(key: &str) -> Option<i64> {
    key.strip_prefix(CHAT_KEY_PREFIX)?
        .strip_suffix(CHAT_KEY_SUFFIX)?
        .parse()
        .ok()
}
