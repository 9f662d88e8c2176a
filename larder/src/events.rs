use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Stored {
        key: String,
        ttl_secs: Option<u64>,
        timestamp: i64,
    },
    Deleted {
        key: String,
        timestamp: i64,
    },
    Expired {
        key: String,
        timestamp: i64,
    },
    /// Dropped to stay under the capacity bound.
    Evicted {
        key: String,
        timestamp: i64,
    },
}

impl CacheEvent {
    pub fn stored(key: impl Into<String>, ttl_secs: Option<u64>) -> Self {
        CacheEvent::Stored {
            key: key.into(),
            ttl_secs,
            timestamp: now_timestamp(),
        }
    }

    pub fn deleted(key: impl Into<String>) -> Self {
        CacheEvent::Deleted {
            key: key.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn expired(key: impl Into<String>) -> Self {
        CacheEvent::Expired {
            key: key.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn evicted(key: impl Into<String>) -> Self {
        CacheEvent::Evicted {
            key: key.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Stored { key, .. }
            | CacheEvent::Deleted { key, .. }
            | CacheEvent::Expired { key, .. }
            | CacheEvent::Evicted { key, .. } => key,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Stored { .. } => "stored",
            CacheEvent::Deleted { .. } => "deleted",
            CacheEvent::Expired { .. } => "expired",
            CacheEvent::Evicted { .. } => "evicted",
        }
    }
}

/// Current time in seconds since the UNIX epoch
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Optional notification channel a backend reports entry changes to.
/// Clones share the same slot, so a broadcaster attached after the backend is
/// built still reaches callbacks created earlier.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Arc<RwLock<Option<broadcast::Sender<CacheEvent>>>>,
}

impl EventSink {
    pub fn attach(&self, broadcaster: broadcast::Sender<CacheEvent>) {
        *self.sender.write() = Some(broadcaster);
    }

    pub fn emit(&self, event: CacheEvent) {
        let guard = self.sender.read();
        let Some(broadcaster) = guard.as_ref() else {
            return;
        };

        let kind = event.kind();
        let key = event.key().to_string();
        match broadcaster.send(event) {
            Ok(subscriber_count) => {
                tracing::debug!(
                    "Broadcasted {} event for key '{}' to {} subscriber(s)",
                    kind,
                    key,
                    subscriber_count
                );
            }
            Err(_) => {
                tracing::debug!("No subscribers for {} event on key '{}'", kind, key);
            }
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("attached", &self.sender.read().is_some())
            .finish()
    }
}
