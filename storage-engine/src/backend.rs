use crate::local::{Janitor, LocalCache};
use crate::pool::PoolConfig;
use crate::redis_conn::RedisDialer;
use crate::remote::{DEFAULT_EXPIRE_TIME, RemoteCache};
use async_trait::async_trait;
use larder::events::CacheEvent;
use larder::ports::{Cache, CacheValue};
use shared::Result;
use shared::config::{BackendKind, CacheConfig, ConverterKind};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Cache handle chosen at startup from configuration.
///
/// The local variant carries the janitor that removes expired entries in the
/// background; it runs until `shutdown` or until the last clone is dropped.
#[derive(Clone, Debug)]
pub enum Backend {
    Local {
        cache: LocalCache,
        janitor: Option<Arc<Janitor>>,
    },
    Remote(RemoteCache<RedisDialer, ConverterKind>),
}

impl Backend {
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let backend = match config.backend {
            BackendKind::Local => {
                let cache = LocalCache::from_config(config);
                let janitor = cache.start_janitor().map(Arc::new);
                Backend::Local { cache, janitor }
            }
            BackendKind::Remote => {
                let remote =
                    RemoteCache::connect(&config.uri, config.converter, PoolConfig::from(config))?
                        .with_expire_time(config.default_ttl.unwrap_or(DEFAULT_EXPIRE_TIME));
                Backend::Remote(remote)
            }
        };

        info!(backend = ?config.backend, "cache backend ready");
        Ok(backend)
    }

    pub fn with_event_broadcaster(self, broadcaster: broadcast::Sender<CacheEvent>) -> Self {
        match self {
            Backend::Local { cache, janitor } => Backend::Local {
                cache: cache.with_event_broadcaster(broadcaster),
                janitor,
            },
            Backend::Remote(cache) => Backend::Remote(cache.with_event_broadcaster(broadcaster)),
        }
    }

    /// Waits for background writes to land, or stops the local janitor.
    pub async fn shutdown(&self) {
        match self {
            Backend::Local { janitor, .. } => {
                if let Some(janitor) = janitor {
                    janitor.stop();
                }
            }
            Backend::Remote(cache) => cache.shutdown().await,
        }
    }
}

#[async_trait]
impl Cache for Backend {
    async fn load_or_store<T, F, Fut, E>(&self, key: &str, dest: &mut T, compute: F) -> Result<bool>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match self {
            Backend::Local { cache, .. } => cache.load_or_store(key, dest, compute).await,
            Backend::Remote(cache) => cache.load_or_store(key, dest, compute).await,
        }
    }

    async fn load<T: CacheValue>(&self, key: &str, dest: &mut T) -> bool {
        match self {
            Backend::Local { cache, .. } => cache.load(key, dest).await,
            Backend::Remote(cache) => cache.load(key, dest).await,
        }
    }

    async fn store<T: CacheValue>(&self, key: &str, value: T) {
        match self {
            Backend::Local { cache, .. } => cache.store(key, value).await,
            Backend::Remote(cache) => cache.store(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Backend::Local { cache, .. } => cache.delete(key).await,
            Backend::Remote(cache) => cache.delete(key).await,
        }
    }
}
