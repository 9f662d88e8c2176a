use crate::pool::{Pool, PoolConfig};
use crate::redis_conn::RedisDialer;
use async_trait::async_trait;
use larder::converter::Converter;
use larder::events::{CacheEvent, EventSink};
use larder::flight::{Flights, compute_error};
use larder::ports::{Cache, CacheValue, Connection, Dialer};
use larder::writer::{Erased, write_to};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::config::ConverterKind;
use shared::{ComputeError, Result, TtlSecs};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Expiry used when none is configured.
pub const DEFAULT_EXPIRE_TIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Backend on an external key/value store reached through a connection pool.
///
/// Values are serialized with the converter and written with an expiry in
/// whole seconds. Writes run in the background; the store enforces expiry.
pub struct RemoteCache<D: Dialer = RedisDialer, C: Converter = ConverterKind> {
    pool: Pool<D>,
    converter: C,
    expire_time: Duration,
    flights: Flights,
    writes: TaskTracker,
    // Set by `shutdown`; a flush never reopens the tracker after that.
    shut_down: Arc<Mutex<bool>>,
    events: EventSink,
}

impl<D: Dialer, C: Converter> Clone for RemoteCache<D, C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            converter: self.converter.clone(),
            expire_time: self.expire_time,
            flights: self.flights.clone(),
            writes: self.writes.clone(),
            shut_down: Arc::clone(&self.shut_down),
            events: self.events.clone(),
        }
    }
}

impl<C: Converter> RemoteCache<RedisDialer, C> {
    /// Builds a Redis-backed cache. The URI is validated here; no connection
    /// is opened until the first command.
    pub fn connect(uri: &str, converter: C, pool: PoolConfig) -> Result<Self> {
        let dialer = RedisDialer::parse(uri)?;
        info!(endpoint = ?dialer.uri().endpoint, "remote cache configured");
        Ok(Self::with_dialer(dialer, converter, pool))
    }
}

impl<D: Dialer, C: Converter> RemoteCache<D, C> {
    pub fn with_dialer(dialer: D, converter: C, pool: PoolConfig) -> Self {
        Self {
            pool: Pool::new(dialer, pool),
            converter,
            expire_time: DEFAULT_EXPIRE_TIME,
            flights: Flights::new(),
            writes: TaskTracker::new(),
            shut_down: Arc::new(Mutex::new(false)),
            events: EventSink::default(),
        }
    }

    /// Overrides the expiry sent with every write; zero keeps the current one.
    pub fn with_expire_time(mut self, expire_time: Duration) -> Self {
        if !expire_time.is_zero() {
            self.expire_time = expire_time;
        }
        self
    }

    pub fn with_event_broadcaster(self, broadcaster: broadcast::Sender<CacheEvent>) -> Self {
        self.events.attach(broadcaster);
        self
    }

    pub fn expire_time(&self) -> Duration {
        self.expire_time
    }

    pub fn pool(&self) -> &Pool<D> {
        &self.pool
    }

    /// Waits for every background write issued so far.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;

        let shut_down = self.shut_down.lock();
        if !*shut_down {
            self.writes.reopen();
        }
    }

    /// Waits for pending writes, then closes idle connections.
    pub async fn shutdown(&self) {
        {
            let mut shut_down = self.shut_down.lock();
            *shut_down = true;
            self.writes.close();
        }
        self.writes.wait().await;
        self.pool.clear();
        debug!("remote cache shut down");
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = match read(&self.pool, key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(key, "not found in remote cache");
                return None;
            }
            Err(err) => {
                warn!(key, error = %err, "remote cache read failed");
                return None;
            }
        };

        match self.converter.decode(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "remote cache value could not be decoded");
                None
            }
        }
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match self.converter.encode(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key, error = %err, "failed to encode value for remote cache");
                return;
            }
        };

        let pool = self.pool.clone();
        let events = self.events.clone();
        let key = key.to_string();
        let ttl = TtlSecs::from_duration(self.expire_time);

        self.writes.spawn(async move {
            match write(&pool, &key, &payload, ttl).await {
                Ok(()) => {
                    info!(key = %key, ttl_secs = ttl.0, "stored in remote cache");
                    events.emit(CacheEvent::stored(key, Some(ttl.0)));
                }
                Err(err) => warn!(key = %key, error = %err, "failed to store in remote cache"),
            }
        });
    }
}

async fn read<D: Dialer>(pool: &Pool<D>, key: &str) -> Result<Option<Vec<u8>>> {
    let mut conn = pool.get().await?;
    let reply = pool.timed(conn.get(key)).await;
    if reply.is_err() {
        conn.discard();
    }
    reply
}

async fn write<D: Dialer>(pool: &Pool<D>, key: &str, payload: &[u8], ttl: TtlSecs) -> Result<()> {
    let mut conn = pool.get().await?;
    let reply = pool.timed(conn.set_ex(key, payload, ttl)).await;
    if reply.is_err() {
        conn.discard();
    }
    reply
}

#[async_trait]
impl<D: Dialer, C: Converter> Cache for RemoteCache<D, C> {
    async fn load_or_store<T, F, Fut, E>(&self, key: &str, dest: &mut T, compute: F) -> Result<bool>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(value) = self.fetch::<T>(key).await {
            *dest = value;
            return Ok(true);
        }

        let computed = self
            .flights
            .run::<T, _, _>(key, || async move {
                let value = compute().await.map_err(compute_error)?;
                self.persist(key, &value);
                Ok::<_, ComputeError>(Erased::new(value))
            })
            .await?;

        write_to(&computed, dest)?;
        Ok(false)
    }

    async fn load<T: CacheValue>(&self, key: &str, dest: &mut T) -> bool {
        match self.fetch::<T>(key).await {
            Some(value) => {
                *dest = value;
                true
            }
            None => false,
        }
    }

    async fn store<T: CacheValue>(&self, key: &str, value: T) {
        self.persist(key, &value);
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await.inspect_err(|err| {
            warn!(key, error = %err, "failed to delete from remote cache");
        })?;

        let reply = self.pool.timed(conn.del(key)).await;
        match &reply {
            Ok(()) => self.events.emit(CacheEvent::deleted(key)),
            Err(err) => {
                conn.discard();
                warn!(key, error = %err, "failed to delete from remote cache");
            }
        }
        reply
    }
}

impl<D: Dialer, C: Converter + std::fmt::Debug> std::fmt::Debug for RemoteCache<D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCache")
            .field("pool", &self.pool)
            .field("converter", &self.converter)
            .field("expire_time", &self.expire_time)
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDialer;
    use larder::converter::{BincodeConverter, JsonConverter};
    use serde::Deserialize;
    use shared::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct StarDto {
        name: String,
    }

    fn pool_config() -> PoolConfig {
        PoolConfig {
            max_idle: 5,
            idle_timeout: Duration::ZERO,
            connect_timeout: Duration::from_millis(200),
        }
    }

    fn remote(dialer: &MemoryDialer) -> RemoteCache<MemoryDialer, JsonConverter> {
        RemoteCache::with_dialer(dialer.clone(), JsonConverter, pool_config())
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut v = String::new();

        let hit = cache
            .load_or_store("key", &mut v, || async { Ok::<_, Error>("value".to_string()) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(v, "value");

        cache.flush().await;

        let hit = cache
            .load_or_store("key", &mut v, || async { Ok::<_, Error>("other".to_string()) })
            .await
            .unwrap();
        assert!(hit);
        assert_eq!(v, "value");
    }

    #[tokio::test]
    async fn test_outage_degrades_to_compute() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut v = String::new();

        cache
            .load_or_store("key", &mut v, || async { Ok::<_, Error>("value".to_string()) })
            .await
            .unwrap();
        cache.flush().await;

        dialer.set_online(false);
        let hit = cache
            .load_or_store("key", &mut v, || async { Ok::<_, Error>("sentinel".to_string()) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(v, "sentinel");
        cache.flush().await;

        dialer.set_online(true);
        let hit = cache
            .load_or_store("key", &mut v, || async { Ok::<_, Error>("sentinel".to_string()) })
            .await
            .unwrap();
        assert!(hit);
        assert_eq!(v, "value");
    }

    #[tokio::test]
    async fn test_struct_value_is_stored_as_json() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut star = StarDto {
            name: String::new(),
        };

        cache
            .load_or_store("test:star", &mut star, || async {
                Ok::<_, Error>(StarDto {
                    name: "Kwone Sang Woo".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(star.name, "Kwone Sang Woo");
        cache.flush().await;

        let (payload, ttl) = dialer.raw("test:star").unwrap();
        assert_eq!(payload, br#"{"name":"Kwone Sang Woo"}"#);
        assert_eq!(ttl, TtlSecs(86_400));
    }

    #[tokio::test]
    async fn test_store_then_load_with_binary_converter() {
        let dialer = MemoryDialer::new();
        let cache = RemoteCache::with_dialer(dialer.clone(), BincodeConverter, pool_config())
            .with_expire_time(Duration::from_secs(60));

        cache.store("k", vec![1u64, 2, 3]).await;
        cache.flush().await;

        let mut v: Vec<u64> = Vec::new();
        assert!(cache.load("k", &mut v).await);
        assert_eq!(v, vec![1, 2, 3]);
        assert_eq!(dialer.raw("k").unwrap().1, TtlSecs(60));
    }

    #[tokio::test]
    async fn test_sub_second_expiry_rounds_to_one_second() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer).with_expire_time(Duration::from_millis(1500));

        cache.store("k", 1u8).await;
        cache.flush().await;

        assert_eq!(dialer.raw("k").unwrap().1, TtlSecs(1));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let dialer = MemoryDialer::new();
        dialer.put_raw("k", b"not json");
        let cache = remote(&dialer);

        let mut v = 0u32;
        assert!(!cache.load("k", &mut v).await);

        let hit = cache
            .load_or_store("k", &mut v, || async { Ok::<_, Error>(5u32) })
            .await
            .unwrap();
        assert!(!hit);
        assert_eq!(v, 5);

        cache.flush().await;
        assert_eq!(dialer.raw("k").unwrap().0, b"5");
    }

    #[tokio::test]
    async fn test_load_fails_quietly_when_offline() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        cache.store("k", 1u32).await;
        cache.flush().await;

        dialer.set_online(false);
        let mut v = 0u32;
        assert!(!cache.load("k", &mut v).await);
        assert_eq!(v, 0);
    }

    #[tokio::test]
    async fn test_compute_failure_writes_nothing() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut v = 0u32;

        let err = cache
            .load_or_store("k", &mut v, || async { Err::<u32, _>("upstream timeout") })
            .await
            .unwrap_err();
        assert_eq!(err.compute_source().unwrap().to_string(), "upstream timeout");

        cache.flush().await;
        assert!(dialer.raw("k").is_none());
    }

    #[tokio::test]
    async fn test_delete_surfaces_backend_errors() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        cache.store("k", 1u32).await;
        cache.flush().await;

        cache.delete("k").await.unwrap();
        assert!(dialer.raw("k").is_none());
        cache.delete("k").await.unwrap();

        dialer.set_online(false);
        let result = cache.delete("k").await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_connections_return_to_the_pool() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut v = 0u32;

        for _ in 0..5 {
            cache.load("k", &mut v).await;
        }

        assert_eq!(dialer.dials(), 1);
        assert_eq!(cache.pool().idle_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_computation() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let calls = AtomicUsize::new(0);
        let compute = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, Error>("shared".to_string())
        };

        let mut a = String::new();
        let mut b = String::new();
        let (first, second) = tokio::join!(
            cache.load_or_store("k", &mut a, compute),
            cache.load_or_store("k", &mut b, compute),
        );

        assert!(!first.unwrap() && !second.unwrap());
        assert_eq!((a.as_str(), b.as_str()), ("shared", "shared"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_follow_remote_writes() {
        let dialer = MemoryDialer::new();
        let (tx, mut rx) = broadcast::channel(8);
        let cache = remote(&dialer).with_event_broadcaster(tx);

        cache.store("k", 1u32).await;
        cache.flush().await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            CacheEvent::Stored { ttl_secs: Some(86_400), .. }
        ));

        cache.delete("k").await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), CacheEvent::Deleted { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_drains_writes_and_idle_connections() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);

        cache.store("k", 1u32).await;
        cache.shutdown().await;

        assert!(dialer.raw("k").is_some());
        assert_eq!(cache.pool().idle_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_racing_shutdown_does_not_hang() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);

        for i in 0..20u32 {
            cache.store(&format!("k{i}"), i).await;
        }
        let finished = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(cache.flush(), cache.shutdown(), cache.flush());
        })
        .await;

        assert!(finished.is_ok());
        assert!(cache.writes.is_closed());
        cache.flush().await;
        assert!(cache.writes.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_callers_with_different_types() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut wide = 0u64;
        let mut narrow = 0u32;

        let (first, second) = tokio::join!(
            cache.load_or_store("k", &mut wide, || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, Error>(7u64)
            }),
            cache.load_or_store("k", &mut narrow, || async { Ok::<_, Error>(7u32) }),
        );

        assert!(!first.unwrap());
        assert!(!second.unwrap());
        assert_eq!((wide, narrow), (7, 7));
        cache.flush().await;
    }

    #[tokio::test]
    async fn test_joiner_of_failed_computation_gets_its_own_value() {
        let dialer = MemoryDialer::new();
        let cache = remote(&dialer);
        let mut a = String::new();
        let mut b = String::new();

        let (first, second) = tokio::join!(
            cache.load_or_store("k", &mut a, || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<String, _>("upstream down")
            }),
            cache.load_or_store("k", &mut b, || async { Ok::<_, Error>("fresh".to_string()) }),
        );

        assert!(matches!(first, Err(Error::ComputeFailed(_))));
        assert!(!second.unwrap());
        assert_eq!(b, "fresh");

        cache.flush().await;
        assert_eq!(dialer.raw("k").unwrap().0, br#""fresh""#);
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let result = RemoteCache::connect("http://127.0.0.1:6379", JsonConverter, pool_config());
        assert!(matches!(result, Err(Error::InvalidScheme(_))));
    }

    #[tokio::test]
    async fn test_unreachable_redis_still_serves_computed_values() {
        let cache =
            RemoteCache::connect("redis://127.0.0.1:1", ConverterKind::Json, pool_config()).unwrap();
        let mut v = String::new();

        let hit = cache
            .load_or_store("key", &mut v, || async { Ok::<_, Error>("value".to_string()) })
            .await
            .unwrap();

        assert!(!hit);
        assert_eq!(v, "value");
        assert!(cache.delete("key").await.is_err());
        cache.shutdown().await;
    }
}
