use async_trait::async_trait;
use larder::events::{CacheEvent, EventSink};
use larder::flight::{Flights, compute_error};
use larder::ports::{Cache, CacheValue};
use larder::writer::{Erased, write_to};
use moka::future::Cache as MokaCache;
use moka::notification::RemovalCause;
use shared::{ComputeError, Result, TtlSecs};
use shared::config::CacheConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MIN_JANITOR_PERIOD: Duration = Duration::from_millis(10);
const MAX_JANITOR_PERIOD: Duration = Duration::from_secs(1);

/// In-process backend holding values by reference, with a fixed expiry from
/// the moment of writing. Reads never extend it.
#[derive(Clone)]
pub struct LocalCache {
    entries: MokaCache<String, Erased>,
    flights: Flights,
    events: EventSink,
    default_ttl: Option<Duration>,
}

impl LocalCache {
    /// Create an unbounded local cache; `None` or a zero TTL never expires.
    pub fn new(default_ttl: Option<Duration>) -> Self {
        Self::build(None, default_ttl)
    }

    /// Create a local cache holding at most `max_entries` values
    pub fn new_bounded(max_entries: u64, default_ttl: Option<Duration>) -> Self {
        Self::build(Some(max_entries), default_ttl)
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::build(config.max_entries, config.default_ttl)
    }

    fn build(max_entries: Option<u64>, default_ttl: Option<Duration>) -> Self {
        let default_ttl = default_ttl.filter(|ttl| !ttl.is_zero());
        let events = EventSink::default();
        let listener_events = events.clone();

        let mut builder = MokaCache::builder().name("larder-local").eviction_listener(
            move |key: Arc<String>, _value: Erased, cause: RemovalCause| match cause {
                RemovalCause::Expired => {
                    info!(key = %key, "deleted expired entry from local cache");
                    listener_events.emit(CacheEvent::expired(key.as_str()));
                }
                RemovalCause::Size => {
                    debug!(key = %key, "evicted entry from local cache");
                    listener_events.emit(CacheEvent::evicted(key.as_str()));
                }
                RemovalCause::Explicit | RemovalCause::Replaced => {}
            },
        );

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        if let Some(ttl) = default_ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            flights: Flights::new(),
            events,
            default_ttl,
        }
    }

    pub fn with_event_broadcaster(self, broadcaster: broadcast::Sender<CacheEvent>) -> Self {
        self.events.attach(broadcaster);
        self
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Applies pending expirations and evictions now.
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    /// Runs maintenance every `period` so expired entries are removed (and
    /// reported) even when the cache sees no traffic.
    pub fn spawn_janitor(&self, period: Duration) -> Janitor {
        let entries = self.entries.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                entries.run_pending_tasks().await;
            }
        });
        Janitor { handle }
    }

    /// Starts a janitor sized to the default TTL. Nothing to do without a TTL
    /// or outside a tokio runtime.
    pub fn start_janitor(&self) -> Option<Janitor> {
        let ttl = self.default_ttl?;
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no tokio runtime, expired entries are only dropped on access");
            return None;
        }
        let period = ttl.clamp(MIN_JANITOR_PERIOD, MAX_JANITOR_PERIOD);
        debug!(?period, "starting local cache janitor");
        Some(self.spawn_janitor(period))
    }

    async fn insert(&self, key: &str, value: Erased) {
        self.entries.insert(key.to_string(), value).await;
        self.events.emit(CacheEvent::stored(
            key,
            self.default_ttl.map(|ttl| TtlSecs::from_duration(ttl).0),
        ));
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn load_or_store<T, F, Fut, E>(&self, key: &str, dest: &mut T, compute: F) -> Result<bool>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(found) = self.entries.get(key).await {
            write_to(&found, dest)?;
            return Ok(true);
        }

        let computed = self
            .flights
            .run::<T, _, _>(key, || async move {
                let value = compute().await.map_err(compute_error)?;
                let erased = Erased::new(value);
                self.insert(key, erased.clone()).await;
                Ok::<_, ComputeError>(erased)
            })
            .await?;

        write_to(&computed, dest)?;
        Ok(false)
    }

    async fn load<T: CacheValue>(&self, key: &str, dest: &mut T) -> bool {
        let Some(found) = self.entries.get(key).await else {
            return false;
        };
        match write_to(&found, dest) {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "cached value does not fit destination");
                false
            }
        }
    }

    async fn store<T: CacheValue>(&self, key: &str, value: T) {
        self.insert(key, Erased::new(value)).await;
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.entries.remove(key).await.is_some() {
            self.events.emit(CacheEvent::deleted(key));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entry_count", &self.entries.entry_count())
            .field("default_ttl", &self.default_ttl)
            .field("flights", &self.flights)
            .finish()
    }
}

/// Background maintenance task; stops when dropped.
#[derive(Debug)]
pub struct Janitor {
    handle: JoinHandle<()>,
}

impl Janitor {
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
