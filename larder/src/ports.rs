#![deny(clippy::all)]

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Result, TtlSecs};
use std::future::Future;

// Ports are the pluggable extension points for underlying cache implementations

/// Anything a backend can hold: cloned out of the local store, serialized for
/// the remote one.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Load-or-compute contract shared by every backend.
///
/// Read paths never fail on backend faults: a missing, expired, undecodable or
/// unreachable entry is a miss. Writes are best-effort and only logged.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    /// Writes the cached value for `key` into `dest` and returns `true`, or runs
    /// `compute`, writes its value into `dest`, persists it and returns `false`.
    ///
    /// Errors only come from `compute` (`ComputeFailed`, nothing is cached) or
    /// from a destination whose type does not match what is stored
    /// (`InvalidDestination`).
    async fn load_or_store<T, F, Fut, E>(&self, key: &str, dest: &mut T, compute: F) -> Result<bool>
    where
        T: CacheValue,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        E: Into<Box<dyn std::error::Error + Send + Sync>>;

    /// Pure read; `false` on any miss and `dest` is left untouched.
    async fn load<T: CacheValue>(&self, key: &str, dest: &mut T) -> bool;

    /// Unconditional write, replacing any existing entry.
    async fn store<T: CacheValue>(&self, key: &str, value: T);

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Source of connections to a remote key/value store.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: Connection;

    /// Opens a connection ready for use, already authenticated and pointed at
    /// the right database.
    async fn dial(&self) -> Result<Self::Conn>;
}

/// The handful of commands the remote backend issues.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn auth(&mut self, password: &str) -> Result<()>;
    async fn select(&mut self, db: u32) -> Result<()>;
    async fn ping(&mut self) -> Result<()>;
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set_ex(&mut self, key: &str, value: &[u8], ttl: TtlSecs) -> Result<()>;
    async fn del(&mut self, key: &str) -> Result<()>;
}
