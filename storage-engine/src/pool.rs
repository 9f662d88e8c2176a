use larder::ports::{Connection, Dialer};
use parking_lot::Mutex;
use shared::config::CacheConfig;
use shared::{Error, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max_idle: usize,
    /// Idle connections older than this are closed instead of reused; zero
    /// keeps them forever.
    pub idle_timeout: Duration,
    /// Bounds dialing, the liveness probe and every command.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for PoolConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_idle: config.max_idle,
            idle_timeout: config.idle_timeout,
            connect_timeout: config.connect_timeout,
        }
    }
}

struct IdleConn<C> {
    conn: C,
    since: Instant,
}

struct PoolInner<D: Dialer> {
    dialer: D,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConn<D::Conn>>>,
}

/// Bounded pool of idle connections. Connections are handed out exclusively
/// and go back to the pool when the guard drops, unless a command failed on
/// them.
pub struct Pool<D: Dialer> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Dialer> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Dialer> Pool<D> {
    pub fn new(dialer: D, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                dialer,
                config,
                idle: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrows the most recently used healthy idle connection, or dials a new
    /// one.
    pub async fn get(&self) -> Result<PooledConn<D>> {
        let config = self.inner.config;

        loop {
            let candidate = self.inner.idle.lock().pop_back();
            let Some(mut idle) = candidate else {
                break;
            };

            if !config.idle_timeout.is_zero() && idle.since.elapsed() >= config.idle_timeout {
                debug!("closing stale idle connection");
                continue;
            }

            match self.timed(idle.conn.ping()).await {
                Ok(()) => return Ok(PooledConn::new(idle.conn, Arc::clone(&self.inner))),
                Err(err) => debug!(error = %err, "discarding idle connection that failed ping"),
            }
        }

        let conn = timeout(config.connect_timeout, self.inner.dialer.dial())
            .await
            .map_err(|_| Error::BackendUnavailable("dial timed out".to_string()))??;
        Ok(PooledConn::new(conn, Arc::clone(&self.inner)))
    }

    /// Runs a command under the pool's timeout.
    pub async fn timed<T, F>(&self, command: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        timeout(self.inner.config.connect_timeout, command)
            .await
            .map_err(|_| Error::BackendUnavailable("command timed out".to_string()))?
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Closes every idle connection.
    pub fn clear(&self) {
        self.inner.idle.lock().clear();
    }
}

impl<D: Dialer> PoolInner<D> {
    fn release(&self, conn: D::Conn) {
        if self.config.max_idle == 0 {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() >= self.config.max_idle {
            idle.pop_front();
        }
        idle.push_back(IdleConn {
            conn,
            since: Instant::now(),
        });
    }
}

impl<D: Dialer> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// Exclusive use of one pooled connection.
pub struct PooledConn<D: Dialer> {
    conn: Option<D::Conn>,
    pool: Arc<PoolInner<D>>,
    broken: bool,
}

impl<D: Dialer> PooledConn<D> {
    fn new(conn: D::Conn, pool: Arc<PoolInner<D>>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            broken: false,
        }
    }

    /// Closes the connection on drop instead of returning it to the pool.
    pub fn discard(&mut self) {
        self.broken = true;
    }
}

impl<D: Dialer> Deref for PooledConn<D> {
    type Target = D::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection is present until dropped")
    }
}

impl<D: Dialer> DerefMut for PooledConn<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection is present until dropped")
    }
}

impl<D: Dialer> Drop for PooledConn<D> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.broken {
                self.pool.release(conn);
            }
        }
    }
}
