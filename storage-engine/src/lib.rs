//! Cache backends: an in-process store and a pooled remote store.

pub mod backend;
pub mod local;
pub mod pool;
pub mod redis_conn;
pub mod remote;
pub mod uri;

#[cfg(test)]
mod testing;

pub use backend::Backend;
pub use local::{Janitor, LocalCache};
pub use pool::{Pool, PoolConfig, PooledConn};
pub use redis_conn::{RedisConn, RedisDialer};
pub use remote::{DEFAULT_EXPIRE_TIME, RemoteCache};
pub use uri::{Endpoint, RemoteUri};
