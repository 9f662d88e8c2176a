use crate::uri::RemoteUri;
use async_trait::async_trait;
use larder::ports::{Connection, Dialer};
use redis::aio::MultiplexedConnection;
use shared::{Error, Result, TtlSecs};
use tracing::debug;

fn unavailable(err: redis::RedisError) -> Error {
    Error::BackendUnavailable(err.to_string())
}

/// Dials Redis connections for the pool, authenticating and selecting the
/// database on every new connection.
#[derive(Clone, Debug)]
pub struct RedisDialer {
    uri: RemoteUri,
}

impl RedisDialer {
    pub fn new(uri: RemoteUri) -> Self {
        Self { uri }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        RemoteUri::parse(uri).map(Self::new)
    }

    pub fn uri(&self) -> &RemoteUri {
        &self.uri
    }
}

/// Authenticates and selects the database on a freshly dialed connection.
/// Any failure aborts the dial.
pub async fn handshake<C: Connection>(conn: &mut C, uri: &RemoteUri) -> Result<()> {
    if let Some(password) = &uri.password {
        conn.auth(password).await?;
    }
    if let Some(db) = uri.db {
        conn.select(db).await?;
    }
    Ok(())
}

#[async_trait]
impl Dialer for RedisDialer {
    type Conn = RedisConn;

    async fn dial(&self) -> Result<RedisConn> {
        let client = redis::Client::open(self.uri.connection_url()).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        let mut conn = RedisConn { conn };
        handshake(&mut conn, &self.uri).await?;

        debug!(endpoint = ?self.uri.endpoint, "dialed remote cache connection");
        Ok(conn)
    }
}

pub struct RedisConn {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Connection for RedisConn {
    async fn auth(&mut self, password: &str) -> Result<()> {
        let _: () = redis::cmd("AUTH")
            .arg(password)
            .query_async(&mut self.conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn select(&mut self, db: u32) -> Result<()> {
        let _: () = redis::cmd("SELECT")
            .arg(db)
            .query_async(&mut self.conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        let _: () = redis::cmd("PING")
            .query_async(&mut self.conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(unavailable)
    }

    async fn set_ex(&mut self, key: &str, value: &[u8], ttl: TtlSecs) -> Result<()> {
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.0)
            .arg(value)
            .query_async(&mut self.conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
