//! In-memory stand-in for a remote key/value server.

use crate::redis_conn::handshake;
use crate::uri::RemoteUri;
use async_trait::async_trait;
use larder::ports::{Connection, Dialer};
use parking_lot::Mutex;
use shared::{Error, Result, TtlSecs};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct Server {
    online: AtomicBool,
    dials: AtomicUsize,
    pings: AtomicUsize,
    entries: Mutex<HashMap<String, (Vec<u8>, TtlSecs)>>,
    password: Mutex<Option<String>>,
    commands: Mutex<Vec<String>>,
}

const DATABASES: u32 = 16;

#[derive(Clone)]
pub struct MemoryDialer {
    server: Arc<Server>,
    uri: Option<RemoteUri>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        let server = Server::default();
        server.online.store(true, Ordering::SeqCst);
        Self {
            server: Arc::new(server),
            uri: None,
        }
    }

    /// Runs the AUTH/SELECT handshake from `uri` on every dial.
    pub fn with_uri(mut self, uri: &str) -> Self {
        self.uri = Some(RemoteUri::parse(uri).expect("valid test uri"));
        self
    }

    pub fn require_password(&self, password: &str) {
        *self.server.password.lock() = Some(password.to_string());
    }

    /// Handshake commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.server.commands.lock().clone()
    }

    pub fn set_online(&self, online: bool) {
        self.server.online.store(online, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.server.dials.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.server.pings.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<(Vec<u8>, TtlSecs)> {
        self.server.entries.lock().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.server
            .entries
            .lock()
            .insert(key.to_string(), (value.to_vec(), TtlSecs(0)));
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    type Conn = MemoryConn;

    async fn dial(&self) -> Result<MemoryConn> {
        if !self.server.online.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("connection refused".to_string()));
        }
        let mut conn = MemoryConn {
            server: Arc::clone(&self.server),
        };
        if let Some(uri) = &self.uri {
            handshake(&mut conn, uri).await?;
        }
        self.server.dials.fetch_add(1, Ordering::SeqCst);
        Ok(conn)
    }
}

pub struct MemoryConn {
    server: Arc<Server>,
}

impl MemoryConn {
    fn check(&self) -> Result<()> {
        if self.server.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::BackendUnavailable("broken pipe".to_string()))
        }
    }
}

#[async_trait]
impl Connection for MemoryConn {
    async fn auth(&mut self, password: &str) -> Result<()> {
        self.check()?;
        self.server.commands.lock().push("AUTH".to_string());
        match self.server.password.lock().as_deref() {
            Some(expected) if expected == password => Ok(()),
            _ => Err(Error::BackendUnavailable("WRONGPASS invalid password".to_string())),
        }
    }

    async fn select(&mut self, db: u32) -> Result<()> {
        self.check()?;
        self.server.commands.lock().push(format!("SELECT {db}"));
        if db < DATABASES {
            Ok(())
        } else {
            Err(Error::BackendUnavailable("ERR DB index is out of range".to_string()))
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.check()?;
        self.server.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.server.entries.lock().get(key).map(|(v, _)| v.clone()))
    }

    async fn set_ex(&mut self, key: &str, value: &[u8], ttl: TtlSecs) -> Result<()> {
        self.check()?;
        self.server
            .entries
            .lock()
            .insert(key.to_string(), (value.to_vec(), ttl));
        Ok(())
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        self.check()?;
        self.server.entries.lock().remove(key);
        Ok(())
    }
}
