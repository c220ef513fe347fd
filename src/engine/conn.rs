use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

use crate::engine::command::Command;

/// Shared handle to a connection's write half plus its liveness flag.
///
/// The reactor writer, the pub/sub drain and the replication fan-out all
/// write through the same handle, serialized by the inner mutex.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub addr: String,
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    closed: Arc<AtomicBool>,
}

impl ConnHandle {
    pub fn new(addr: String, writer: OwnedWriteHalf) -> Self {
        ConnHandle {
            addr,
            writer: Arc::new(AsyncMutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub async fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Half-closes the socket so the peer observes EOF.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Per-connection state owned jointly by the reactor (which creates
/// commands against it) and the core (which mutates it while executing
/// them).
#[derive(Debug)]
pub struct ConnState {
    inner: Mutex<ConnInner>,
    conn: Option<ConnHandle>,
}

#[derive(Debug, Default)]
struct ConnInner {
    in_transaction: bool,
    tx: Vec<Arc<Command>>,
    db_number: usize,
    is_replication: bool,
    is_subscribe: bool,
    sub_id: Option<String>,
}

impl ConnState {
    pub fn new(conn: Option<ConnHandle>) -> Arc<Self> {
        Arc::new(ConnState {
            inner: Mutex::new(ConnInner::default()),
            conn,
        })
    }

    pub fn handle(&self) -> Option<&ConnHandle> {
        self.conn.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| conn.is_closed())
    }

    pub fn db_number(&self) -> usize {
        self.lock().db_number
    }

    pub fn select_db(&self, db: usize) {
        self.lock().db_number = db;
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Enters queuing state; fails on nested MULTI.
    pub fn begin_transaction(&self) -> bool {
        let mut inner = self.lock();
        if inner.in_transaction {
            return false;
        }
        inner.in_transaction = true;
        true
    }

    pub fn queue_command(&self, cmd: Arc<Command>) {
        self.lock().tx.push(cmd);
    }

    /// Leaves queuing state and hands back the queued commands (EXEC) or
    /// lets the caller drop them (DISCARD).
    pub fn end_transaction(&self) -> Vec<Arc<Command>> {
        let mut inner = self.lock();
        inner.in_transaction = false;
        std::mem::take(&mut inner.tx)
    }

    pub fn is_replication(&self) -> bool {
        self.lock().is_replication
    }

    pub fn upgrade_to_replication(&self) {
        self.lock().is_replication = true;
    }

    pub fn is_subscribe(&self) -> bool {
        self.lock().is_subscribe
    }

    pub fn sub_id(&self) -> Option<String> {
        self.lock().sub_id.clone()
    }

    pub fn upgrade_to_subscription(&self, sub_id: String) {
        let mut inner = self.lock();
        inner.is_subscribe = true;
        inner.sub_id = Some(sub_id);
    }

    pub fn quit_subscription(&self) {
        let mut inner = self.lock();
        inner.is_subscribe = false;
        inner.sub_id = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnInner> {
        self.inner.lock().expect("conn state lock poisoned")
    }
}
