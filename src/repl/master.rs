use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::engine::conn::ConnHandle;
use crate::error::is_disconnect_io_error;
use crate::info::Info;
use crate::rdb;
use crate::resp::CommandFrame;

/// Handshake stages a slave walks through, strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStep {
    ListeningPort,
    Capa,
    Psync,
}

#[derive(Debug)]
struct SlaveRecord {
    port: u16,
    capa: Option<String>,
    conn: ConnHandle,
    /// Database the last frame fanned out to this slave was executed on.
    current_db: usize,
    /// PSYNC reply flushed, RDB push still owed.
    is_syncing: bool,
    /// RDB pushed; this slave receives the command stream.
    is_ready: bool,
    steps: HashSet<HandshakeStep>,
    last_known_offset: u64,
}

/// Master-side replication state: the slave registry, the replication id
/// and offset, and the command fan-out.
///
/// Handlers touch the registry synchronously; socket writes happen from
/// the core loop with handles cloned out of the lock, so the lock is
/// never held across I/O.
#[derive(Debug)]
pub struct Master {
    repl_id: String,
    repl_offset: AtomicU64,
    info: Arc<Info>,
    slaves: RwLock<HashMap<String, SlaveRecord>>,
}

impl Master {
    pub fn new(info: Arc<Info>, repl_id: String) -> Self {
        Master {
            repl_id,
            repl_offset: AtomicU64::new(0),
            info,
            slaves: RwLock::new(HashMap::new()),
        }
    }

    pub fn repl_id(&self) -> &str {
        &self.repl_id
    }

    pub fn repl_offset(&self) -> u64 {
        self.repl_offset.load(Ordering::Acquire)
    }

    /// Registers a slave under its connection's peer address.
    pub fn add_slave(&self, conn: ConnHandle, port: u16) {
        let addr = conn.addr.clone();
        let mut slaves = self.lock_write();
        slaves.insert(
            addr.clone(),
            SlaveRecord {
                port,
                capa: None,
                conn,
                current_db: 0,
                is_syncing: false,
                is_ready: false,
                steps: HashSet::new(),
                last_known_offset: 0,
            },
        );
        self.info.set_connected_slaves(slaves.len() as u64);
        info!(%addr, port, "slave registered");
    }

    pub fn remove_slave(&self, addr: &str) {
        let mut slaves = self.lock_write();
        if slaves.remove(addr).is_some() {
            self.info.set_connected_slaves(slaves.len() as u64);
            info!(addr, "slave removed");
        }
    }

    pub fn add_handshake_step(&self, addr: &str, step: HandshakeStep) {
        if let Some(record) = self.lock_write().get_mut(addr) {
            record.steps.insert(step);
        }
    }

    pub fn has_handshake_step(&self, addr: &str, step: HandshakeStep) -> bool {
        self.lock_read()
            .get(addr)
            .is_some_and(|record| record.steps.contains(&step))
    }

    pub fn set_slave_capa(&self, addr: &str, capa: &str) -> bool {
        match self.lock_write().get_mut(addr) {
            Some(record) => {
                record.capa = Some(capa.to_string());
                true
            }
            None => false,
        }
    }

    /// Called by the connection writer once the FULLRESYNC reply has hit
    /// the socket; the next core round pushes the snapshot.
    pub fn start_sync(&self, addr: &str) {
        if let Some(record) = self.lock_write().get_mut(addr) {
            record.is_syncing = true;
            info!(addr, port = record.port, "slave handshake complete, starting sync");
        }
    }

    pub fn slave_count(&self) -> usize {
        self.lock_read().len()
    }

    /// Slaves whose last acknowledged offset has caught up with the
    /// master's.
    pub fn in_sync_count(&self) -> usize {
        let offset = self.repl_offset();
        self.lock_read()
            .values()
            .filter(|record| record.is_ready && record.last_known_offset >= offset)
            .count()
    }

    pub fn record_ack(&self, addr: &str, offset: u64) {
        if let Some(record) = self.lock_write().get_mut(addr) {
            record.last_known_offset = offset;
            debug!(addr, offset, "recorded slave ack");
        }
    }

    /// Pushes the empty RDB snapshot to every slave whose PSYNC reply has
    /// been flushed, then marks it ready for the command stream.
    pub async fn initial_rdb_sync(&self) -> std::io::Result<()> {
        let syncing: Vec<(String, ConnHandle)> = self
            .lock_read()
            .iter()
            .filter(|(_, record)| record.is_syncing)
            .map(|(addr, record)| (addr.clone(), record.conn.clone()))
            .collect();
        if syncing.is_empty() {
            return Ok(());
        }

        let frame = rdb::empty_rdb_frame();
        for (addr, conn) in syncing {
            match conn.write_all(&frame).await {
                Ok(()) => {
                    let mut slaves = self.lock_write();
                    if let Some(record) = slaves.get_mut(&addr) {
                        record.is_syncing = false;
                        record.is_ready = true;
                    }
                    info!(%addr, "initial RDB pushed, slave is ready");
                }
                Err(err) if is_disconnect_io_error(&err) => self.remove_slave(&addr),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Fans one executed command out to every ready slave, prefixing a
    /// SELECT for slaves positioned on a different database, and advances
    /// the master offset by the frame's encoded size.
    pub async fn replicate(&self, db: usize, frame: &CommandFrame) -> std::io::Result<()> {
        let bytes = frame.encode();

        let targets: Vec<(String, ConnHandle, usize)> = self
            .lock_read()
            .iter()
            .filter(|(_, record)| record.is_ready)
            .map(|(addr, record)| (addr.clone(), record.conn.clone(), record.current_db))
            .collect();

        for (addr, conn, current_db) in targets {
            if current_db != db {
                let select = CommandFrame::from_parts("SELECT", &[&db.to_string()]);
                if let Err(err) = conn.write_all(&select.encode()).await {
                    if is_disconnect_io_error(&err) {
                        self.remove_slave(&addr);
                        continue;
                    }
                    warn!(%addr, %err, "failed to emit SELECT to slave");
                    continue;
                }
                if let Some(record) = self.lock_write().get_mut(&addr) {
                    record.current_db = db;
                }
            }

            match conn.write_all(&bytes).await {
                Ok(()) => debug!(%addr, name = %frame.name, "replicated command to slave"),
                Err(err) if is_disconnect_io_error(&err) => self.remove_slave(&addr),
                Err(err) => warn!(%addr, %err, "failed to replicate command to slave"),
            }
        }

        let offset = self
            .repl_offset
            .fetch_add(bytes.len() as u64, Ordering::AcqRel)
            + bytes.len() as u64;
        self.info.set_master_repl_offset(offset);
        Ok(())
    }

    /// Broadcasts `REPLCONF GETACK *` to every ready slave; replies come
    /// back through the normal command path as `REPLCONF ACK <offset>`.
    pub async fn request_acks(&self) {
        let frame = CommandFrame::from_parts("REPLCONF", &["GETACK", "*"]).encode();
        let targets: Vec<(String, ConnHandle)> = self
            .lock_read()
            .iter()
            .filter(|(_, record)| record.is_ready)
            .map(|(addr, record)| (addr.clone(), record.conn.clone()))
            .collect();

        for (addr, conn) in targets {
            match conn.write_all(&frame).await {
                Ok(()) => debug!(%addr, "requested ack from slave"),
                Err(err) if is_disconnect_io_error(&err) => self.remove_slave(&addr),
                Err(err) => warn!(%addr, %err, "failed to request ack from slave"),
            }
        }
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SlaveRecord>> {
        self.slaves.read().expect("slave registry lock poisoned")
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SlaveRecord>> {
        self.slaves.write().expect("slave registry lock poisoned")
    }
}
