//! The command execution core: a single task that owns every database and
//! drains commands from the reactors, so handlers run one at a time and
//! the data structures need no locks.

pub mod command;
pub mod conn;
pub mod db;
pub mod handlers;
pub mod pubsub;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data::CircularBuffer;
use crate::engine::command::Command;
use crate::engine::db::Database;
use crate::engine::pubsub::PubSub;
use crate::error::ServerError;
use crate::info::Info;
use crate::repl::master::Master;
use crate::repl::replica::Replica;
use crate::resp::Value;

pub const NUM_DBS: usize = 16;

/// Capacity of the client command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Commands drained from each input queue per round.
const DRAIN_BATCH: usize = 10;

/// Idle sleep when a round drained no client commands.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Minimum gap between GETACK broadcasts while WAIT waiters exist.
const ACK_REQUEST_INTERVAL: Duration = Duration::from_millis(50);

/// A parked WAIT command and the replica count it is waiting for.
pub struct WaitEntry {
    cmd: Arc<Command>,
    required: usize,
}

pub struct Engine {
    info: Arc<Info>,
    cmd_buf: Arc<CircularBuffer<Arc<Command>>>,
    dbs: Vec<Option<Database>>,
    pubsub: PubSub,
    waits: Vec<WaitEntry>,
    master: Option<Arc<Master>>,
    replica: Option<Arc<Replica>>,
    round: u64,
    last_ack_request: Instant,
}

impl Engine {
    pub fn new_master(info: Arc<Info>, master: Arc<Master>) -> Self {
        Engine::new(info, Some(master), None)
    }

    pub fn new_replica(info: Arc<Info>, replica: Arc<Replica>) -> Self {
        Engine::new(info, None, Some(replica))
    }

    fn new(info: Arc<Info>, master: Option<Arc<Master>>, replica: Option<Arc<Replica>>) -> Self {
        Engine {
            info,
            cmd_buf: Arc::new(CircularBuffer::new(COMMAND_QUEUE_CAPACITY)),
            dbs: std::iter::repeat_with(|| None).take(NUM_DBS).collect(),
            pubsub: PubSub::new(),
            waits: Vec::new(),
            master,
            replica,
            round: 0,
            last_ack_request: Instant::now(),
        }
    }

    /// The queue reactors submit parsed client commands into.
    pub fn command_buffer(&self) -> Arc<CircularBuffer<Arc<Command>>> {
        self.cmd_buf.clone()
    }

    pub fn is_replica(&self) -> bool {
        self.replica.is_some()
    }

    pub(crate) fn info(&self) -> &Arc<Info> {
        &self.info
    }

    pub(crate) fn master(&self) -> Option<&Arc<Master>> {
        self.master.as_ref()
    }

    pub(crate) fn replica(&self) -> Option<&Arc<Replica>> {
        self.replica.as_ref()
    }

    pub(crate) fn push_wait(&mut self, entry: WaitEntry) {
        self.waits.push(entry);
    }

    pub(crate) fn db_mut(&mut self, index: usize) -> &mut Database {
        self.dbs[index].get_or_insert_with(|| Database::new(index))
    }

    /// Runs rounds until shutdown is signalled, then closes the command
    /// queue so parked reactor readers unblock.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        info!(
            role = if self.is_replica() { "slave" } else { "master" },
            "core loop running"
        );
        while !*shutdown.borrow() {
            self.tick().await;
        }
        self.cmd_buf.close();
        info!("core loop stopped");
    }

    /// One round: expire one database, apply replicated commands, resolve
    /// WAIT waiters and owed RDB pushes, drain client commands, drain
    /// pub/sub channels, prune dead blocking waiters, and idle briefly if
    /// nothing arrived.
    pub async fn tick(&mut self) {
        let db_index = (self.round as usize) % NUM_DBS;
        if let Some(db) = self.dbs[db_index].as_mut() {
            let evicted = db.evict();
            if evicted > 0 {
                debug!(db = db_index, evicted, "expired keys");
            }
        }

        if let Some(replica) = self.replica.clone() {
            for cmd in replica.drain_changes(DRAIN_BATCH) {
                debug!(name = %cmd.frame.name, "replicated command received");
                self.process(cmd).await;
            }
        }

        if let Some(master) = self.master.clone() {
            if !self.waits.is_empty() {
                if master.slave_count() > 0
                    && self.last_ack_request.elapsed() >= ACK_REQUEST_INTERVAL
                {
                    self.last_ack_request = Instant::now();
                    master.request_acks().await;
                }
                self.resolve_waits(master.in_sync_count());
            }
            if let Err(err) = master.initial_rdb_sync().await {
                warn!(%err, "initial RDB sync to slave failed");
            }
        }

        let cmds = self.cmd_buf.read_batch(DRAIN_BATCH);
        let drained = cmds.len();
        for cmd in cmds {
            debug!(name = %cmd.frame.name, "command received");
            self.process(cmd).await;
        }

        self.pubsub.drain().await;
        self.prune_blocked_waiters();

        if drained == 0 {
            tokio::time::sleep(IDLE_SLEEP).await;
        }
        self.round = self.round.wrapping_add(1);
    }

    /// Executes one command: route, run, serialize errors, account the
    /// replica offset, and hand replicated frames to the master fan-out.
    pub async fn process(&mut self, cmd: Arc<Command>) {
        let db = cmd.db();

        let Some((handler, should_replicate)) = registry::route(&cmd.frame.name) else {
            let err = ServerError::Protocol(format!("invalid command '{}'", cmd.frame.name));
            cmd.write_value(&err.to_value());
            cmd.set_done();
            return;
        };

        if let Err(err) = handler(self, &cmd) {
            cmd.write_value(&err.to_value());
            cmd.set_done();
        }

        if self.is_replica() && cmd.is_replicated() && !cmd.omit_offset() {
            if let Some(replica) = &self.replica {
                let offset = replica.incr_offset(cmd.frame.byte_size as u64);
                self.info.set_master_repl_offset(offset);
            }
        }

        if !should_replicate {
            return;
        }
        if let Some(master) = self.master.clone() {
            if let Err(err) = master.replicate(db, &cmd.frame).await {
                warn!(%err, "failed to replicate command to slaves");
            }
        }
    }

    /// While queuing, every ordinary command is captured into the
    /// connection's transaction queue and acknowledged with QUEUED instead
    /// of executing.
    pub(crate) fn check_in_tx(&mut self, cmd: &Arc<Command>) -> bool {
        if !cmd.conn.in_transaction() {
            return false;
        }
        cmd.conn.queue_command(cmd.copy_for_queue());
        if self.should_write_output(cmd) {
            cmd.write_value(&Value::Simple("QUEUED".to_string()));
        }
        true
    }

    /// Commands that cannot be queued (INFO, WAIT, PSYNC, pub/sub, QUIT)
    /// are rejected while a transaction is open.
    pub(crate) fn reject_in_tx(&self, cmd: &Arc<Command>, what: &str) -> Result<(), ServerError> {
        if cmd.conn.in_transaction() {
            return Err(ServerError::Transaction(format!(
                "{what} not allowed in a transaction"
            )));
        }
        Ok(())
    }

    /// Writes from regular clients are rejected on a replica; the
    /// replication stream itself may write.
    pub(crate) fn check_replica_write(&self, cmd: &Arc<Command>) -> Result<(), ServerError> {
        if self.is_replica() && !cmd.is_replicated() {
            return Err(ServerError::ReplicaReadOnly);
        }
        Ok(())
    }

    /// A replica applies replicated commands silently; everything else
    /// gets its reply.
    pub(crate) fn should_write_output(&self, cmd: &Arc<Command>) -> bool {
        !(self.is_replica() && cmd.is_replicated())
    }

    fn resolve_waits(&mut self, in_sync: usize) {
        self.waits.retain(|entry| {
            if entry.cmd.has_timed_out() || entry.cmd.conn.is_closed() {
                return false;
            }
            if in_sync >= entry.required {
                entry.cmd.write_value(&Value::Integer(in_sync as i64));
                entry.cmd.set_done();
                return false;
            }
            true
        });
    }

    /// Timed-out or abandoned BLPOP waiters leave the wait lists; their
    /// connection writers emit the null-array timeout reply on their own.
    fn prune_blocked_waiters(&mut self) {
        for db in self.dbs.iter_mut().flatten() {
            db.blocked_pop.retain(|_, waiters| {
                waiters.retain(|cmd| {
                    !(cmd.is_done() || cmd.has_timed_out() || cmd.conn.is_closed())
                });
                !waiters.is_empty()
            });
        }
    }
}
