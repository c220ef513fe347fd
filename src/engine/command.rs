use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::engine::conn::ConnState;
use crate::resp::{CommandFrame, Value};

/// Action the connection writer runs after flushing a command's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// PSYNC flushed: the connection becomes a replication stream and the
    /// slave record starts its RDB sync.
    UpgradeToReplication,
    /// QUIT flushed: close the connection.
    Close,
}

type TimeoutReply = Box<dyn Fn() -> Value + Send + Sync>;

/// One in-flight command.
///
/// Created by a reactor reader, executed by the core, flushed by the
/// reactor writer; the shared `Arc` plus the `done`/deadline flags are the
/// whole hand-off protocol between those tasks.
pub struct Command {
    pub frame: CommandFrame,
    pub conn: Arc<ConnState>,
    reply: Mutex<Vec<u8>>,
    done: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    timeout_reply: Mutex<Option<TimeoutReply>>,
    deferred: Mutex<Option<Deferred>>,
    is_replicated: bool,
    omit_offset: AtomicBool,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("frame", &self.frame)
            .field("done", &self.is_done())
            .field("is_replicated", &self.is_replicated)
            .finish()
    }
}

impl Command {
    /// A command read from a client connection.
    pub fn new(frame: CommandFrame, conn: Arc<ConnState>) -> Arc<Self> {
        Arc::new(Command {
            frame,
            conn,
            reply: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
            deadline: Mutex::new(None),
            timeout_reply: Mutex::new(None),
            deferred: Mutex::new(None),
            is_replicated: false,
            omit_offset: AtomicBool::new(true),
        })
    }

    /// A command received over the replication stream; it applies locally
    /// without being echoed back and counts toward the replica's offset.
    pub fn new_replicated(frame: CommandFrame, conn: Arc<ConnState>) -> Arc<Self> {
        Arc::new(Command {
            frame,
            conn,
            reply: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
            deadline: Mutex::new(None),
            timeout_reply: Mutex::new(None),
            deferred: Mutex::new(None),
            is_replicated: true,
            omit_offset: AtomicBool::new(false),
        })
    }

    /// A fresh copy for the transaction queue: same frame, same connection,
    /// same replication provenance, clean execution state.
    pub fn copy_for_queue(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Command {
            frame: self.frame.clone(),
            conn: self.conn.clone(),
            reply: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
            deadline: Mutex::new(None),
            timeout_reply: Mutex::new(None),
            deferred: Mutex::new(None),
            is_replicated: self.is_replicated,
            omit_offset: AtomicBool::new(self.omit_offset()),
        })
    }

    pub fn db(&self) -> usize {
        self.conn.db_number()
    }

    pub fn is_replicated(&self) -> bool {
        self.is_replicated
    }

    pub fn omit_offset(&self) -> bool {
        self.omit_offset.load(Ordering::Acquire)
    }

    pub fn set_omit_offset(&self, omit: bool) {
        self.omit_offset.store(omit, Ordering::Release);
    }

    pub fn set_done(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn set_deadline(&self, at: Instant) {
        *self.lock_deadline() = Some(at);
    }

    pub fn has_timed_out(&self) -> bool {
        self.lock_deadline()
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// Value to reply with when the command times out instead of
    /// completing (WAIT reports the in-sync count it sees at that moment).
    pub fn set_timeout_reply(&self, produce: TimeoutReply) {
        *self
            .timeout_reply
            .lock()
            .expect("command lock poisoned") = Some(produce);
    }

    pub fn set_deferred(&self, action: Deferred) {
        *self.deferred.lock().expect("command lock poisoned") = Some(action);
    }

    pub fn take_deferred(&self) -> Option<Deferred> {
        self.deferred.lock().expect("command lock poisoned").take()
    }

    pub fn write_value(&self, value: &Value) {
        let mut reply = self.lock_reply();
        value.write_to(&mut reply);
    }

    pub fn write_raw(&self, bytes: &[u8]) {
        self.lock_reply().extend_from_slice(bytes);
    }

    /// Current reply bytes without consuming them; EXEC collects queued
    /// commands' outputs this way.
    pub fn output_bytes(&self) -> Vec<u8> {
        self.lock_reply().clone()
    }

    /// Bytes the connection writer should flush: the reply buffer when one
    /// was produced, otherwise the timeout reply for a command that
    /// expired while parked (null array unless a producer was installed).
    pub fn take_flush_bytes(&self) -> Vec<u8> {
        let mut reply = self.lock_reply();
        if !reply.is_empty() {
            return std::mem::take(&mut *reply);
        }
        drop(reply);

        if self.is_done() {
            return Vec::new();
        }
        if self.has_timed_out() {
            let producer = self.timeout_reply.lock().expect("command lock poisoned");
            return match producer.as_ref() {
                Some(produce) => produce().encode(),
                None => Value::NullArray.encode(),
            };
        }
        Vec::new()
    }

    fn lock_reply(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.reply.lock().expect("command lock poisoned")
    }

    fn lock_deadline(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().expect("command lock poisoned")
    }
}
