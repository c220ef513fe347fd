use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info};

use crate::data::CircularBuffer;
use crate::engine::command::Command;
use crate::engine::conn::ConnState;
use crate::error::ServerError;
use crate::resp::{CommandFrame, FrameReader, Value};

/// Capacity of the replicated-command queue feeding the core.
const CHANGES_CAPACITY: usize = 1024;

/// Deadline for each handshake exchange with the master.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of the pending-reply writer.
const WRITER_POLL: Duration = Duration::from_millis(10);

/// Replica-side replication state: the connection-state the replicated
/// commands execute under, the queue they are handed to the core through,
/// and the running offset the ACKs report.
#[derive(Debug)]
pub struct Replica {
    master_addr: String,
    my_port: u16,
    changes: CircularBuffer<Arc<Command>>,
    conn_state: Arc<ConnState>,
    repl_offset: AtomicU64,
}

impl Replica {
    pub fn new(master_host: &str, master_port: u16, my_port: u16) -> Arc<Self> {
        let conn_state = ConnState::new(None);
        conn_state.upgrade_to_replication();
        Arc::new(Replica {
            master_addr: format!("{master_host}:{master_port}"),
            my_port,
            changes: CircularBuffer::new(CHANGES_CAPACITY),
            conn_state,
            repl_offset: AtomicU64::new(0),
        })
    }

    pub fn master_addr(&self) -> &str {
        &self.master_addr
    }

    pub fn repl_offset(&self) -> u64 {
        self.repl_offset.load(Ordering::Acquire)
    }

    /// Advances the offset after a replicated command applied locally,
    /// returning the new value.
    pub fn incr_offset(&self, bytes: u64) -> u64 {
        self.repl_offset.fetch_add(bytes, Ordering::AcqRel) + bytes
    }

    /// Replicated commands waiting for the core, oldest first.
    pub fn drain_changes(&self, n: usize) -> Vec<Arc<Command>> {
        self.changes.read_batch(n)
    }

    /// Connects to the master, runs the handshake, consumes the initial
    /// RDB snapshot, and spawns the stream reader/writer pair. Returns
    /// once the replication stream is live.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        info!(master = %self.master_addr, "connecting to master");
        let stream = TcpStream::connect(&self.master_addr).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);

        self.handshake(&mut reader, &mut write_half).await?;
        info!(master = %self.master_addr, "handshake complete, entering replication stream");

        let writer = Arc::new(AsyncMutex::new(write_half));
        let pending: Arc<Mutex<VecDeque<Arc<Command>>>> = Arc::new(Mutex::new(VecDeque::new()));

        self.spawn_stream_reader(reader, pending.clone(), shutdown.clone());
        self.spawn_pending_writer(writer, pending, shutdown);
        Ok(())
    }

    /// PING, REPLCONF listening-port, REPLCONF capa, PSYNC, then the RDB
    /// snapshot; every exchange runs under a deadline.
    async fn handshake(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), ServerError> {
        let reply = self
            .exchange(reader, writer, CommandFrame::from_parts("PING", &[]))
            .await?;
        expect_simple(&reply, "PONG")?;

        let port = self.my_port.to_string();
        let reply = self
            .exchange(
                reader,
                writer,
                CommandFrame::from_parts("REPLCONF", &["listening-port", &port]),
            )
            .await?;
        expect_simple(&reply, "OK")?;

        let reply = self
            .exchange(
                reader,
                writer,
                CommandFrame::from_parts("REPLCONF", &["capa", "psync2"]),
            )
            .await?;
        expect_simple(&reply, "OK")?;

        let reply = self
            .exchange(reader, writer, CommandFrame::from_parts("PSYNC", &["?", "-1"]))
            .await?;
        expect_fullresync(&reply)?;

        let rdb = tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_rdb())
            .await
            .map_err(|_| handshake_timeout())??;
        info!(len = rdb.len(), "received initial RDB from master");
        Ok(())
    }

    async fn exchange(
        &self,
        reader: &mut FrameReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        frame: CommandFrame,
    ) -> Result<Value, ServerError> {
        tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            writer.write_all(&frame.encode()).await?;
            writer.flush().await?;
            match reader.read_frame().await? {
                Some((value, _)) => Ok(value),
                None => Err(ServerError::Disconnected(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "master closed connection during handshake",
                ))),
            }
        })
        .await
        .map_err(|_| handshake_timeout())?
    }

    /// Parses command frames off the master socket, parks each one in the
    /// pending deque (for ordered ACK replies) and hands it to the core.
    /// Any parse error other than a clean EOF is a hard stop.
    fn spawn_stream_reader(
        self: &Arc<Self>,
        mut reader: FrameReader<OwnedReadHalf>,
        pending: Arc<Mutex<VecDeque<Arc<Command>>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let replica = self.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = shutdown.changed() => break,
                    frame = reader.read_frame() => frame,
                };

                match frame {
                    Ok(Some((value, size))) => {
                        let frame = match CommandFrame::from_value(value, size) {
                            Ok(Some(frame)) => frame,
                            Ok(None) => continue,
                            Err(err) => {
                                error!(%err, "invalid frame on replication stream");
                                break;
                            }
                        };
                        debug!(
                            name = %frame.name,
                            size = frame.byte_size,
                            offset = replica.repl_offset(),
                            "received command from master"
                        );

                        let cmd = Command::new_replicated(frame, replica.conn_state.clone());
                        pending
                            .lock()
                            .expect("pending deque lock poisoned")
                            .push_back(cmd.clone());
                        if !replica.changes.send(cmd).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("master closed the replication stream");
                        break;
                    }
                    Err(err) => {
                        error!(%err, "failed to read from master");
                        break;
                    }
                }
            }
        });
    }

    /// Flushes completed pending commands back to the master in arrival
    /// order; only GETACK replies carry bytes, everything else flushes
    /// empty and is simply dropped from the deque.
    fn spawn_pending_writer(
        self: &Arc<Self>,
        writer: Arc<AsyncMutex<OwnedWriteHalf>>,
        pending: Arc<Mutex<VecDeque<Arc<Command>>>>,
        shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let head = {
                    let queue = pending.lock().expect("pending deque lock poisoned");
                    queue.front().cloned()
                };

                if let Some(cmd) = head {
                    if cmd.is_done() || cmd.has_timed_out() {
                        let bytes = cmd.take_flush_bytes();
                        if !bytes.is_empty() {
                            let mut writer = writer.lock().await;
                            if let Err(err) = writer.write_all(&bytes).await {
                                error!(%err, "failed to write ack to master");
                                break;
                            }
                            if let Err(err) = writer.flush().await {
                                error!(%err, "failed to flush ack to master");
                                break;
                            }
                            debug!(n = bytes.len(), "wrote reply to master");
                        }
                        pending
                            .lock()
                            .expect("pending deque lock poisoned")
                            .pop_front();
                        continue;
                    }
                }

                tokio::time::sleep(WRITER_POLL).await;
            }
        });
    }
}

fn handshake_timeout() -> ServerError {
    ServerError::Disconnected(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "handshake with master timed out",
    ))
}

fn expect_simple(value: &Value, expected: &str) -> Result<(), ServerError> {
    match value {
        Value::Simple(s) if s == expected => Ok(()),
        other => Err(ServerError::InvalidArguments(format!(
            "unexpected response from master: {other:?}"
        ))),
    }
}

/// `+FULLRESYNC <40-char id> <offset>`; the id must look like a
/// replication id, the offset value is discarded.
fn expect_fullresync(value: &Value) -> Result<(), ServerError> {
    let Value::Simple(s) = value else {
        return Err(ServerError::InvalidArguments(format!(
            "unexpected PSYNC response from master: {value:?}"
        )));
    };
    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() != 3 || parts[0] != "FULLRESYNC" || !is_valid_repl_id(parts[1]) {
        return Err(ServerError::InvalidArguments(format!(
            "invalid FULLRESYNC response from master: {s}"
        )));
    }
    Ok(())
}

fn is_valid_repl_id(repl_id: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9]{40}$").expect("replication id pattern is valid");
    re.is_match(repl_id)
}
