use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::data::CircularBuffer;
use crate::engine::command::{Command, Deferred};
use crate::engine::conn::{ConnHandle, ConnState};
use crate::engine::Engine;
use crate::error::ServerError;
use crate::info::Info;
use crate::repl::master::Master;
use crate::repl::replica::Replica;
use crate::resp::{CommandFrame, FrameReader};
use crate::util::random_id;

/// Poll interval of the per-connection reply writer.
const WRITER_POLL: Duration = Duration::from_millis(10);

/// The TCP front of the server: the listener, the per-connection reactors,
/// and ownership of the core until `run` hands it to its own task.
pub struct Server {
    listener: TcpListener,
    info: Arc<Info>,
    cmd_buf: Arc<CircularBuffer<Arc<Command>>>,
    master: Option<Arc<Master>>,
    replica: Option<Arc<Replica>>,
    engine: Engine,
}

impl Server {
    /// Binds the listener and assembles the core for the configured role.
    pub async fn bind(config: &Config) -> std::io::Result<Server> {
        let repl_id = random_id(40);

        let (info, master, replica, engine) = match &config.replica_of {
            None => {
                let info = Arc::new(Info::new("master", &repl_id));
                let master = Arc::new(Master::new(info.clone(), repl_id));
                let engine = Engine::new_master(info.clone(), master.clone());
                (info, Some(master), None, engine)
            }
            Some((host, port)) => {
                let info = Arc::new(Info::new("slave", &repl_id));
                let replica = Replica::new(host, *port, config.port);
                let engine = Engine::new_replica(info.clone(), replica.clone());
                (info, None, Some(replica), engine)
            }
        };

        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        info!(addr = %listener.local_addr()?, "listening");

        Ok(Server {
            listener,
            cmd_buf: engine.command_buffer(),
            info,
            master,
            replica,
            engine,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until the shutdown signal flips. On a replica the master
    /// handshake must succeed before any client is served; a failure there
    /// is a startup failure.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        if let Some(replica) = &self.replica {
            replica.start(shutdown.clone()).await?;
        }

        let engine = self.engine;
        let engine_shutdown = shutdown.clone();
        tokio::spawn(async move {
            engine.run(engine_shutdown).await;
        });

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(addr = %peer, "connection established");

                    let cmd_buf = self.cmd_buf.clone();
                    let master = self.master.clone();
                    let conn_info = self.info.clone();
                    let conn_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        handle_connection(
                            stream,
                            peer.to_string(),
                            cmd_buf,
                            master,
                            conn_info,
                            conn_shutdown,
                        )
                        .await;
                    });
                }
                _ = shutdown.changed() => {
                    info!("shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// One accepted connection: this task reads and parses frames, a spawned
/// sibling flushes replies. The pending deque between them is what makes
/// responses leave in arrival order even when the core finishes later
/// commands first.
async fn handle_connection(
    stream: TcpStream,
    addr: String,
    cmd_buf: Arc<CircularBuffer<Arc<Command>>>,
    master: Option<Arc<Master>>,
    info: Arc<Info>,
    shutdown: watch::Receiver<bool>,
) {
    info.incr_connected_clients();

    let (read_half, write_half) = stream.into_split();
    let handle = ConnHandle::new(addr.clone(), write_half);
    let conn_state = ConnState::new(Some(handle.clone()));
    let pending: Arc<Mutex<VecDeque<Arc<Command>>>> = Arc::new(Mutex::new(VecDeque::new()));

    spawn_reply_writer(
        handle.clone(),
        conn_state.clone(),
        pending.clone(),
        master.clone(),
        shutdown.clone(),
    );

    let mut reader = FrameReader::new(read_half);
    let mut shutdown = shutdown;
    loop {
        if handle.is_closed() {
            break;
        }

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
                        let _ = handle.write_all(&err.to_value().encode()).await;
                        continue;
                    }
                };

                let cmd = Command::new(frame, conn_state.clone());
                pending
                    .lock()
                    .expect("pending deque lock poisoned")
                    .push_back(cmd.clone());
                if !cmd_buf.send(cmd).await {
                    break;
                }
            }
            Ok(None) => {
                debug!(%addr, "client disconnected");
                break;
            }
            Err(err) if err.is_disconnected() => {
                debug!(%addr, "client connection lost");
                break;
            }
            Err(err @ (ServerError::Protocol(_) | ServerError::InvalidToken(_))) => {
                debug!(%addr, %err, "client sent an invalid frame");
                if handle.write_all(&err.to_value().encode()).await.is_err() {
                    break;
                }
                reader.resync();
            }
            Err(err) => {
                error!(%addr, %err, "connection error");
                break;
            }
        }
    }

    handle.mark_closed();
    if let Some(master) = &master {
        master.remove_slave(&addr);
    }
    info.decr_connected_clients();
}

/// Flushes the head of the pending deque once it completes or times out,
/// then runs its deferred action (replication upgrade, close).
fn spawn_reply_writer(
    handle: ConnHandle,
    conn_state: Arc<ConnState>,
    pending: Arc<Mutex<VecDeque<Arc<Command>>>>,
    master: Option<Arc<Master>>,
    shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() || handle.is_closed() {
                break;
            }

            let head = {
                let queue = pending.lock().expect("pending deque lock poisoned");
                queue.front().cloned()
            };

            let Some(cmd) = head else {
                tokio::time::sleep(WRITER_POLL).await;
                continue;
            };
            if !cmd.is_done() && !cmd.has_timed_out() {
                tokio::time::sleep(WRITER_POLL).await;
                continue;
            }

            let bytes = cmd.take_flush_bytes();
            if !bytes.is_empty() {
                if let Err(err) = handle.write_all(&bytes).await {
                    debug!(addr = %handle.addr, %err, "failed to write reply");
                    handle.mark_closed();
                    break;
                }
            }

            match cmd.take_deferred() {
                Some(Deferred::UpgradeToReplication) => {
                    conn_state.upgrade_to_replication();
                    if let Some(master) = &master {
                        master.start_sync(&handle.addr);
                    }
                }
                Some(Deferred::Close) => {
                    handle.mark_closed();
                    handle.shutdown().await;
                }
                None => {}
            }

            pending
                .lock()
                .expect("pending deque lock poisoned")
                .pop_front();
        }
    });
}
