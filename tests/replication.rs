use std::net::SocketAddr;
use std::time::Duration;

use rudis::config::Config;
use rudis::resp::{CommandFrame, FrameReader, Value};
use rudis::server::Server;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

/// A RESP client over the crate's own codec; replication tests poll for
/// convergence, so replies are compared as parsed values.
struct TestClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to server");
        stream.set_nodelay(true).expect("set nodelay");
        let (read_half, write_half) = stream.into_split();
        TestClient {
            reader: FrameReader::new(read_half),
            writer: write_half,
        }
    }

    async fn roundtrip(&mut self, parts: &[&str]) -> Value {
        let frame = CommandFrame::from_parts(parts[0], &parts[1..]);
        self.writer
            .write_all(&frame.encode())
            .await
            .expect("write command");
        self.read_value(Duration::from_secs(5)).await
    }

    async fn read_value(&mut self, limit: Duration) -> Value {
        let (value, _) = timeout(limit, self.reader.read_frame())
            .await
            .expect("reply should arrive in time")
            .expect("read should succeed")
            .expect("stream should stay open");
        value
    }
}

async fn spawn_server(replica_of: Option<(String, u16)>) -> (SocketAddr, watch::Sender<bool>) {
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        replica_of,
    };
    let server = Server::bind(&config).await.expect("server should bind");
    let addr = server.local_addr().expect("bound address");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server.run(shutdown_rx).await;
    });
    (addr, shutdown_tx)
}

async fn spawn_master_and_replica() -> (SocketAddr, SocketAddr, watch::Sender<bool>, watch::Sender<bool>)
{
    let (master_addr, master_shutdown) = spawn_server(None).await;
    let (replica_addr, replica_shutdown) =
        spawn_server(Some(("127.0.0.1".to_string(), master_addr.port()))).await;
    (master_addr, replica_addr, master_shutdown, replica_shutdown)
}

/// Polls the replica until the key turns up (or the deadline passes),
/// returning the final reply.
async fn poll_replica_get(replica: &mut TestClient, key: &str, deadline: Duration) -> Value {
    let started = tokio::time::Instant::now();
    loop {
        let value = replica.roundtrip(&["GET", key]).await;
        if value != Value::NullBulk || started.elapsed() > deadline {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_write_propagates_to_replica() {
    let (master_addr, replica_addr, _m, _r) = spawn_master_and_replica().await;
    let mut master = TestClient::connect(master_addr).await;
    let mut replica = TestClient::connect(replica_addr).await;

    assert_eq!(
        master.roundtrip(&["SET", "foo", "bar"]).await,
        Value::Simple("OK".to_string())
    );

    let value = poll_replica_get(&mut replica, "foo", Duration::from_secs(5)).await;
    assert_eq!(value, Value::bulk("bar"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replica_is_read_only_for_clients() {
    let (_master_addr, replica_addr, _m, _r) = spawn_master_and_replica().await;
    let mut replica = TestClient::connect(replica_addr).await;

    let reply = replica.roundtrip(&["SET", "foo", "bar"]).await;
    assert_eq!(
        reply,
        Value::Error("READONLY You can't write against a read only replica".to_string())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_roles_in_info() {
    let (master_addr, replica_addr, _m, _r) = spawn_master_and_replica().await;
    let mut master = TestClient::connect(master_addr).await;
    let mut replica = TestClient::connect(replica_addr).await;

    // Let the handshake finish before asking the master about its slaves.
    let mut connected = false;
    for _ in 0..100 {
        let Value::Bulk(text) = master.roundtrip(&["INFO", "replication"]).await else {
            panic!("INFO should reply a bulk string");
        };
        assert!(text.contains("role:master"));
        if text.contains("connected_slaves:1") {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(connected, "master should report one connected slave");

    let Value::Bulk(text) = replica.roundtrip(&["INFO", "replication"]).await else {
        panic!("INFO should reply a bulk string");
    };
    assert!(text.contains("role:slave"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replicated_list_and_sorted_set_state() {
    let (master_addr, replica_addr, _m, _r) = spawn_master_and_replica().await;
    let mut master = TestClient::connect(master_addr).await;
    let mut replica = TestClient::connect(replica_addr).await;

    master.roundtrip(&["RPUSH", "q", "a", "b"]).await;
    master.roundtrip(&["ZADD", "scores", "1", "x", "2", "y"]).await;
    master.roundtrip(&["SET", "marker", "done"]).await;

    let marker = poll_replica_get(&mut replica, "marker", Duration::from_secs(5)).await;
    assert_eq!(marker, Value::bulk("done"));

    assert_eq!(
        replica.roundtrip(&["LRANGE", "q", "0", "-1"]).await,
        Value::Array(vec![Value::bulk("a"), Value::bulk("b")])
    );
    assert_eq!(
        replica.roundtrip(&["ZRANGE", "scores", "0", "-1"]).await,
        Value::Array(vec![Value::bulk("x"), Value::bulk("y")])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_counts_acknowledged_replica() {
    let (master_addr, replica_addr, _m, _r) = spawn_master_and_replica().await;
    let mut master = TestClient::connect(master_addr).await;
    let mut replica = TestClient::connect(replica_addr).await;

    master.roundtrip(&["SET", "foo", "bar"]).await;
    let value = poll_replica_get(&mut replica, "foo", Duration::from_secs(5)).await;
    assert_eq!(value, Value::bulk("bar"));

    let reply = master.roundtrip(&["WAIT", "1", "3000"]).await;
    assert_eq!(reply, Value::Integer(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_offsets_converge() {
    let (master_addr, replica_addr, _m, _r) = spawn_master_and_replica().await;
    let mut master = TestClient::connect(master_addr).await;
    let mut replica = TestClient::connect(replica_addr).await;

    master.roundtrip(&["SET", "a", "1"]).await;
    master.roundtrip(&["SET", "b", "2"]).await;
    let value = poll_replica_get(&mut replica, "b", Duration::from_secs(5)).await;
    assert_eq!(value, Value::bulk("2"));

    let expected = CommandFrame::from_parts("SET", &["a", "1"]).byte_size
        + CommandFrame::from_parts("SET", &["b", "2"]).byte_size;

    let Value::Bulk(master_info) = master.roundtrip(&["INFO", "replication"]).await else {
        panic!("INFO should reply a bulk string");
    };
    assert!(
        master_info.contains(&format!("master_repl_offset:{expected}")),
        "master offset in {master_info:?}"
    );

    let Value::Bulk(replica_info) = replica.roundtrip(&["INFO", "replication"]).await else {
        panic!("INFO should reply a bulk string");
    };
    assert!(
        replica_info.contains(&format!("master_repl_offset:{expected}")),
        "replica offset in {replica_info:?}"
    );
}
