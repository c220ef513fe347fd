use std::sync::Arc;
use std::time::Duration;

use rudis::engine::command::Command;
use rudis::engine::conn::{ConnHandle, ConnState};
use rudis::engine::Engine;
use rudis::info::Info;
use rudis::repl::master::Master;
use rudis::repl::replica::Replica;
use rudis::resp::CommandFrame;
use tokio::net::{TcpListener, TcpStream};

fn master_engine() -> Engine {
    let repl_id = "m".repeat(40);
    let info = Arc::new(Info::new("master", &repl_id));
    let master = Arc::new(Master::new(info.clone(), repl_id));
    Engine::new_master(info, master)
}

fn replica_engine() -> (Engine, Arc<Replica>) {
    let repl_id = "r".repeat(40);
    let info = Arc::new(Info::new("slave", &repl_id));
    let replica = Replica::new("127.0.0.1", 1, 6380);
    (Engine::new_replica(info, replica.clone()), replica)
}

fn frame(parts: &[&str]) -> CommandFrame {
    CommandFrame::from_parts(parts[0], &parts[1..])
}

/// Executes one client command and returns the bytes its connection
/// writer would flush.
async fn exec(engine: &mut Engine, conn: &Arc<ConnState>, parts: &[&str]) -> Vec<u8> {
    let cmd = Command::new(frame(parts), conn.clone());
    engine.process(cmd.clone()).await;
    cmd.take_flush_bytes()
}

async fn exec_replicated(engine: &mut Engine, conn: &Arc<ConnState>, parts: &[&str]) -> Vec<u8> {
    let cmd = Command::new_replicated(frame(parts), conn.clone());
    engine.process(cmd.clone()).await;
    cmd.take_flush_bytes()
}

async fn socket_backed_conn() -> (Arc<ConnState>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).await.expect("connect");
    let (server, peer) = listener.accept().await.expect("accept");
    let (_, writer) = server.into_split();
    let handle = ConnHandle::new(peer.to_string(), writer);
    (ConnState::new(Some(handle)), client)
}

#[tokio::test]
async fn test_ping_and_echo() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(exec(&mut engine, &conn, &["PING"]).await, b"+PONG\r\n");
    assert_eq!(
        exec(&mut engine, &conn, &["ECHO", "hello"]).await,
        b"$5\r\nhello\r\n"
    );
}

#[tokio::test]
async fn test_unknown_command() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["FLUSHALL"]).await,
        b"-ERR invalid command 'FLUSHALL'\r\n"
    );
}

#[tokio::test]
async fn test_set_get_round_trip() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["SET", "foo", "bar"]).await,
        b"+OK\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["GET", "foo"]).await,
        b"$3\r\nbar\r\n"
    );
    assert_eq!(exec(&mut engine, &conn, &["GET", "missing"]).await, b"$-1\r\n");
}

#[tokio::test(start_paused = true)]
async fn test_set_with_px_expires() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    exec(&mut engine, &conn, &["SET", "foo", "bar", "PX", "10"]).await;
    assert_eq!(
        exec(&mut engine, &conn, &["GET", "foo"]).await,
        b"$3\r\nbar\r\n"
    );

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(exec(&mut engine, &conn, &["GET", "foo"]).await, b"$-1\r\n");
}

#[tokio::test(start_paused = true)]
async fn test_set_with_ex_uses_seconds() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    exec(&mut engine, &conn, &["SET", "foo", "bar", "EX", "2"]).await;
    tokio::time::advance(Duration::from_millis(1500)).await;
    assert_eq!(
        exec(&mut engine, &conn, &["GET", "foo"]).await,
        b"$3\r\nbar\r\n"
    );
    tokio::time::advance(Duration::from_millis(600)).await;
    assert_eq!(exec(&mut engine, &conn, &["GET", "foo"]).await, b"$-1\r\n");
}

#[tokio::test]
async fn test_incr() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(exec(&mut engine, &conn, &["INCR", "counter"]).await, b":1\r\n");
    assert_eq!(exec(&mut engine, &conn, &["INCR", "counter"]).await, b":2\r\n");
    assert_eq!(
        exec(&mut engine, &conn, &["GET", "counter"]).await,
        b"$1\r\n2\r\n"
    );

    exec(&mut engine, &conn, &["SET", "text", "abc"]).await;
    assert_eq!(
        exec(&mut engine, &conn, &["INCR", "text"]).await,
        b"-ERR value is not an integer or out of range\r\n"
    );
}

#[tokio::test]
async fn test_select_switches_databases() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    exec(&mut engine, &conn, &["SET", "key", "db0"]).await;
    assert_eq!(exec(&mut engine, &conn, &["SELECT", "1"]).await, b"+OK\r\n");
    assert_eq!(exec(&mut engine, &conn, &["GET", "key"]).await, b"$-1\r\n");

    exec(&mut engine, &conn, &["SET", "key", "db1"]).await;
    exec(&mut engine, &conn, &["SELECT", "0"]).await;
    assert_eq!(
        exec(&mut engine, &conn, &["GET", "key"]).await,
        b"$3\r\ndb0\r\n"
    );

    assert_eq!(
        exec(&mut engine, &conn, &["SELECT", "16"]).await,
        b"-ERR invalid database number, must be between 0 and 15\r\n"
    );
}

#[tokio::test]
async fn test_list_commands() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["RPUSH", "q", "a", "b", "c"]).await,
        b":3\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["LRANGE", "q", "0", "-1"]).await,
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["LPOP", "q", "2"]).await,
        b"*2\r\n$1\r\na\r\n$1\r\nb\r\n"
    );
    assert_eq!(exec(&mut engine, &conn, &["LLEN", "q"]).await, b":1\r\n");
    assert_eq!(
        exec(&mut engine, &conn, &["LINDEX", "q", "-1"]).await,
        b"$1\r\nc\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["RPOP", "q"]).await,
        b"$1\r\nc\r\n"
    );

    // The drained list is deleted; a fresh pop sees a missing key.
    assert_eq!(exec(&mut engine, &conn, &["LPOP", "q"]).await, b"$-1\r\n");
    assert_eq!(exec(&mut engine, &conn, &["LLEN", "q"]).await, b":0\r\n");
}

#[tokio::test]
async fn test_lpush_prepends() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    exec(&mut engine, &conn, &["LPUSH", "q", "b", "a"]).await;
    assert_eq!(
        exec(&mut engine, &conn, &["LRANGE", "q", "0", "-1"]).await,
        b"*2\r\n$1\r\na\r\n$1\r\nb\r\n"
    );
}

#[tokio::test]
async fn test_blpop_immediate_pop() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    exec(&mut engine, &conn, &["RPUSH", "q", "hello"]).await;
    assert_eq!(
        exec(&mut engine, &conn, &["BLPOP", "q", "0"]).await,
        b"*2\r\n$1\r\nq\r\n$5\r\nhello\r\n"
    );
}

#[tokio::test]
async fn test_blpop_resolved_by_later_push() {
    let mut engine = master_engine();
    let waiter_conn = ConnState::new(None);
    let pusher_conn = ConnState::new(None);

    let blpop = Command::new(frame(&["BLPOP", "q", "0"]), waiter_conn.clone());
    engine.process(blpop.clone()).await;
    assert!(!blpop.is_done(), "BLPOP on an empty list parks");

    assert_eq!(
        exec(&mut engine, &pusher_conn, &["RPUSH", "q", "hello"]).await,
        b":1\r\n"
    );
    assert!(blpop.is_done());
    assert_eq!(
        blpop.take_flush_bytes(),
        b"*2\r\n$1\r\nq\r\n$5\r\nhello\r\n"
    );
}

#[tokio::test]
async fn test_blpop_waiters_resolve_fifo() {
    let mut engine = master_engine();
    let first = ConnState::new(None);
    let second = ConnState::new(None);
    let pusher = ConnState::new(None);

    let blpop1 = Command::new(frame(&["BLPOP", "q", "0"]), first.clone());
    engine.process(blpop1.clone()).await;
    let blpop2 = Command::new(frame(&["BLPOP", "q", "0"]), second.clone());
    engine.process(blpop2.clone()).await;

    exec(&mut engine, &pusher, &["RPUSH", "q", "one"]).await;
    assert!(blpop1.is_done(), "oldest waiter is served first");
    assert!(!blpop2.is_done());

    exec(&mut engine, &pusher, &["RPUSH", "q", "two"]).await;
    assert!(blpop2.is_done());
    assert_eq!(
        blpop2.take_flush_bytes(),
        b"*2\r\n$1\r\nq\r\n$3\r\ntwo\r\n"
    );
}

#[tokio::test(start_paused = true)]
async fn test_blpop_timeout_reply_and_prune() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    let blpop = Command::new(frame(&["BLPOP", "q", "1"]), conn.clone());
    engine.process(blpop.clone()).await;
    assert!(!blpop.has_timed_out());

    tokio::time::advance(Duration::from_millis(1100)).await;
    assert!(blpop.has_timed_out());
    assert_eq!(blpop.take_flush_bytes(), b"*-1\r\n");

    // After the prune round, a push must not try to serve the dead waiter.
    engine.tick().await;
    let pusher = ConnState::new(None);
    assert_eq!(
        exec(&mut engine, &pusher, &["RPUSH", "q", "x"]).await,
        b":1\r\n"
    );
    assert_eq!(
        exec(&mut engine, &pusher, &["LLEN", "q"]).await,
        b":1\r\n",
        "value stays in the list"
    );
}

#[tokio::test]
async fn test_transaction_exec() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(exec(&mut engine, &conn, &["MULTI"]).await, b"+OK\r\n");
    assert_eq!(
        exec(&mut engine, &conn, &["SET", "k", "1"]).await,
        b"+QUEUED\r\n"
    );
    assert_eq!(exec(&mut engine, &conn, &["INCR", "k"]).await, b"+QUEUED\r\n");
    assert_eq!(exec(&mut engine, &conn, &["INCR", "k"]).await, b"+QUEUED\r\n");

    // Nothing executed while queuing.
    let other = ConnState::new(None);
    assert_eq!(exec(&mut engine, &other, &["GET", "k"]).await, b"$-1\r\n");

    assert_eq!(
        exec(&mut engine, &conn, &["EXEC"]).await,
        b"*3\r\n+OK\r\n:2\r\n:3\r\n"
    );
    assert_eq!(exec(&mut engine, &conn, &["GET", "k"]).await, b"$1\r\n3\r\n");
}

#[tokio::test]
async fn test_transaction_collects_errors_per_command() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    exec(&mut engine, &conn, &["SET", "text", "abc"]).await;
    exec(&mut engine, &conn, &["MULTI"]).await;
    exec(&mut engine, &conn, &["INCR", "text"]).await;
    exec(&mut engine, &conn, &["SET", "other", "1"]).await;

    let reply = exec(&mut engine, &conn, &["EXEC"]).await;
    assert_eq!(
        reply,
        b"*2\r\n-ERR value is not an integer or out of range\r\n+OK\r\n".to_vec()
    );
    assert_eq!(
        exec(&mut engine, &conn, &["GET", "other"]).await,
        b"$1\r\n1\r\n"
    );
}

#[tokio::test]
async fn test_transaction_state_errors() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["EXEC"]).await,
        b"-ERR EXEC without MULTI\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["DISCARD"]).await,
        b"-ERR DISCARD without MULTI\r\n"
    );

    exec(&mut engine, &conn, &["MULTI"]).await;
    assert_eq!(
        exec(&mut engine, &conn, &["MULTI"]).await,
        b"-ERR MULTI calls cannot be nested\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["INFO"]).await,
        b"-ERR INFO not allowed in a transaction\r\n"
    );

    exec(&mut engine, &conn, &["SET", "k", "v"]).await;
    assert_eq!(exec(&mut engine, &conn, &["DISCARD"]).await, b"+OK\r\n");
    assert_eq!(exec(&mut engine, &conn, &["GET", "k"]).await, b"$-1\r\n");
}

#[tokio::test]
async fn test_sorted_set_commands() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["ZADD", "scores", "1", "a", "2", "b", "1", "c"]).await,
        b":3\r\n"
    );
    // Ties are ordered by member, ascending.
    assert_eq!(
        exec(&mut engine, &conn, &["ZRANGE", "scores", "0", "-1"]).await,
        b"*3\r\n$1\r\na\r\n$1\r\nc\r\n$1\r\nb\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["ZCARD", "scores"]).await,
        b":3\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["ZSCORE", "scores", "b"]).await,
        b"$1\r\n2\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["ZRANK", "scores", "b"]).await,
        b":2\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["ZRANK", "scores", "zz"]).await,
        b"$-1\r\n"
    );

    // Rescoring an existing member adds nothing.
    assert_eq!(
        exec(&mut engine, &conn, &["ZADD", "scores", "9", "a"]).await,
        b":0\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["ZREM", "scores", "a", "zz"]).await,
        b":1\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["ZCARD", "scores"]).await,
        b":2\r\n"
    );
}

#[tokio::test]
async fn test_geo_commands() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(
            &mut engine,
            &conn,
            &[
                "GEOADD", "city", "-0.1278", "51.5074", "London", "2.3522", "48.8566", "Paris",
            ],
        )
        .await,
        b":2\r\n"
    );

    let reply = exec(&mut engine, &conn, &["GEODIST", "city", "London", "Paris"]).await;
    let text = String::from_utf8(reply).expect("utf8 reply");
    let mut lines = text.split("\r\n");
    let header = lines.next().expect("bulk header");
    assert!(header.starts_with('$'), "GEODIST replies a bulk string");
    let distance: f64 = lines
        .next()
        .expect("bulk payload")
        .parse()
        .expect("numeric distance");
    assert!(
        (distance - 343_500.0).abs() < 3_435.0,
        "distance {distance} should be within 1% of 343500"
    );

    let reply = exec(&mut engine, &conn, &["GEOPOS", "city", "Paris", "Ghost"]).await;
    let text = String::from_utf8(reply).expect("utf8 reply");
    assert!(text.starts_with("*2\r\n"));
    assert!(text.contains("2.35"), "longitude of Paris in {text:?}");
    assert!(text.ends_with("*-1\r\n"), "missing member is a null array");

    assert_eq!(
        exec(&mut engine, &conn, &["GEOADD", "city", "200", "0", "Nowhere"]).await,
        b"-ERR invalid arguments: invalid longitude value: 200\r\n"
    );

    let reply = exec(
        &mut engine,
        &conn,
        &["GEOSEARCH", "city", "FROMLONLAT", "-0.1278", "51.5074", "BYRADIUS", "100", "km"],
    )
    .await;
    assert_eq!(reply, b"*1\r\n$6\r\nLondon\r\n");
}

#[tokio::test]
async fn test_set_commands() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["SADD", "fruits", "apple", "pear", "apple"]).await,
        b":2\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["SMEMBERS", "fruits"]).await,
        b"*2\r\n$5\r\napple\r\n$4\r\npear\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["SISMEMBER", "fruits", "apple"]).await,
        b":1\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["SCARD", "fruits"]).await,
        b":2\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["SREM", "fruits", "apple", "pear"]).await,
        b":2\r\n"
    );
    assert_eq!(
        exec(&mut engine, &conn, &["SISMEMBER", "fruits", "apple"]).await,
        b":0\r\n"
    );
}

#[tokio::test]
async fn test_replica_rejects_client_writes() {
    let (mut engine, _replica) = replica_engine();
    let conn = ConnState::new(None);

    assert_eq!(
        exec(&mut engine, &conn, &["SET", "foo", "bar"]).await,
        b"-READONLY You can't write against a read only replica\r\n"
    );
    assert_eq!(exec(&mut engine, &conn, &["GET", "foo"]).await, b"$-1\r\n");
}

#[tokio::test]
async fn test_replica_applies_replicated_writes_silently() {
    let (mut engine, replica) = replica_engine();
    let stream_conn = ConnState::new(None);
    stream_conn.upgrade_to_replication();
    let client = ConnState::new(None);

    let output = exec_replicated(&mut engine, &stream_conn, &["SET", "foo", "bar"]).await;
    assert!(output.is_empty(), "replicated writes produce no reply");
    assert_eq!(
        exec(&mut engine, &client, &["GET", "foo"]).await,
        b"$3\r\nbar\r\n"
    );

    let expected = frame(&["SET", "foo", "bar"]).byte_size as u64;
    assert_eq!(replica.repl_offset(), expected);
}

#[tokio::test]
async fn test_replica_getack_reports_offset_without_advancing() {
    let (mut engine, replica) = replica_engine();
    let stream_conn = ConnState::new(None);
    stream_conn.upgrade_to_replication();

    exec_replicated(&mut engine, &stream_conn, &["SET", "a", "1"]).await;
    let offset = replica.repl_offset();
    assert!(offset > 0);

    let reply = exec_replicated(&mut engine, &stream_conn, &["REPLCONF", "GETACK", "*"]).await;
    let expected = format!(
        "*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK\r\n${}\r\n{}\r\n",
        offset.to_string().len(),
        offset
    );
    assert_eq!(reply, expected.as_bytes());
    assert_eq!(replica.repl_offset(), offset, "the ACK exchange is not counted");
}

#[tokio::test(start_paused = true)]
async fn test_wait_resolves_immediately_with_zero_required() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    let wait = Command::new(frame(&["WAIT", "0", "500"]), conn.clone());
    engine.process(wait.clone()).await;
    assert!(!wait.is_done());

    engine.tick().await;
    assert!(wait.is_done());
    assert_eq!(wait.take_flush_bytes(), b":0\r\n");
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_and_reports_count() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    let wait = Command::new(frame(&["WAIT", "2", "100"]), conn.clone());
    engine.process(wait.clone()).await;

    tokio::time::advance(Duration::from_millis(150)).await;
    assert!(wait.has_timed_out());
    assert_eq!(wait.take_flush_bytes(), b":0\r\n");
}

#[tokio::test]
async fn test_wait_rejected_on_replica() {
    let (mut engine, _replica) = replica_engine();
    let conn = ConnState::new(None);
    assert_eq!(
        exec(&mut engine, &conn, &["WAIT", "1", "100"]).await,
        b"-ERR invalid arguments: WAIT invalid for a replica\r\n"
    );
}

#[tokio::test]
async fn test_subscribe_mode() {
    let mut engine = master_engine();
    let (subscriber, mut client_side) = socket_backed_conn().await;
    let publisher = ConnState::new(None);

    let reply = exec(&mut engine, &subscriber, &["SUBSCRIBE", "news"]).await;
    let text = String::from_utf8(reply).expect("utf8 reply");
    assert!(text.starts_with("*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n"));
    assert!(subscriber.is_subscribe());

    // Only the pub/sub control commands are allowed now.
    assert_eq!(
        exec(&mut engine, &subscriber, &["GET", "x"]).await,
        b"-ERR can't execute 'get' while in subscribe mode\r\n"
    );
    assert_eq!(
        exec(&mut engine, &subscriber, &["PING"]).await,
        b"*2\r\n$4\r\npong\r\n$0\r\n\r\n"
    );

    assert_eq!(
        exec(&mut engine, &publisher, &["PUBLISH", "news", "breaking"]).await,
        b":1\r\n"
    );

    // The next round delivers the message to the subscriber's socket.
    engine.tick().await;
    use tokio::io::AsyncReadExt;
    let mut buf = vec![0u8; 256];
    let n = client_side.read(&mut buf).await.expect("read");
    assert_eq!(
        &buf[..n],
        b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$8\r\nbreaking\r\n"
    );

    let reply = exec(&mut engine, &subscriber, &["UNSUBSCRIBE"]).await;
    let text = String::from_utf8(reply).expect("utf8 reply");
    assert!(text.starts_with("*3\r\n$11\r\nunsubscribe\r\n"));
    assert!(text.ends_with(":0\r\n"));
}

#[tokio::test]
async fn test_info_sections() {
    let mut engine = master_engine();
    let conn = ConnState::new(None);

    let reply = exec(&mut engine, &conn, &["INFO"]).await;
    let text = String::from_utf8(reply).expect("utf8 reply");
    assert!(text.contains("role:master"));
    assert!(text.contains("master_repl_offset:0"));
    assert!(text.contains("connected_clients:0"));

    let reply = exec(&mut engine, &conn, &["INFO", "replication"]).await;
    let text = String::from_utf8(reply).expect("utf8 reply");
    assert!(text.contains("# Replication"));
    assert!(!text.contains("# Clients"));

    assert_eq!(
        exec(&mut engine, &conn, &["INFO", "bogus"]).await,
        b"-ERR unknown section 'bogus'\r\n"
    );
}
