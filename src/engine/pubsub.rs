use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use crate::engine::conn::ConnHandle;
use crate::error::is_disconnect_io_error;
use crate::resp::Value;

/// Pub/sub state: per-channel subscriber lists and per-channel FIFO
/// message queues.
///
/// PUBLISH only enqueues; the core loop drains one message per channel per
/// round and writes it to every live subscriber. Channels reference
/// subscribers only by id + connection handle, so a dead connection is
/// garbage-collected the next time its channel drains.
#[derive(Debug, Default)]
pub struct PubSub {
    subs: HashMap<String, Vec<Subscriber>>,
    queues: HashMap<String, VecDeque<Value>>,
}

#[derive(Debug)]
struct Subscriber {
    id: String,
    conn: ConnHandle,
}

impl PubSub {
    pub fn new() -> Self {
        PubSub::default()
    }

    /// Enqueues a message and reports the channel's current subscriber
    /// count (the deliveries the next drain will attempt).
    pub fn publish(&mut self, channel: &str, message: Value) -> usize {
        self.queues
            .entry(channel.to_string())
            .or_default()
            .push_back(message);
        self.subs.get(channel).map_or(0, |subs| subs.len())
    }

    pub fn subscribe(&mut self, sub_id: &str, channel: &str, conn: ConnHandle) {
        self.subs
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                id: sub_id.to_string(),
                conn,
            });
    }

    /// Number of channels this subscription id is subscribed to.
    pub fn count_subs(&self, sub_id: &str) -> usize {
        self.subs
            .values()
            .flatten()
            .filter(|sub| sub.id == sub_id)
            .count()
    }

    pub fn unsubscribe(&mut self, sub_id: &str, channel: &str) {
        if let Some(subs) = self.subs.get_mut(channel) {
            subs.retain(|sub| sub.id != sub_id);
        }
    }

    /// Unsubscribes everywhere, returning the channels that were left.
    pub fn unsubscribe_all(&mut self, sub_id: &str) -> Vec<String> {
        let mut channels = Vec::new();
        for (channel, subs) in self.subs.iter_mut() {
            let before = subs.len();
            subs.retain(|sub| sub.id != sub_id);
            if subs.len() < before {
                channels.push(channel.clone());
            }
        }
        channels
    }

    /// Delivers one queued message per channel to every live subscriber,
    /// dropping subscribers whose connections are gone.
    pub async fn drain(&mut self) {
        for (channel, queue) in self.queues.iter_mut() {
            let Some(message) = queue.pop_front() else {
                continue;
            };
            let Some(subs) = self.subs.get_mut(channel) else {
                continue;
            };

            let payload = Value::Array(vec![
                Value::bulk("message"),
                Value::bulk(channel.clone()),
                message,
            ])
            .encode();

            let mut dead: Vec<String> = Vec::new();
            for sub in subs.iter() {
                if sub.conn.is_closed() {
                    dead.push(sub.id.clone());
                    continue;
                }
                match sub.conn.write_all(&payload).await {
                    Ok(()) => {
                        debug!(%channel, sub_id = %sub.id, "delivered pubsub message")
                    }
                    Err(err) if is_disconnect_io_error(&err) => {
                        debug!(sub_id = %sub.id, addr = %sub.conn.addr, "subscriber disconnected");
                        dead.push(sub.id.clone());
                    }
                    Err(err) => {
                        warn!(sub_id = %sub.id, %err, "failed to write pubsub message");
                    }
                }
            }
            subs.retain(|sub| !dead.contains(&sub.id));
        }
    }
}
