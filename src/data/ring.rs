use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Fixed-capacity MPMC queue ferrying commands from the connection
/// reactors into the single-threaded core.
///
/// `send` parks when the ring is full and wakes when a reader frees a
/// slot; `read`/`read_batch` never block. Closing the buffer unblocks
/// every parked sender without writing.
#[derive(Debug)]
pub struct CircularBuffer<T> {
    inner: Mutex<Ring<T>>,
    space: Notify,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Ring<T> {
    data: Vec<Option<T>>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<T> CircularBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        let mut data = Vec::with_capacity(capacity);
        data.resize_with(capacity, || None);
        CircularBuffer {
            inner: Mutex::new(Ring {
                data,
                head: 0,
                tail: 0,
                size: 0,
            }),
            space: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ring lock poisoned").size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueues one item, waiting for a free slot when the ring is full.
    /// Returns `false` when the buffer was closed before the item could be
    /// stored.
    pub async fn send(&self, item: T) -> bool {
        let mut item = Some(item);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }

            {
                let mut ring = self.inner.lock().expect("ring lock poisoned");
                if ring.size < ring.data.len() {
                    let tail = ring.tail;
                    ring.data[tail] = item.take();
                    ring.tail = (ring.tail + 1) % ring.data.len();
                    ring.size += 1;
                    return true;
                }
            }

            self.space.notified().await;
        }
    }

    /// Dequeues one item without blocking.
    pub fn read(&self) -> Option<T> {
        let mut ring = self.inner.lock().expect("ring lock poisoned");
        let item = ring.pop()?;
        drop(ring);
        self.space.notify_one();
        Some(item)
    }

    /// Dequeues up to `n` items without blocking.
    pub fn read_batch(&self, n: usize) -> Vec<T> {
        let mut batch = Vec::new();
        {
            let mut ring = self.inner.lock().expect("ring lock poisoned");
            for _ in 0..n {
                match ring.pop() {
                    Some(item) => batch.push(item),
                    None => break,
                }
            }
        }
        if !batch.is_empty() {
            self.space.notify_one();
        }
        batch
    }

    /// Closes the buffer: parked senders return `false` without writing.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.notify_waiters();
    }
}

impl<T> Ring<T> {
    fn pop(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let item = self.data[self.head].take();
        self.head = (self.head + 1) % self.data.len();
        self.size -= 1;
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_read_fifo() {
        let buf = CircularBuffer::new(4);
        for i in 0..4 {
            assert!(buf.send(i).await);
        }
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.read(), Some(0));
        assert_eq!(buf.read(), Some(1));
        assert_eq!(buf.read_batch(10), vec![2, 3]);
        assert_eq!(buf.read(), None);
    }

    #[tokio::test]
    async fn test_wraparound() {
        let buf = CircularBuffer::new(2);
        for round in 0..5 {
            assert!(buf.send(round * 2).await);
            assert!(buf.send(round * 2 + 1).await);
            assert_eq!(buf.read_batch(2), vec![round * 2, round * 2 + 1]);
        }
    }

    #[tokio::test]
    async fn test_full_buffer_blocks_sender_until_read() {
        let buf = Arc::new(CircularBuffer::new(1));
        assert!(buf.send(1).await);

        let buf_clone = Arc::clone(&buf);
        let sender = tokio::spawn(async move { buf_clone.send(2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished(), "sender should be parked on a full ring");

        assert_eq!(buf.read(), Some(1));
        let delivered = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .expect("sender should wake after a read")
            .expect("sender task should not panic");
        assert!(delivered);
        assert_eq!(buf.read(), Some(2));
    }

    #[tokio::test]
    async fn test_close_unblocks_sender_without_write() {
        let buf = Arc::new(CircularBuffer::new(1));
        assert!(buf.send(1).await);

        let buf_clone = Arc::clone(&buf);
        let sender = tokio::spawn(async move { buf_clone.send(2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        buf.close();

        let delivered = tokio::time::timeout(Duration::from_secs(1), sender)
            .await
            .expect("sender should wake on close")
            .expect("sender task should not panic");
        assert!(!delivered);
        assert_eq!(buf.len(), 1, "nothing was written after close");
    }

    #[tokio::test]
    async fn test_many_producers_one_consumer() {
        let buf = Arc::new(CircularBuffer::new(8));
        let mut producers = Vec::new();
        for p in 0..4 {
            let buf = Arc::clone(&buf);
            producers.push(tokio::spawn(async move {
                for i in 0..25 {
                    assert!(buf.send(p * 100 + i).await);
                }
            }));
        }

        let mut seen = Vec::new();
        while seen.len() < 100 {
            let batch = buf.read_batch(10);
            if batch.is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }
            seen.extend(batch);
        }

        for producer in producers {
            producer.await.expect("producer should finish");
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 100);
    }
}
