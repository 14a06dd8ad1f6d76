//! Per-spoke FIFO queue between the manager and a consumer.
//!
//! Any number of producers may `send` or `close`; one consumer is expected
//! to loop on `receive`. The queue is unbounded: the manager never blocks on
//! a slow spoke, and a remote writer drains it as fast as its socket accepts.
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Queue {
    messages: VecDeque<Bytes>,
    closed: bool,
}

/// Ordered handoff of byte messages to a single consumer.
#[derive(Debug, Default)]
pub struct Messenger {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message and wake the consumer. No-op once closed.
    pub fn send(&self, message: Bytes) {
        {
            let mut queue = self.queue();
            if queue.closed {
                return;
            }
            queue.messages.push_back(message);
        }
        self.notify.notify_waiters();
    }

    /// Mark the queue closed and wake every waiter.
    ///
    /// Idempotent. Messages already buffered are still delivered.
    pub fn close(&self) {
        {
            let mut queue = self.queue();
            if queue.closed {
                return;
            }
            queue.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Wait for the next message.
    ///
    /// Returns `None` only when the queue is closed and fully drained.
    /// Cancel-safe: a message is only taken from the queue when it is
    /// returned.
    pub async fn receive(&self) -> Option<Bytes> {
        loop {
            // Register before checking so a send between the check and the
            // await still wakes us.
            let notified = self.notify.notified();
            {
                let mut queue = self.queue();
                if let Some(message) = queue.messages.pop_front() {
                    return Some(message);
                }
                if queue.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Take the next message if one is buffered, without waiting.
    pub fn try_receive(&self) -> Option<Bytes> {
        self.queue().messages.pop_front()
    }

    pub fn is_closed(&self) -> bool {
        self.queue().closed
    }

    /// Number of buffered, undelivered messages.
    pub fn len(&self) -> usize {
        self.queue().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn drains_before_reporting_closed() {
        let m = Messenger::new();
        m.send(Bytes::from_static(b"a"));
        m.send(Bytes::from_static(b"b"));
        m.close();

        assert_eq!(m.receive().await.as_deref(), Some(&b"a"[..]));
        assert_eq!(m.receive().await.as_deref(), Some(&b"b"[..]));
        assert_eq!(m.receive().await, None);
        // Stays closed.
        assert_eq!(m.receive().await, None);
    }

    #[tokio::test]
    async fn send_after_close_is_dropped() {
        let m = Messenger::new();
        m.close();
        m.send(Bytes::from_static(b"late"));
        assert!(m.is_empty());
        assert_eq!(m.receive().await, None);
    }

    #[test]
    fn close_is_idempotent() {
        let m = Messenger::new();
        m.close();
        m.close();
        assert!(m.is_closed());
    }

    #[tokio::test]
    async fn receive_waits_for_send() {
        let m = Arc::new(Messenger::new());
        let consumer = {
            let m = m.clone();
            tokio::spawn(async move { m.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        m.send(Bytes::from_static(b"wake"));
        let got = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("receive did not wake")
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"wake"[..]));
    }

    #[tokio::test]
    async fn close_wakes_blocked_receiver() {
        let m = Arc::new(Messenger::new());
        let consumer = {
            let m = m.clone();
            tokio::spawn(async move { m.receive().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        m.close();
        let got = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("close did not wake receiver")
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn fifo_per_producer_with_concurrent_producers() {
        let m = Arc::new(Messenger::new());
        let mut producers = Vec::new();
        for p in 0u8..4 {
            let m = m.clone();
            producers.push(tokio::spawn(async move {
                for i in 0u8..50 {
                    m.send(Bytes::from(vec![p, i]));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        m.close();

        let mut next = [0u8; 4];
        while let Some(msg) = m.receive().await {
            let (p, i) = (msg[0] as usize, msg[1]);
            assert_eq!(i, next[p], "producer {p} out of order");
            next[p] += 1;
        }
        assert_eq!(next, [50; 4]);
    }

    #[test]
    fn try_receive_does_not_wait() {
        let m = Messenger::new();
        assert_eq!(m.try_receive(), None);
        m.send(Bytes::from_static(b"x"));
        assert_eq!(m.len(), 1);
        assert_eq!(m.try_receive().as_deref(), Some(&b"x"[..]));
        assert_eq!(m.try_receive(), None);
    }
}
