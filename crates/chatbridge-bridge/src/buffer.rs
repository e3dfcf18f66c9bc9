// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded FIFO of decoded replies for one session.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use chatbridge_core::types::Envelope;

/// A session's reply buffer.
///
/// The consumer task pushes through a [`mpsc::Sender`] obtained from
/// [`SessionBuffer::sender`]; pollers take items out in delivery order.
/// Concurrent pollers are served one at a time.
#[derive(Debug)]
pub struct SessionBuffer {
    sender: mpsc::Sender<Envelope>,
    receiver: Mutex<mpsc::Receiver<Envelope>>,
}

impl SessionBuffer {
    /// Create a buffer holding at most `capacity` replies (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Producer side, handed to the session consumer.
    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.sender.clone()
    }

    /// Take the oldest reply, waiting at most `timeout` for one to arrive.
    ///
    /// The wait covers queueing behind other pollers too, so the bound holds
    /// under contention.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        })
        .await
        .ok()
        .flatten()
    }

    /// Take the oldest reply if one is ready and no poller is waiting.
    pub fn try_recv(&self) -> Option<Envelope> {
        let mut receiver = self.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    /// Number of buffered replies.
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(content: &str) -> Envelope {
        Envelope {
            session_id: Some("u1".into()),
            content: content.into(),
            ..Envelope::default()
        }
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let buffer = SessionBuffer::new(4);
        let tx = buffer.sender();
        tx.send(reply("one")).await.unwrap();
        tx.send(reply("two")).await.unwrap();
        assert_eq!(buffer.len(), 2);

        let first = buffer.recv_timeout(Duration::from_millis(50)).await.unwrap();
        let second = buffer.recv_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.content, "one");
        assert_eq!(second.content, "two");
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_buffer_times_out() {
        let buffer = SessionBuffer::new(4);
        let started = tokio::time::Instant::now();
        assert!(buffer.recv_timeout(Duration::from_secs(2)).await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn full_buffer_applies_backpressure() {
        let buffer = SessionBuffer::new(1);
        let tx = buffer.sender();
        tx.send(reply("one")).await.unwrap();
        assert!(tx.try_send(reply("two")).is_err());
        assert_eq!(buffer.try_recv().unwrap().content, "one");
        assert!(tx.try_send(reply("two")).is_ok());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(SessionBuffer::new(0).capacity(), 1);
    }
}
