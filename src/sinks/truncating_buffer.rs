//! Bounded FIFO that drops the oldest element when full.
//!
//! Sits between a sink's input channel and its delivery loop. The producer
//! side never blocks: when the queue is at capacity, the element at the head
//! is discarded before the new one is enqueued at the tail, so a slow viewer
//! only ever costs it the oldest undelivered messages. A pump task drains
//! the input channel into the queue and closes the queue when the input side
//! is dropped.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

use crate::record::Envelope;

pub struct TruncatingBuffer {
    shared: Arc<Shared>,
}

struct Shared {
    capacity: usize,
    state: Mutex<State>,
    readable: Notify,
    dropped: AtomicU64,
}

struct State {
    queue: VecDeque<Envelope>,
    closed: bool,
}

impl TruncatingBuffer {
    /// Starts the pump task draining `input` into a queue of `capacity`.
    ///
    /// Capacities below one are clamped to one.
    pub fn start(mut input: mpsc::UnboundedReceiver<Envelope>, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                closed: false,
            }),
            readable: Notify::new(),
            dropped: AtomicU64::new(0),
        });

        let pump = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(envelope) = input.recv().await {
                pump.push(envelope);
            }
            pump.close();
        });

        Self { shared }
    }

    /// Receives the next buffered envelope.
    ///
    /// Returns `None` once the input channel has closed and the queue is
    /// drained. Cancellation-safe: an envelope is either returned or still
    /// queued.
    pub async fn recv(&self) -> Option<Envelope> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().expect("buffer state poisoned");
                if let Some(envelope) = state.queue.pop_front() {
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// How many envelopes have been discarded head-first so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Shared {
    fn push(&self, envelope: Envelope) {
        let mut state = self.state.lock().expect("buffer state poisoned");
        if state.queue.len() == self.capacity {
            state.queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        state.queue.push_back(envelope);
        drop(state);
        self.readable.notify_one();
    }

    fn close(&self) {
        self.state.lock().expect("buffer state poisoned").closed = true;
        self.readable.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(byte: u8) -> Envelope {
        Envelope::from(vec![byte])
    }

    #[tokio::test]
    async fn burst_keeps_newest_suffix() {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = TruncatingBuffer::start(rx, 3);

        for byte in [0x0A, 0x0B, 0x0C, 0x0D, 0x0E] {
            tx.send(envelope(byte)).unwrap();
        }
        drop(tx);

        let mut observed = Vec::new();
        while let Some(envelope) = buffer.recv().await {
            observed.push(envelope.payload()[0]);
        }
        assert_eq!(observed, vec![0x0C, 0x0D, 0x0E]);
        assert_eq!(buffer.dropped(), 2);
    }

    #[tokio::test]
    async fn delivers_in_order_below_capacity() {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = TruncatingBuffer::start(rx, 10);

        for byte in 1..=5u8 {
            tx.send(envelope(byte)).unwrap();
        }
        for expected in 1..=5u8 {
            let envelope = buffer.recv().await.unwrap();
            assert_eq!(envelope.payload()[0], expected);
        }
        assert_eq!(buffer.dropped(), 0);
    }

    #[tokio::test]
    async fn close_drains_remaining_then_ends() {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = TruncatingBuffer::start(rx, 4);

        tx.send(envelope(1)).unwrap();
        tx.send(envelope(2)).unwrap();
        drop(tx);

        assert_eq!(buffer.recv().await.unwrap().payload()[0], 1);
        assert_eq!(buffer.recv().await.unwrap().payload()[0], 2);
        assert!(buffer.recv().await.is_none());
    }

    #[tokio::test]
    async fn zero_capacity_clamps_to_one() {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = TruncatingBuffer::start(rx, 0);

        tx.send(envelope(1)).unwrap();
        tx.send(envelope(2)).unwrap();
        drop(tx);

        assert_eq!(buffer.recv().await.unwrap().payload()[0], 2);
        assert!(buffer.recv().await.is_none());
        assert_eq!(buffer.dropped(), 1);
    }

    #[tokio::test]
    async fn recv_wakes_on_late_push() {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffer = TruncatingBuffer::start(rx, 4);

        let pending = tokio::spawn(async move {
            let envelope = buffer.recv().await.unwrap();
            envelope.payload()[0]
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.send(envelope(7)).unwrap();
        assert_eq!(pending.await.unwrap(), 7);
    }
}
