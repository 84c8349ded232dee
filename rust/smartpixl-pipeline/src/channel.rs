// smartpixl-pipeline: Bounded handoff channel with declared overflow policy

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Overflow behaviour, fixed at channel construction.
///
/// Unbounded queues are disallowed: unbounded memory growth under a
/// downstream stall is a hard-blocker failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest queued item to admit the new one; preserves fresh
    /// traffic under sustained overload (SQL-writer feed)
    DropOldest,
    /// Refuse the item and let the producer decide within its deadline
    /// (pipe-ingestion feed)
    BlockWithTimeout,
}

/// Non-blocking send outcome
#[derive(Debug)]
pub enum TrySendOutcome<T> {
    Sent,
    /// Enqueued, but the oldest queued item was evicted to make room
    DroppedOldest,
    /// Channel full under the block-with-timeout policy; item returned
    WouldBlock(T),
    Closed(T),
}

/// Blocking send outcome; rejected items come back to the producer
#[derive(Debug)]
pub enum SendOutcome<T> {
    Sent,
    TimedOut(T),
    Closed(T),
}

struct ChannelState<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO between two pipeline stages.
///
/// FIFO per producer; no ordering guarantee across producers. One consumer
/// loop drains each instance. Depth is observable for the health probe.
pub struct HandoffChannel<T> {
    state: Mutex<ChannelState<T>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl<T> HandoffChannel<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity: capacity.max(1),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking send honouring the channel's overflow policy
    pub fn try_send(&self, item: T) -> TrySendOutcome<T> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return TrySendOutcome::Closed(item);
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(item);
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        state.queue.pop_front();
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        state.queue.push_back(item);
                        drop(state);
                        self.not_empty.notify_one();
                        return TrySendOutcome::DroppedOldest;
                    }
                    OverflowPolicy::BlockWithTimeout => {
                        return TrySendOutcome::WouldBlock(item);
                    }
                }
            }
        }
        self.not_empty.notify_one();
        TrySendOutcome::Sent
    }

    /// Send with a bounded wait for space; the item comes back on expiry
    pub async fn send_timeout(&self, item: T, timeout: Duration) -> SendOutcome<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut item = Some(item);

        loop {
            let parked = self.not_full.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return SendOutcome::Closed(item.take().expect("item present until sent"));
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(item.take().expect("item present until sent"));
                    drop(state);
                    self.not_empty.notify_one();
                    return SendOutcome::Sent;
                }
            }
            if tokio::time::timeout_at(deadline, parked).await.is_err() {
                return SendOutcome::TimedOut(item.take().expect("item present until sent"));
            }
        }
    }

    /// Send with indefinite backpressure; only channel closure rejects
    pub async fn send(&self, item: T) -> SendOutcome<T> {
        let mut item = Some(item);
        loop {
            let parked = self.not_full.notified();
            {
                let mut state = self.state.lock();
                if state.closed {
                    return SendOutcome::Closed(item.take().expect("item present until sent"));
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(item.take().expect("item present until sent"));
                    drop(state);
                    self.not_empty.notify_one();
                    return SendOutcome::Sent;
                }
            }
            parked.await;
        }
    }

    /// Receive the next item; `None` once the channel is closed and drained
    pub async fn recv(&self) -> Option<T> {
        loop {
            let parked = self.not_empty.notified();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    drop(state);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            parked.await;
        }
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Option<T> {
        let item = self.state.lock().queue.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Take up to `max` queued items at once (writer batch gathering,
    /// shutdown drains)
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut state = self.state.lock();
        let take = state.queue.len().min(max);
        let drained: Vec<T> = state.queue.drain(..take).collect();
        drop(state);
        for _ in 0..drained.len() {
            self.not_full.notify_one();
        }
        drained
    }

    /// Close the channel: senders are rejected, receivers drain what is
    /// queued and then see end-of-channel
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items evicted under the drop-oldest policy
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
