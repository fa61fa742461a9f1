//! Bounded, expiring chat queue with long-poll retrieval.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use chatov_core::protocol::{Token, WireMessage};
use tokio::{
    sync::Notify,
    time::{sleep_until, timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;

pub const QUEUE_MSG_COUNT_LIMIT: usize = 500;
pub const QUEUE_MSG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    pub capacity: usize,
    pub message_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: QUEUE_MSG_COUNT_LIMIT,
            message_ttl: QUEUE_MSG_TIMEOUT,
        }
    }
}

/// Chat line as submitted to the queue, before it gets an id.
#[derive(Clone, Debug)]
pub struct NewMessage {
    pub user: String,
    pub user_color: String,
    pub message: String,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    added: Instant,
    wire: WireMessage,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    /// Id the next message will get.
    next_id: u64,
    /// Id of the oldest message still held (equals `next_id` when empty).
    oldest_id: u64,
}

impl QueueState {
    fn pop_oldest(&mut self) {
        if self.entries.pop_front().is_some() {
            self.oldest_id += 1;
        }
    }

    fn collect_from(&self, start: u64) -> Vec<WireMessage> {
        self.entries
            .iter()
            .filter(|e| e.id >= start)
            .map(|e| e.wire.clone())
            .collect()
    }
}

/// Snapshot for the `debug` console command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub next_id: u64,
    pub oldest_id: u64,
}

pub struct ChatQueue {
    cfg: QueueConfig,
    state: Mutex<QueueState>,
    /// Wakes long-poll waiters.
    arrivals: Notify,
    /// Wakes the expiry task (stores a permit if it is not waiting yet).
    expiry_wake: Notify,
}

impl ChatQueue {
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(QueueState::default()),
            arrivals: Notify::new(),
            expiry_wake: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> QueueStats {
        let st = self.lock();
        QueueStats {
            len: st.entries.len(),
            next_id: st.next_id,
            oldest_id: st.oldest_id,
        }
    }

    /// Append messages, evicting the oldest when full, and wake waiters.
    pub fn add_messages(&self, messages: impl IntoIterator<Item = NewMessage>) -> usize {
        let mut added = 0usize;
        {
            let mut st = self.lock();
            let now = Instant::now();
            let timestamp = chrono::Utc::now().timestamp();
            for msg in messages {
                while st.entries.len() >= self.cfg.capacity.max(1) {
                    st.pop_oldest();
                }
                let id = st.next_id;
                st.next_id += 1;
                st.entries.push_back(Entry {
                    id,
                    added: now,
                    wire: WireMessage {
                        mid: Token::from(id),
                        user: msg.user,
                        user_color: msg.user_color,
                        message: msg.message,
                        badges: None,
                        replying_to_user: None,
                        replying_to_message: None,
                        timestamp: Some(timestamp),
                    },
                });
                added += 1;
            }
        }
        if added > 0 {
            self.arrivals.notify_waiters();
            self.expiry_wake.notify_one();
        }
        added
    }

    /// First id to hand out for a client whose last seen id is `after`.
    ///
    /// No cursor, or one that points outside anything this queue ever issued, means "only
    /// messages that arrive from now on".
    fn start_id(st: &QueueState, after: Option<i64>) -> u64 {
        match after {
            Some(a) if a >= -1 && a < st.next_id as i64 => (a + 1) as u64,
            _ => st.next_id,
        }
    }

    /// Messages newer than `after`, waiting up to `wait` for some to arrive.
    ///
    /// Returns an empty list when the wait elapses.
    pub async fn get_new_messages(&self, after: Option<i64>, wait: Duration) -> Vec<WireMessage> {
        let deadline = Instant::now() + wait;
        let start = Self::start_id(&self.lock(), after);

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let found = self.lock().collect_from(start);
            if !found.is_empty() {
                return found;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }

    /// Drop messages older than the TTL. Returns the instant the next one expires.
    pub fn purge_expired(&self) -> Option<Instant> {
        let mut st = self.lock();
        let now = Instant::now();
        while st
            .entries
            .front()
            .is_some_and(|e| e.added + self.cfg.message_ttl <= now)
        {
            st.pop_oldest();
        }
        st.entries.front().map(|e| e.added + self.cfg.message_ttl)
    }

    /// Background expiry loop; runs until `cancel` fires.
    pub async fn run_expiry(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let next = self.purge_expired();
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.expiry_wake.notified(), if next.is_none() => {}
                _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {}
            }
        }
    }
}
