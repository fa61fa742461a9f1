use std::{collections::HashMap, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chatov_core::ports::{Scheduler, TimerEvent, TimerId};

/// Scheduler backed by tokio timers.
///
/// Fired timers are delivered as `(TimerId, TimerEvent)` on a channel; the receiver must
/// [`claim`](TokioScheduler::claim) each one before acting on it, which filters out events
/// that were already in flight when their timer got cancelled.
pub struct TokioScheduler {
    next: u64,
    tx: mpsc::UnboundedSender<(TimerId, TimerEvent)>,
    live: HashMap<TimerId, CancellationToken>,
}

impl TokioScheduler {
    pub fn new(tx: mpsc::UnboundedSender<(TimerId, TimerEvent)>) -> Self {
        Self {
            next: 0,
            tx,
            live: HashMap::new(),
        }
    }

    /// Take ownership of a fired timer. `false` if it was cancelled meanwhile.
    pub fn claim(&mut self, id: TimerId) -> bool {
        self.live.remove(&id).is_some()
    }

    pub fn pending(&self) -> usize {
        self.live.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerId {
        let id = TimerId(self.next);
        self.next += 1;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send((id, event));
                }
            }
        });

        self.live.insert(id, cancel);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(token) = self.live.remove(&id) {
            token.cancel();
        }
    }
}
