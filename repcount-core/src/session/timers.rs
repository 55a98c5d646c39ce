//! Cancelable delayed actions for the session controller.
//!
//! Each timer is a spawned `tokio::time::sleep` that posts a `TimerFired`
//! back into the controller mailbox. A timer message is only honoured while
//! its key still maps to the same generation: rescheduling a key or calling
//! `cancel_all` makes any message already in flight stale.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    ArmMonitor,
    EndOfSet,
    CountdownTick,
    ResumeCue,
    /// Finish cue has played; the session may be dismissed.
    CompletionSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: u64,
}

pub struct Timers {
    tx: mpsc::UnboundedSender<TimerFired>,
    next_generation: u64,
    pending: HashMap<TimerKey, (u64, JoinHandle<()>)>,
}

impl Timers {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Self {
            tx,
            next_generation: 0,
            pending: HashMap::new(),
        };
        (timers, rx)
    }

    /// Fire `key` after `delay`, replacing any pending timer with the same key.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(key);
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired { key, generation });
        });
        self.pending.insert(key, (generation, handle));
    }

    pub fn cancel(&mut self, key: TimerKey) {
        if let Some((_, handle)) = self.pending.remove(&key) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (key, (_, handle)) in self.pending.drain() {
            debug!(?key, "timer canceled");
            handle.abort();
        }
    }

    /// Claim a fired timer. `false` for a canceled or superseded one.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match self.pending.get(&fired.key) {
            Some((generation, _)) if *generation == fired.generation => {
                self.pending.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn is_scheduled(&self, key: TimerKey) -> bool {
        self.pending.contains_key(&key)
    }
}
