//! Delayed, sequenced cue playback.
//!
//! The player preempts itself, so back-to-back cues are spaced by the
//! duration the player reported for the previous one plus a small buffer.
//! Every delayed sequence lives in a slot; scheduling into an occupied slot
//! aborts the previous sequence, `enqueue` appends to it instead, and
//! `cancel_pending` aborts all of them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Cue, CuePlayer};

/// Recommended gap between the end of one cue and the start of the next.
pub const DEFAULT_SEQUENCE_BUFFER: Duration = Duration::from_millis(200);

/// Independent lanes of pending cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CueSlot {
    /// Rep count and its milestone follow-up. A newer rep replaces an older one.
    Rep,
    /// Phase transitions: start, set complete/rest, next set, get ready, resume.
    Transition,
}

/// Cues not yet played. `done` is set once the last cue's tail has elapsed.
struct Sequence {
    cues: VecDeque<Cue>,
    done: bool,
}

struct InFlight {
    handle: JoinHandle<()>,
    sequence: Arc<Mutex<Sequence>>,
}

pub struct CueScheduler {
    player: Arc<dyn CuePlayer>,
    buffer: Duration,
    in_flight: HashMap<CueSlot, InFlight>,
}

impl CueScheduler {
    pub fn new(player: Arc<dyn CuePlayer>, buffer: Duration) -> Self {
        Self {
            player,
            buffer,
            in_flight: HashMap::new(),
        }
    }

    /// Play `cue` right now. Returns how long it is expected to take.
    pub fn emit(&self, cue: Cue) -> Duration {
        play_now(self.player.as_ref(), cue)
    }

    /// Play `cues` back to back, the first after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&mut self, slot: CueSlot, delay: Duration, cues: Vec<Cue>) {
        if let Some(previous) = self.in_flight.remove(&slot) {
            previous.handle.abort();
        }

        let mut queue: VecDeque<Cue> = cues.into();
        let mut wait = delay;
        if delay.is_zero() {
            let Some(first) = queue.pop_front() else {
                return;
            };
            wait = self.emit(first) + self.buffer;
        }
        self.spawn(slot, wait, queue);
    }

    /// Play `cues` once the sequence in `slot` has finished, or now if the slot is idle.
    pub fn enqueue(&mut self, slot: CueSlot, cues: Vec<Cue>) {
        if let Some(in_flight) = self.in_flight.get(&slot) {
            let mut sequence = in_flight.sequence.lock();
            if !sequence.done {
                debug!(?slot, queued = cues.len(), "cues appended to playing sequence");
                sequence.cues.extend(cues);
                return;
            }
        }
        self.schedule(slot, Duration::ZERO, cues);
    }

    /// Abort every sequence that has not finished playing.
    pub fn cancel_pending(&mut self) {
        for (_, in_flight) in self.in_flight.drain() {
            in_flight.handle.abort();
        }
    }

    /// Abort pending sequences and silence the player.
    pub fn stop_all(&mut self) {
        self.cancel_pending();
        self.player.stop_all();
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.in_flight
            .values()
            .filter(|f| !f.handle.is_finished())
            .count()
    }

    fn spawn(&mut self, slot: CueSlot, first_wait: Duration, queue: VecDeque<Cue>) {
        let sequence = Arc::new(Mutex::new(Sequence {
            cues: queue,
            done: false,
        }));
        let shared = Arc::clone(&sequence);
        let player = Arc::clone(&self.player);
        let buffer = self.buffer;
        let handle = tokio::spawn(async move {
            let mut wait = first_wait;
            loop {
                tokio::time::sleep(wait).await;
                let next = {
                    let mut sequence = shared.lock();
                    let next = sequence.cues.pop_front();
                    sequence.done = next.is_none();
                    next
                };
                let Some(cue) = next else {
                    break;
                };
                wait = play_now(player.as_ref(), cue) + buffer;
            }
        });
        self.in_flight.insert(slot, InFlight { handle, sequence });
    }
}

fn play_now(player: &dyn CuePlayer, cue: Cue) -> Duration {
    let reported = player.play(&cue.id());
    if !reported.is_zero() {
        debug!(cue = %cue.id(), secs = reported.as_secs_f32(), "cue played");
        return reported;
    }
    player.speak(&cue);
    debug!(cue = %cue.id(), "no asset for cue, spoke fallback");
    cue.fallback_duration()
}
