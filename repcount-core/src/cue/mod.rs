//! Audio cue taxonomy and the external cue player contract.
//!
//! The engine only decides *which* cue plays and *when*; what a cue sounds
//! like is up to the `CuePlayer` implementation. Each cue has a stable asset
//! id and a fallback duration used when the player has no recording for it
//! and has to synthesise speech instead.

pub mod scheduler;

pub use scheduler::CueScheduler;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Lower bound on how long a synthesised fallback cue is assumed to take.
pub const MIN_FALLBACK_DURATION: Duration = Duration::from_secs(1);

/// A spoken or played prompt tied to a session transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "cue", content = "value", rename_all = "camelCase")]
pub enum Cue {
    Start,
    /// Rep number just completed (1-based).
    Rep(u32),
    /// Played after the second-to-last rep.
    LastRep,
    TwoMore,
    /// Periodic encouragement every third rep.
    Motivation,
    SetComplete,
    /// Rest announcement with the configured rest length.
    Rest(u32),
    GetReady,
    NextSet,
    LastSet,
    Finish,
    Paused,
    Resume,
}

impl Cue {
    /// Asset id handed to the player.
    pub fn id(&self) -> String {
        match self {
            Cue::Start => "start".into(),
            Cue::Rep(n) => n.to_string(),
            Cue::LastRep => "before-last-one".into(),
            Cue::TwoMore => "two_more_reps".into(),
            Cue::Motivation => "lightweight".into(),
            Cue::SetComplete => "set_complete".into(),
            Cue::Rest(_) => "rest".into(),
            Cue::GetReady => "be_ready_next_set".into(),
            Cue::NextSet => "next_set".into(),
            Cue::LastSet => "last_set".into(),
            Cue::Finish => "finish".into(),
            Cue::Paused => "stop_workout_by_user".into(),
            Cue::Resume => "resume_workout".into(),
        }
    }

    /// Assumed duration of the synthesised-speech fallback.
    pub fn fallback_duration(&self) -> Duration {
        let secs = match self {
            Cue::Start | Cue::LastRep | Cue::Motivation | Cue::Rest(_) => 2.0,
            Cue::Resume | Cue::LastSet => 2.5,
            Cue::Paused | Cue::TwoMore | Cue::NextSet => 1.5,
            Cue::Rep(_) | Cue::GetReady => 1.0,
            Cue::SetComplete | Cue::Finish => 3.0,
        };
        Duration::from_secs_f64(secs).max(MIN_FALLBACK_DURATION)
    }
}

/// Secondary cue after a rep, by priority: last rep, two more, every third rep.
pub fn milestone_for(rep: u32, reps_remaining: u32) -> Option<Cue> {
    if reps_remaining == 1 {
        Some(Cue::LastRep)
    } else if reps_remaining == 2 {
        Some(Cue::TwoMore)
    } else if rep > 0 && rep % 3 == 0 {
        Some(Cue::Motivation)
    } else {
        None
    }
}

/// External audio-cue player.
///
/// The player has no queue: a new `play` preempts whatever is playing.
/// Implementations must return quickly; playback itself is asynchronous.
pub trait CuePlayer: Send + Sync + 'static {
    /// Start playing the asset for `cue_id`. Returns its length, or zero when
    /// no asset exists for that id.
    fn play(&self, cue_id: &str) -> Duration;

    /// Synthesised-speech fallback for a cue without an asset.
    fn speak(&self, cue: &Cue);

    /// Silence everything currently playing.
    fn stop_all(&self);
}

/// Player with no assets that only logs; every cue takes its fallback duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCuePlayer;

impl CuePlayer for LogCuePlayer {
    fn play(&self, _cue_id: &str) -> Duration {
        Duration::ZERO
    }

    fn speak(&self, cue: &Cue) {
        info!(cue = %cue.id(), "cue");
    }

    fn stop_all(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_rep_overrides_every_third() {
        // rep 9 of 10: divisible by three, but one rep remains.
        assert_eq!(milestone_for(9, 1), Some(Cue::LastRep));
    }

    #[test]
    fn two_more_overrides_every_third() {
        assert_eq!(milestone_for(6, 2), Some(Cue::TwoMore));
    }

    #[test]
    fn every_third_rep_gets_motivation() {
        assert_eq!(milestone_for(3, 7), Some(Cue::Motivation));
        assert_eq!(milestone_for(4, 6), None);
        assert_eq!(milestone_for(0, 10), None);
    }

    #[test]
    fn final_rep_still_gets_every_third_motivation() {
        assert_eq!(milestone_for(9, 0), Some(Cue::Motivation));
        assert_eq!(milestone_for(10, 0), None);
    }

    #[test]
    fn fallback_never_below_one_second() {
        for cue in [Cue::Rep(1), Cue::GetReady, Cue::Start, Cue::Finish] {
            assert!(cue.fallback_duration() >= MIN_FALLBACK_DURATION);
        }
    }

    #[test]
    fn rep_cue_id_is_the_number() {
        assert_eq!(Cue::Rep(7).id(), "7");
        assert_eq!(Cue::Rest(60).id(), "rest");
    }

    #[test]
    fn cue_serializes_adjacently_tagged() {
        let json = serde_json::to_value(Cue::Rep(3)).expect("serialize cue");
        assert_eq!(json["cue"], "rep");
        assert_eq!(json["value"], 3);
        let json = serde_json::to_value(Cue::GetReady).expect("serialize cue");
        assert_eq!(json["cue"], "getReady");
    }
}
