use thiserror::Error;

use crate::session::SessionPhase;

/// All errors produced by repcount-core.
#[derive(Debug, Error)]
pub enum RepCountError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("invalid workout config: {0}")]
    InvalidConfig(String),

    #[error("cannot {op} while {phase:?}")]
    InvalidTransition {
        op: &'static str,
        phase: SessionPhase,
    },

    #[error("malformed session snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("snapshot store error: {0}")]
    Store(String),

    #[error("session controller has shut down")]
    ControllerClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RepCountError>;
