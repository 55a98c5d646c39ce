//! Serialisable types pushed from the engine to the host UI.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever bridge it uses.

pub mod events;
