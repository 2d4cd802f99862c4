//! Types serialised over the engine's public event bus.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so host
//! applications can forward them to a frontend or log them as JSON unchanged.

pub mod events;
