//! Client-side protocol engine for the datalackey data-storage daemon.
//!
//! The daemon is a long-running external process speaking newline-delimited
//! JSON arrays over duplex stdio. Token 0 of every message is either `null`
//! (an unsolicited notification) or the correlation identifier of a
//! previously issued command. [`LackeyClient`] owns the single reading
//! thread that frames, parses, and routes every inbound line: notifications
//! update the derived liveness maps (stored data, running processes,
//! spawned children), responses are matched against the pattern sets
//! registered for their in-flight command, and the blocked sender is woken
//! exactly when its command's response sequence completes.
//!
//! Pattern declaration and matching live in the `lackey-patterns` crate;
//! this crate adds the correlation table, the routing loop, the derived
//! state store, the synchronous send/wait surface, the `version` handshake,
//! and the process glue for launching the daemon.

mod engine;
mod errors;
mod framing;
mod internal;
mod process;
mod state;
mod tracker;

#[cfg(test)]
mod tests;

pub use engine::{EchoCallback, EngineHooks, LackeyClient, NotificationCallback, PatternAction};
pub use errors::{ClientError, SpawnError};
pub use framing::{DiscardReader, LineFramer, StoringReader};
pub use internal::{NotificationAction, ProtocolAction};
pub use process::{LackeyProcess, LaunchConfig, locate_executable};
pub use tracker::{ReactionCallback, Tracker};
