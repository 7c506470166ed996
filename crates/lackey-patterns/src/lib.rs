//! Declarative message-pattern language for the datalackey wire protocol.
//!
//! The daemon speaks newline-delimited JSON arrays. Callers describe the
//! response shapes they care about as nested mappings of action labels to
//! token patterns; this crate compiles those mappings into lookup tables,
//! binds them to a concrete correlation identifier, and finds the best
//! match for an incoming message. Exact patterns always win over wildcard
//! patterns; among wildcard candidates the one with the most matched
//! literal positions wins, then the one with the most one-wildcard
//! captures.

mod action;
mod compile;
mod errors;
mod matcher;

pub use action::ActionPath;
pub use compile::{PatternSet, PatternSetBuilder, PatternToken};
pub use errors::CompileError;
pub use matcher::BoundPatternSet;
