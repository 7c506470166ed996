//! Error types for pattern-set compilation.

use thiserror::Error;

/// Errors raised while compiling a declarative action map.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The supplied list of action maps was empty.
    #[error("no action maps supplied")]
    EmptyInput,

    /// A top-level entry was not a JSON mapping.
    #[error("action map entry is not a mapping: {found}")]
    NotAMapping {
        /// Rendering of the offending entry.
        found: String,
    },

    /// An entry was neither a mapping, a pattern list, nor a pattern.
    #[error("entry is not a mapping, pattern list, or pattern: {found}")]
    InvalidEntry {
        /// Rendering of the offending entry.
        found: String,
    },

    /// A pattern appeared with no action label above it.
    #[error("pattern must sit under an action label: {pattern}")]
    PatternOutsideAction {
        /// Rendering of the offending pattern.
        pattern: String,
    },

    /// A pattern continued past its rest-wildcard.
    #[error("pattern continues after a rest-wildcard: {pattern}")]
    TokenAfterRest {
        /// Rendering of the offending pattern.
        pattern: String,
    },

    /// The maps walked cleanly but produced no patterns at all.
    #[error("no patterns compiled from the supplied maps")]
    NoPatterns,
}
