//! Error types surfaced by the client engine.

use std::io;

use thiserror::Error;

/// Errors raised by [`crate::LackeyClient`] operations.
///
/// A command's eventual success or failure is never reported through
/// these variants; it travels on the returned [`crate::Tracker`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The outbound channel has been closed; no further commands can be
    /// written.
    #[error("outbound channel is closed")]
    OutboundClosed,

    /// A caller-supplied pattern declaration failed to compile.
    #[error("pattern compilation failed: {0}")]
    Compile(#[from] lackey_patterns::CompileError),

    /// Serializing an outbound command failed.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised while locating or launching the daemon process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The daemon executable was not found or is not executable.
    #[error("datalackey executable not found: {command}")]
    BinaryNotFound {
        /// The executable that was looked for.
        command: String,
    },

    /// Spawning the daemon process failed.
    #[error("failed to spawn datalackey: {message}")]
    SpawnFailed {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// In-memory storage excludes directory and permission options.
    #[error("cannot combine in-memory storage with directory or permissions")]
    MemoryWithDirectory,

    /// The requested storage directory does not exist.
    #[error("storage directory does not exist: {path}")]
    MissingDirectory {
        /// The directory that was requested.
        path: String,
    },

    /// The permissions cover is not one of the accepted modes.
    #[error("permissions not in {{600, 660, 666}}: {value}")]
    InvalidPermissions {
        /// The rejected permissions value.
        value: String,
    },
}
