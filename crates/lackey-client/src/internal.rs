//! Fixed pattern tables for the protocol's own structural markers.
//!
//! These are compiled once per process and shared read-only across
//! connections: the notification table is bound to the `null` identifier
//! up front, the generic table stays a template bound per in-flight
//! command.

use once_cell::sync::Lazy;
use serde_json::Value;

use lackey_patterns::{BoundPatternSet, PatternSet, PatternSetBuilder, PatternToken};

/// Structural meaning of an unsolicited notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    /// A named data item was stored under a new sequence id.
    Stored,
    /// A named data item was deleted.
    Deleted,
    /// Storing a named data item failed.
    DataError,
    /// A named process started running.
    Started,
    /// A named process stopped running.
    Ended,
    /// The daemon rejected a command identifier it could not resolve.
    BadIdentifier,
    /// The daemon could not parse an inbound line at all.
    BadFormat,
}

/// Structural meaning of a response message, independent of caller
/// intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAction {
    /// The command's response sequence is complete.
    Done,
    /// The command spawned a child process.
    Child,
    /// The daemon rejected the command's syntax.
    SyntaxError,
}

fn lit(token: &str) -> PatternToken {
    PatternToken::Literal(Value::String(token.to_owned()))
}

/// Notification patterns, bound to the `null` identifier. Disjoint by
/// construction: at most one action matches any message.
pub(crate) static NOTIFICATIONS: Lazy<BoundPatternSet<NotificationAction>> = Lazy::new(|| {
    PatternSetBuilder::new()
        .entry(
            NotificationAction::Stored,
            [lit("data"), lit("stored"), PatternToken::One, PatternToken::One],
        )
        .entry(
            NotificationAction::Deleted,
            [lit("data"), lit("deleted"), PatternToken::One, PatternToken::One],
        )
        .entry(
            NotificationAction::DataError,
            [lit("data"), lit("error"), PatternToken::One, PatternToken::One],
        )
        .entry(
            NotificationAction::Started,
            [lit("process"), lit("started"), PatternToken::One, PatternToken::One],
        )
        .entry(
            NotificationAction::Ended,
            [lit("process"), lit("ended"), PatternToken::One, PatternToken::One],
        )
        .entry(
            NotificationAction::BadIdentifier,
            [lit("error"), lit("identifier"), PatternToken::One],
        )
        .entry(NotificationAction::BadFormat, [lit("error"), lit("format")])
        .build()
        .bind(&Value::Null)
});

/// Generic response patterns, bound to each command's identifier at
/// send time.
pub(crate) static PROTOCOL: Lazy<PatternSet<ProtocolAction>> = Lazy::new(|| {
    let generic_error_heads = [
        "missing",
        "not-string",
        "not-string-null",
        "pairless",
        "unexpected",
        "unknown",
    ];
    let command_error_heads = ["missing", "not-string", "unknown"];

    let mut builder = PatternSetBuilder::new()
        .entry(ProtocolAction::Done, [lit("done"), lit("")])
        .entry(
            ProtocolAction::Child,
            [lit("run"), lit("running"), PatternToken::One],
        );
    for head in generic_error_heads {
        builder = builder.entry(
            ProtocolAction::SyntaxError,
            [lit("error"), lit(head), PatternToken::Rest],
        );
    }
    for head in command_error_heads {
        builder = builder.entry(
            ProtocolAction::SyntaxError,
            [lit("error"), lit("command"), lit(head), PatternToken::One],
        );
    }
    builder.build()
});
