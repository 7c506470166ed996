//! Bookkeeping for in-flight commands.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use lackey_patterns::{ActionPath, BoundPatternSet};

use crate::internal::ProtocolAction;

/// Per-command reaction callback: receives the matched action, the raw
/// message, and the captured tokens; returns `true` once the action is
/// fully handled so later callbacks are skipped.
pub type ReactionCallback = Arc<dyn Fn(&ActionPath, &[Value], &[Value]) -> bool + Send + Sync>;

/// Canonical correlation-table key for an identifier token.
pub(crate) fn id_key(identifier: &Value) -> String {
    serde_json::to_string(identifier).unwrap_or_default()
}

/// Mutable outcome of one command, shared between the routing loop and
/// the tracker handed to the caller.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    /// The message that resolved the command.
    pub(crate) message: Option<Vec<Value>>,
    /// Terminal action list captured at resolution.
    pub(crate) terminal: Option<Vec<ActionPath>>,
    /// Success flag, computed once the waiter resumes. Stays unset for
    /// commands abandoned by stream closure.
    pub(crate) status: Option<bool>,
}

/// The caller's view of one issued command.
#[derive(Debug, Clone)]
pub struct Tracker {
    identifier: Value,
    command: String,
    outcome: Arc<Mutex<Outcome>>,
}

impl Tracker {
    pub(crate) fn new(identifier: Value, command: String, outcome: Arc<Mutex<Outcome>>) -> Self {
        Self {
            identifier,
            command,
            outcome,
        }
    }

    /// The correlation identifier assigned to the command.
    #[must_use]
    pub fn identifier(&self) -> &Value {
        &self.identifier
    }

    /// The serialized command line as written to the daemon.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// `Some(true)` on success, `Some(false)` on failure, `None` while
    /// unresolved or when the stream closed before resolution.
    #[must_use]
    pub fn succeeded(&self) -> Option<bool> {
        self.outcome
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .status
    }

    /// The terminal action list captured at resolution.
    #[must_use]
    pub fn terminal_actions(&self) -> Vec<ActionPath> {
        self.outcome
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .terminal
            .clone()
            .unwrap_or_default()
    }

    /// The message that resolved the command, if any.
    #[must_use]
    pub fn final_message(&self) -> Option<Vec<Value>> {
        self.outcome
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .message
            .clone()
    }

    /// Computes the success flag from the recorded terminal actions.
    /// A command is a failure iff any terminal action is error-class;
    /// unresolved commands stay unset.
    pub(crate) fn finalise_status(&self) {
        let mut outcome = self
            .outcome
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if outcome.message.is_some() {
            let failed = outcome
                .terminal
                .as_ref()
                .is_some_and(|paths| paths.iter().any(ActionPath::is_error_class));
            outcome.status = Some(!failed);
        }
    }
}

/// Everything the routing loop needs to route responses for one
/// in-flight command.
#[derive(Clone)]
pub(crate) struct PendingCommand {
    /// Caller's bound pattern set; `None` when the caller declined a
    /// reaction.
    pub(crate) caller: Option<BoundPatternSet<ActionPath>>,
    /// Caller reaction callbacks, shared immutable handles.
    pub(crate) reactions: Vec<ReactionCallback>,
    /// Internal pattern set bound to the same identifier.
    pub(crate) internal: BoundPatternSet<ProtocolAction>,
    /// Outcome cell shared with the caller's tracker.
    pub(crate) outcome: Arc<Mutex<Outcome>>,
}

/// Map of in-flight commands plus the single identifier currently being
/// awaited synchronously. Guarded by one mutex paired with the engine's
/// wake condition.
#[derive(Default)]
pub(crate) struct CorrelationTable {
    entries: HashMap<String, PendingCommand>,
    awaited: Option<Value>,
    stream_closed: bool,
}

impl CorrelationTable {
    pub(crate) fn insert(&mut self, identifier: &Value, entry: PendingCommand) {
        self.entries.insert(id_key(identifier), entry);
    }

    pub(crate) fn get(&self, identifier: &Value) -> Option<&PendingCommand> {
        self.entries.get(&id_key(identifier))
    }

    pub(crate) fn remove(&mut self, identifier: &Value) -> Option<PendingCommand> {
        self.entries.remove(&id_key(identifier))
    }

    pub(crate) fn set_awaited(&mut self, identifier: Value) {
        self.awaited = Some(identifier);
    }

    pub(crate) fn clear_awaited(&mut self) {
        self.awaited = None;
    }

    pub(crate) fn awaited(&self) -> Option<&Value> {
        self.awaited.as_ref()
    }

    pub(crate) fn is_awaited(&self, identifier: &Value) -> bool {
        self.awaited.as_ref() == Some(identifier)
    }

    pub(crate) fn mark_stream_closed(&mut self) {
        self.stream_closed = true;
    }

    pub(crate) fn stream_open(&self) -> bool {
        !self.stream_closed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
