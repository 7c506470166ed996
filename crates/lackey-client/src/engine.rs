//! The protocol engine: routing loop, correlation, and synchronous send.
//!
//! Exactly one background thread owns the inbound stream. It frames
//! lines, parses each into a message, routes notifications into the
//! derived state store, routes responses to their in-flight command, and
//! wakes the blocked sender when a terminal action fires. All shared
//! state is mutated on that thread; foreground callers only read
//! snapshots and block on the wake condition.
//!
//! The engine tracks a single awaited identifier at a time, so callers
//! must serialize their synchronous sends relative to each other.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serde_json::{Value, json};
use tracing::{debug, warn};

use lackey_patterns::{ActionPath, PatternSet};

use crate::errors::ClientError;
use crate::framing::LineFramer;
use crate::internal::{NOTIFICATIONS, NotificationAction, PROTOCOL, ProtocolAction};
use crate::state::DerivedState;
use crate::tracker::{CorrelationTable, Outcome, PendingCommand, ReactionCallback, Tracker};

/// Log target for engine operations.
const ENGINE_TARGET: &str = "lackey_client::engine";

/// Callback invoked for each actionable notification, after the derived
/// state mutation it reports.
pub type NotificationCallback = Arc<dyn Fn(NotificationAction, &[Value], &[Value]) + Send + Sync>;

/// Callback echoing one line of raw traffic, for diagnostics.
pub type EchoCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional observation hooks wired in at connect time.
#[derive(Clone, Default)]
pub struct EngineHooks {
    /// Invoked for actionable notifications.
    pub notification: Option<NotificationCallback>,
    /// Echoes every line written to the daemon.
    pub outbound_echo: Option<EchoCallback>,
    /// Echoes every line read from the daemon.
    pub inbound_echo: Option<EchoCallback>,
}

/// A compiled caller pattern set plus its reaction callbacks.
///
/// Cloning is a cheap structural copy; the callbacks are shared
/// immutable handles, never cloned themselves.
#[derive(Clone)]
pub struct PatternAction {
    set: Arc<PatternSet<ActionPath>>,
    reactions: Vec<ReactionCallback>,
}

impl PatternAction {
    /// Compiles the declarative action maps and attaches the reaction
    /// callbacks.
    ///
    /// # Errors
    ///
    /// Propagates any [`lackey_patterns::CompileError`].
    pub fn compile(
        maps: &[Value],
        reactions: Vec<ReactionCallback>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            set: Arc::new(PatternSet::compile(maps)?),
            reactions,
        })
    }
}

struct WriterState {
    /// `None` once the outbound side is closed; dropping the sink closes
    /// the daemon's stdin.
    sink: Option<Box<dyn Write + Send>>,
    echo: Option<EchoCallback>,
}

#[derive(Default)]
struct HandshakeState {
    syntax: Option<Value>,
    version: HashMap<String, i64>,
}

struct Shared {
    writer: Mutex<WriterState>,
    table: Mutex<CorrelationTable>,
    wake: Condvar,
    state: Mutex<DerivedState>,
    handshake: Mutex<HandshakeState>,
    next_identifier: AtomicI64,
    stream_done: AtomicBool,
}

impl Shared {
    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_table(&self) -> MutexGuard<'_, CorrelationTable> {
        self.table.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, DerivedState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Writes raw bytes under the writer lock, swallowing failures: a
    /// lost write because the daemon exited is an expected failure mode.
    fn write_raw(&self, bytes: &[u8], echo_line: Option<&str>) {
        let mut writer = self.lock_writer();
        let Some(sink) = writer.sink.as_mut() else {
            return;
        };
        let result = sink
            .write_all(bytes)
            .and_then(|()| sink.flush());
        match result {
            Ok(()) => {
                if let (Some(echo), Some(line)) = (&writer.echo, echo_line) {
                    echo(line);
                }
            }
            Err(error) => {
                warn!(
                    target: ENGINE_TARGET,
                    error = %error,
                    "write to daemon failed"
                );
            }
        }
    }
}

/// The client engine. See the crate docs for the protocol model.
pub struct LackeyClient {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl LackeyClient {
    /// Wires the engine over an open duplex channel and performs the
    /// `version` handshake before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::OutboundClosed`] when the handshake command
    /// cannot be written, or a compile error from the handshake pattern.
    pub fn connect<W, R>(writer: W, reader: R, hooks: EngineHooks) -> Result<Self, ClientError>
    where
        W: Write + Send + 'static,
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(WriterState {
                sink: Some(Box::new(writer)),
                echo: hooks.outbound_echo.clone(),
            }),
            table: Mutex::new(CorrelationTable::default()),
            wake: Condvar::new(),
            state: Mutex::new(DerivedState::default()),
            handshake: Mutex::new(HandshakeState::default()),
            next_identifier: AtomicI64::new(0),
            stream_done: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let notification = hooks.notification.clone();
        let inbound_echo = hooks.inbound_echo.clone();
        let handle = thread::spawn(move || {
            run_routing_loop(&loop_shared, reader, notification.as_ref(), inbound_echo.as_ref());
        });

        let client = Self {
            shared,
            reader: Mutex::new(Some(handle)),
        };
        client.handshake()?;
        Ok(client)
    }

    /// Issues the fixed `version` command and captures the daemon's
    /// command-syntax object and integer-valued version fields.
    fn handshake(&self) -> Result<(), ClientError> {
        let shared = Arc::clone(&self.shared);
        let capture: ReactionCallback = Arc::new(move |action, _message, captures| {
            if action.head() != "version" {
                return false;
            }
            let Some(info) = captures.first().and_then(Value::as_object) else {
                return false;
            };
            let mut handshake = shared
                .handshake
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            handshake.syntax = info.get("commands").cloned();
            handshake.version = info
                .iter()
                .filter_map(|(field, value)| value.as_i64().map(|n| (field.clone(), n)))
                .collect();
            true
        });
        let pattern = PatternAction::compile(
            &[json!({"version": ["version", "", "?"]})],
            vec![capture],
        )?;
        self.send(Some(&pattern), vec![json!("version")], false)?;
        Ok(())
    }

    /// Sends one command and blocks until its response sequence
    /// completes.
    ///
    /// Without `user_identifier` the next monotonic integer identifier is
    /// prepended to the command tokens; with it, token 0 is used as-is. A
    /// `null` identifier means no responses are expected and the call
    /// returns immediately. Pass `None` for the pattern action when no
    /// reaction is wanted; internal protocol bookkeeping still applies.
    ///
    /// The command's success or failure is reported only through the
    /// returned tracker; a tracker left unresolved by stream closure is
    /// an abandoned command.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::OutboundClosed`] when the outbound channel
    /// is already closed.
    pub fn send(
        &self,
        pattern: Option<&PatternAction>,
        mut command: Vec<Value>,
        user_identifier: bool,
    ) -> Result<Tracker, ClientError> {
        if self.shared.lock_writer().sink.is_none() {
            return Err(ClientError::OutboundClosed);
        }

        let identifier = if user_identifier {
            command.first().cloned().unwrap_or(Value::Null)
        } else {
            let next = self.shared.next_identifier.fetch_add(1, Ordering::SeqCst);
            command.insert(0, json!(next));
            json!(next)
        };

        let line = serde_json::to_string(&command)?;
        let outcome = Arc::new(Mutex::new(Outcome::default()));
        let tracker = Tracker::new(identifier.clone(), line.clone(), Arc::clone(&outcome));

        if !identifier.is_null() {
            let entry = PendingCommand {
                caller: pattern.map(|action| action.set.bind(&identifier)),
                reactions: pattern.map(|action| action.reactions.clone()).unwrap_or_default(),
                internal: PROTOCOL.bind(&identifier),
                outcome,
            };
            let mut table = self.shared.lock_table();
            table.insert(&identifier, entry);
            table.set_awaited(identifier.clone());
        }

        debug!(target: ENGINE_TARGET, command = %line, "sending command");
        let mut bytes = line.clone().into_bytes();
        bytes.push(b'\n');
        self.shared.write_raw(&bytes, Some(&line));

        if identifier.is_null() {
            return Ok(tracker);
        }

        let mut table = self.shared.lock_table();
        while table.is_awaited(&identifier) && table.stream_open() {
            table = self
                .shared
                .wake
                .wait(table)
                .unwrap_or_else(|poison| poison.into_inner());
        }
        drop(table);

        tracker.finalise_status();
        Ok(tracker)
    }

    /// Snapshot of the data freshness map: name to highest stored
    /// sequence id.
    #[must_use]
    pub fn data(&self) -> HashMap<String, i64> {
        self.shared.lock_state().data_snapshot()
    }

    /// Snapshot of the running process map: name to instance id.
    #[must_use]
    pub fn processes(&self) -> HashMap<String, Value> {
        self.shared.lock_state().process_snapshot()
    }

    /// Snapshot of the spawned children map: parent identifier to child
    /// id.
    #[must_use]
    pub fn children(&self) -> HashMap<String, Value> {
        self.shared.lock_state().children_snapshot()
    }

    /// The daemon's command-syntax object, once the handshake resolved.
    #[must_use]
    pub fn syntax(&self) -> Option<Value> {
        self.shared
            .handshake
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .syntax
            .clone()
    }

    /// The integer-valued fields of the daemon's version descriptor.
    #[must_use]
    pub fn version(&self) -> HashMap<String, i64> {
        self.shared
            .handshake
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .version
            .clone()
    }

    /// `None` until the handshake resolves, `Some(true)` thereafter.
    #[must_use]
    pub fn verify(&self, _command: &[Value]) -> Option<bool> {
        self.syntax().map(|_| true)
    }

    /// Whether the inbound stream has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.stream_done.load(Ordering::SeqCst)
    }

    /// Shuts the outbound side. Subsequent sends fail immediately; an
    /// in-flight wait is only released by the inbound stream closing.
    pub fn close(&self) {
        let mut writer = self.shared.lock_writer();
        writer.sink = None;
    }

    /// Blocks until the routing loop has drained the inbound stream and
    /// exited.
    pub fn await_shutdown(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for LackeyClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// The single logical reader: frames lines, parses, classifies, routes.
/// Messages are processed strictly in arrival order; a malformed line
/// never aborts the loop.
fn run_routing_loop<R: Read>(
    shared: &Shared,
    source: R,
    notification: Option<&NotificationCallback>,
    inbound_echo: Option<&EchoCallback>,
) {
    for line in LineFramer::new(source) {
        if let Some(echo) = inbound_echo {
            echo(&line);
        }
        let message = match serde_json::from_str::<Value>(&line) {
            Ok(Value::Array(tokens)) => tokens,
            Ok(_) | Err(_) => {
                warn!(target: ENGINE_TARGET, line = %line, "skipping unparsable line");
                continue;
            }
        };
        if message.is_empty() {
            continue;
        }
        if matches!(message.first(), Some(Value::Null)) {
            handle_notification(shared, &message, notification);
        } else {
            handle_response(shared, &message);
        }
    }

    shared.stream_done.store(true, Ordering::SeqCst);
    shared.lock_table().mark_stream_closed();
    // Unconditional wake so no sender blocks past stream end.
    shared.wake.notify_all();
    debug!(target: ENGINE_TARGET, "routing loop drained");
}

/// Applies one notification to the derived state and reports it to the
/// notification hook when actionable.
fn handle_notification(
    shared: &Shared,
    message: &[Value],
    notification: Option<&NotificationCallback>,
) {
    let Some((actions, captures)) = NOTIFICATIONS.best_match(message) else {
        return;
    };
    // Notification patterns are disjoint: at most one action matches.
    let Some(action) = actions.first().copied() else {
        return;
    };
    let name = captures.first().cloned().unwrap_or(Value::Null);
    let id = captures.last().cloned().unwrap_or(Value::Null);

    let actionable = match action {
        NotificationAction::Stored => shared.lock_state().record_stored(&name, &id),
        NotificationAction::Deleted => shared.lock_state().record_deleted(&name, &id),
        NotificationAction::DataError => shared.lock_state().record_data_error(&name, &id),
        NotificationAction::Started => shared.lock_state().record_started(&name, &id),
        NotificationAction::Ended => shared.lock_state().record_ended(&name, &id),
        NotificationAction::BadFormat => {
            // Daemon-specific resynchronization signal.
            shared.write_raw(&[0], None);
            true
        }
        NotificationAction::BadIdentifier => {
            force_retire_awaited(shared, message);
            true
        }
    };

    if actionable {
        if let Some(callback) = notification {
            callback(action, message, &captures);
        }
    }
}

/// Retires the awaited command when the daemon reports an identifier it
/// could not resolve and the awaited identifier is indeed malformed
/// (neither an integer nor a string). Without this the sender would hang
/// forever on a command the daemon has already rejected.
fn force_retire_awaited(shared: &Shared, message: &[Value]) {
    let mut table = shared.lock_table();
    let Some(awaited) = table.awaited().cloned() else {
        return;
    };
    if awaited.as_i64().is_some() || awaited.is_string() {
        return;
    }
    if let Some(entry) = table.remove(&awaited) {
        let mut outcome = entry
            .outcome
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        outcome.message = Some(message.to_vec());
        outcome.terminal = Some(vec![ActionPath::new(["error", "identifier"])]);
    }
    table.clear_awaited();
    drop(table);
    warn!(target: ENGINE_TARGET, "retired awaited command on identifier rejection");
    shared.wake.notify_all();
}

/// Routes one response to its in-flight command: caller reactions first,
/// then the internal protocol bookkeeping, then the terminal wake-up.
fn handle_response(shared: &Shared, message: &[Value]) {
    let identifier = message.first().cloned().unwrap_or(Value::Null);
    let (entry, awaited) = {
        let table = shared.lock_table();
        let Some(entry) = table.get(&identifier) else {
            // No tracker, no interest.
            return;
        };
        (entry.clone(), table.is_awaited(&identifier))
    };

    let mut finish = false;
    let mut terminal: Option<Vec<ActionPath>> = None;

    if let Some(caller) = &entry.caller {
        if let Some((actions, captures)) = caller.best_match(message) {
            for action in actions {
                for reaction in &entry.reactions {
                    if reaction(action, message, &captures) {
                        break;
                    }
                }
                if !awaited {
                    continue;
                }
                if action.is_return_class() {
                    finish = true;
                    if terminal.is_none() {
                        terminal = Some(actions.to_vec());
                    }
                } else if action.is_error_class() {
                    // An error overrides a previously recorded success.
                    finish = true;
                    terminal = Some(actions.to_vec());
                }
            }
        }
    }

    if let Some((actions, captures)) = entry.internal.best_match(message) {
        // Internal patterns are unique per key: one action applies.
        if let Some(action) = actions.first().copied() {
            match action {
                ProtocolAction::Child => {
                    let child = captures.first().cloned().unwrap_or(Value::Null);
                    shared.lock_state().record_child(&identifier, &child);
                }
                ProtocolAction::Done if awaited => {
                    finish = true;
                    shared.lock_table().remove(&identifier);
                }
                ProtocolAction::SyntaxError if awaited => {
                    finish = true;
                    terminal = Some(vec![ActionPath::new(["error", "syntax"])]);
                }
                ProtocolAction::Done | ProtocolAction::SyntaxError => {}
            }
        }
    }

    if finish {
        {
            let mut outcome = entry
                .outcome
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            outcome.message = Some(message.to_vec());
            outcome.terminal = terminal;
        }
        shared.lock_table().clear_awaited();
        shared.wake.notify_all();
    }
}
