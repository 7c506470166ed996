//! Scripted daemon utilities for engine tests.
//!
//! Each test spawns a [`FakeDaemon`] with a serve closure that plays the
//! daemon's side of the conversation over a loopback TCP stream. Closures
//! must return after their last write; the dropped stream ends the
//! client's inbound stream.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use serde_json::{Value, json};

use crate::{EngineHooks, LackeyClient};

/// A scripted daemon accepting a single connection.
pub(in crate::tests) struct FakeDaemon {
    port: u16,
    handle: Option<thread::JoinHandle<()>>,
}

impl FakeDaemon {
    pub(in crate::tests) fn spawn<F>(serve: F) -> Self
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind fake daemon");
        let port = listener.local_addr().expect("local addr").port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept connection");
            serve(stream);
        });
        Self {
            port,
            handle: Some(handle),
        }
    }

    pub(in crate::tests) fn port(&self) -> u16 {
        self.port
    }

    pub(in crate::tests) fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("fake daemon panicked");
        }
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Connects an engine to the scripted daemon.
pub(in crate::tests) fn connect_client(port: u16, hooks: EngineHooks) -> LackeyClient {
    let writer = TcpStream::connect(("127.0.0.1", port)).expect("connect to fake daemon");
    let reader = writer.try_clone().expect("clone stream");
    LackeyClient::connect(writer, reader, hooks).expect("engine handshake")
}

/// Reads one newline-delimited message; `None` at end of stream.
pub(in crate::tests) fn read_message(reader: &mut BufReader<TcpStream>) -> Option<Vec<Value>> {
    let mut line = String::new();
    if reader.read_line(&mut line).expect("read line") == 0 {
        return None;
    }
    match serde_json::from_str(&line).expect("parse message") {
        Value::Array(tokens) => Some(tokens),
        other => panic!("message is not an array: {other}"),
    }
}

/// Writes one message followed by a newline and flushes.
pub(in crate::tests) fn write_message(stream: &mut TcpStream, message: &Value) {
    let line = message.to_string();
    stream.write_all(line.as_bytes()).expect("write message");
    stream.write_all(b"\n").expect("write newline");
    stream.flush().expect("flush message");
}

/// Plays the daemon's side of the `version` handshake.
pub(in crate::tests) fn answer_handshake(reader: &mut BufReader<TcpStream>, writer: &mut TcpStream) {
    let message = read_message(reader).expect("handshake command");
    assert_eq!(message.get(1), Some(&json!("version")));
    let id = message.first().cloned().unwrap_or(Value::Null);
    write_message(
        writer,
        &json!([id, "version", "", {"commands": {"load": {}}, "datalackey": 1, "interface": 2}]),
    );
    write_message(writer, &json!([id, "done", ""]));
}
