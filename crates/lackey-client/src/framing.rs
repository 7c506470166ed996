//! Line framing over a possibly fragmented byte stream.
//!
//! The daemon writes one JSON array per line. Reads deliver arbitrary
//! fragments, so the framer buffers partial lines across reads and yields
//! only complete newline-terminated segments. Empty segments (a newline
//! at the start of a fresh buffer) are skipped rather than reported.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::mem;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

/// Log target for framing operations.
const FRAMING_TARGET: &str = "lackey_client::framing";

/// Bytes requested per read.
const READ_CHUNK_BYTES: usize = 32 * 1024;

/// Assembles complete text lines from a byte source.
///
/// Iteration blocks until a full line is available and ends at
/// end-of-stream; read errors other than interrupts are treated as a
/// graceful stream end.
pub struct LineFramer<R> {
    source: R,
    chunk: Vec<u8>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    eof: bool,
}

impl<R: Read> LineFramer<R> {
    /// Wraps the byte source.
    #[must_use]
    pub fn new(source: R) -> Self {
        Self {
            source,
            chunk: vec![0; READ_CHUNK_BYTES],
            buffer: Vec::new(),
            pending: VecDeque::new(),
            eof: false,
        }
    }

    /// Returns the next complete line, or `None` at end of stream.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(line);
            }
            if self.eof {
                return None;
            }
            self.fill();
        }
    }

    /// Reads one chunk, queueing any complete segments it finishes.
    fn fill(&mut self) {
        let read = loop {
            match self.source.read(&mut self.chunk) {
                Ok(count) => break count,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    // Close from another thread surfaces as an error here.
                    debug!(
                        target: FRAMING_TARGET,
                        error = %error,
                        "treating read failure as end of stream"
                    );
                    self.eof = true;
                    return;
                }
            }
        };
        if read == 0 {
            self.eof = true;
            return;
        }

        self.buffer.extend_from_slice(self.chunk.get(..read).unwrap_or(&[]));
        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut segment: Vec<u8> = self.buffer.drain(..=position).collect();
            segment.pop();
            if !segment.is_empty() {
                self.pending
                    .push_back(String::from_utf8_lossy(&segment).into_owned());
            }
        }
    }
}

impl<R: Read> Iterator for LineFramer<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.next_line()
    }
}

/// Collects complete lines from a side channel on a background thread.
///
/// Used for daemon stderr: the thread drains the channel continuously so
/// the child process never blocks on a full pipe, and callers retrieve
/// whatever has accumulated with [`StoringReader::take_lines`]. The
/// thread exits when the source reaches end of stream.
pub struct StoringReader {
    lines: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl StoringReader {
    /// Starts draining the source.
    #[must_use]
    pub fn new<R>(source: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let handle = thread::spawn(move || {
            for line in LineFramer::new(source) {
                let mut collected = sink.lock().unwrap_or_else(|poison| poison.into_inner());
                collected.push(line);
            }
        });
        Self {
            lines,
            handle: Some(handle),
        }
    }

    /// Takes every line collected so far, leaving the store empty.
    #[must_use]
    pub fn take_lines(&self) -> Vec<String> {
        let mut collected = self
            .lines
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        mem::take(&mut *collected)
    }

    /// Waits for the draining thread to finish. Blocks until the source
    /// reaches end of stream, so close the source first.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Drains and discards a side channel on a background thread.
pub struct DiscardReader {
    handle: Option<JoinHandle<()>>,
}

impl DiscardReader {
    /// Starts draining the source.
    #[must_use]
    pub fn new<R>(mut source: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let handle = thread::spawn(move || {
            let mut chunk = vec![0; READ_CHUNK_BYTES];
            loop {
                match source.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Waits for the draining thread to finish. Blocks until the source
    /// reaches end of stream, so close the source first.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};

    use rstest::rstest;

    use super::{LineFramer, StoringReader};

    /// Yields the input one predefined fragment per read call.
    struct FragmentedReader {
        fragments: Vec<Vec<u8>>,
    }

    impl FragmentedReader {
        fn new(fragments: &[&[u8]]) -> Self {
            let mut fragments: Vec<Vec<u8>> = fragments.iter().map(|f| f.to_vec()).collect();
            fragments.reverse();
            Self { fragments }
        }
    }

    impl Read for FragmentedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.fragments.pop() {
                Some(fragment) => {
                    let len = fragment.len().min(buf.len());
                    buf[..len].copy_from_slice(&fragment[..len]);
                    Ok(len)
                }
                None => Ok(0),
            }
        }
    }

    #[rstest]
    fn yields_complete_lines() {
        let framer = LineFramer::new(Cursor::new(b"first\nsecond\n".to_vec()));
        let lines: Vec<String> = framer.collect();
        assert_eq!(lines, vec!["first".to_owned(), "second".to_owned()]);
    }

    #[rstest]
    fn assembles_lines_split_across_reads() {
        let reader = FragmentedReader::new(&[b"[null,\"da", b"ta\",\"stored\"]\n[3,", b"\"done\",\"\"]\n"]);
        let lines: Vec<String> = LineFramer::new(reader).collect();
        assert_eq!(
            lines,
            vec![
                "[null,\"data\",\"stored\"]".to_owned(),
                "[3,\"done\",\"\"]".to_owned(),
            ]
        );
    }

    #[rstest]
    fn skips_empty_segments() {
        let framer = LineFramer::new(Cursor::new(b"\n\nline\n\n".to_vec()));
        let lines: Vec<String> = framer.collect();
        assert_eq!(lines, vec!["line".to_owned()]);
    }

    #[rstest]
    fn drops_trailing_partial_line_at_end_of_stream() {
        let framer = LineFramer::new(Cursor::new(b"complete\npartial".to_vec()));
        let lines: Vec<String> = framer.collect();
        assert_eq!(lines, vec!["complete".to_owned()]);
    }

    #[rstest]
    fn storing_reader_collects_lines_until_stream_end() {
        let reader = StoringReader::new(Cursor::new(b"warning: one\nwarning: two\n".to_vec()));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut collected = Vec::new();
        while std::time::Instant::now() < deadline {
            collected.extend(reader.take_lines());
            if collected.len() >= 2 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        reader.join();
        assert_eq!(
            collected,
            vec!["warning: one".to_owned(), "warning: two".to_owned()]
        );
    }
}
