//! Bounded capture of build tool output.
//!
//! Build failures usually surface at the end of the output, so when the limit
//! is exceeded the oldest lines are dropped and the tail is kept.

use std::collections::VecDeque;

/// Line buffer holding at most `limit` bytes of output.
#[derive(Debug)]
pub struct DiagnosticBuffer {
    limit: usize,
    lines: VecDeque<String>,
    bytes: usize,
    truncated_bytes: usize,
}

impl DiagnosticBuffer {
    /// Creates a buffer retaining at most `limit` bytes (at least one byte).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            lines: VecDeque::new(),
            bytes: 0,
            truncated_bytes: 0,
        }
    }

    /// Appends one line, evicting from the front if over the limit.
    pub fn push_line(&mut self, line: impl Into<String>) {
        let mut line = line.into();

        // Each retained line costs its length plus a newline
        if line.len() + 1 > self.limit {
            let keep = self.limit - 1;
            let mut cut = line.len() - keep;
            while !line.is_char_boundary(cut) {
                cut += 1;
            }
            self.truncated_bytes += cut;
            line.drain(..cut);
        }

        self.bytes += line.len() + 1;
        self.lines.push_back(line);

        while self.bytes > self.limit {
            match self.lines.pop_front() {
                Some(evicted) => {
                    self.bytes -= evicted.len() + 1;
                    self.truncated_bytes += evicted.len() + 1;
                }
                None => break,
            }
        }
    }

    /// Bytes dropped so far
    pub fn truncated_bytes(&self) -> usize {
        self.truncated_bytes
    }

    /// Bytes currently retained
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Whether nothing has been retained
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Retained output, prefixed with a marker when output was dropped.
    pub fn into_text(self) -> String {
        let mut text = String::with_capacity(self.bytes + 64);
        if self.truncated_bytes > 0 {
            text.push_str(&format!(
                "[... {} bytes of earlier output truncated ...]\n",
                self.truncated_bytes
            ));
        }
        for line in self.lines {
            text.push_str(&line);
            text.push('\n');
        }
        text
    }
}

/// Splits a byte stream into lines of at most `max_len` bytes.
///
/// A line longer than `max_len` is handed over in `max_len` pieces, so output
/// without newlines never accumulates past that size.
#[derive(Debug)]
pub struct LineSplitter {
    max_len: usize,
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Creates a splitter emitting lines of at most `max_len` bytes (at least one).
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            pending: Vec::new(),
        }
    }

    /// Consumes `bytes`, returning every line completed by them.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        while !bytes.is_empty() {
            let room = self.max_len - self.pending.len();
            let window = &bytes[..bytes.len().min(room)];
            match window.iter().position(|&b| b == b'\n') {
                Some(end) => {
                    self.pending.extend_from_slice(&window[..end]);
                    lines.push(self.take());
                    bytes = &bytes[end + 1..];
                }
                None => {
                    self.pending.extend_from_slice(window);
                    bytes = &bytes[window.len()..];
                    if self.pending.len() >= self.max_len {
                        lines.push(self.take());
                    }
                }
            }
        }
        lines
    }

    /// Returns the unterminated last line, if any.
    pub fn finish(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| self.take())
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches('\r')
            .to_string();
        self.pending.clear();
        line
    }
}
