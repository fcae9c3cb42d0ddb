//! Bounded in-memory copy of recent log output.
//!
//! Installed as an extra `tracing_subscriber::fmt` writer so `/status` can show
//! what the current run is doing.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Shared ring of log text, trimmed from the front at line boundaries.
#[derive(Debug, Clone)]
pub struct LogTail {
    buffer: Arc<Mutex<String>>,
    capacity: usize,
    display: usize,
}

impl LogTail {
    /// Keep up to `capacity` bytes and show the last `display` of them.
    #[must_use]
    pub fn new(capacity: usize, display: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(String::with_capacity(capacity))),
            capacity,
            display: display.clamp(1, capacity),
        }
    }

    /// Append text, dropping the oldest lines past capacity.
    pub fn push(&self, text: &str) {
        let mut buffer = self.buffer.lock();
        buffer.push_str(text);
        if buffer.len() > self.capacity {
            let start = ceil_char_boundary(&buffer, buffer.len() - self.capacity);
            let cut = buffer[start..].find('\n').map_or(start, |i| start + i + 1);
            buffer.drain(..cut);
        }
    }

    /// The most recent `display` bytes.
    #[must_use]
    pub fn tail(&self) -> String {
        let buffer = self.buffer.lock();
        let start = ceil_char_boundary(&buffer, buffer.len().saturating_sub(self.display));
        buffer[start..].to_string()
    }

    /// Everything currently kept.
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.buffer.lock().clone()
    }

    /// Forget all kept output.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(24_000, 12_000)
    }
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}

/// Writer handed out per event by [`LogTail`].
#[derive(Debug)]
pub struct LogTailWriter {
    tail: LogTail,
}

impl io::Write for LogTailWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tail.push(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogTail {
    type Writer = LogTailWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogTailWriter { tail: self.clone() }
    }
}
