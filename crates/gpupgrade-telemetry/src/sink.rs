use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// Local record of raw subprocess output. Cloning shares the underlying
/// writer; each `write_all` is flushed before the lock is released.
#[derive(Clone)]
pub struct LogSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn discard() -> Self {
        Self::new(io::sink())
    }

    /// An in-memory sink plus a handle to read back what was written.
    pub fn memory() -> (Self, MemoryLog) {
        let log = MemoryLog::default();
        (Self::new(log.clone()), log)
    }

    pub fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(data)?;
        writer.flush()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").finish_non_exhaustive()
    }
}

/// Shared in-memory buffer backing [`LogSink::memory`].
#[derive(Clone, Default)]
pub struct MemoryLog {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryLog {
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }
}

impl Write for MemoryLog {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_writer() {
        let (sink, log) = LogSink::memory();
        let other = sink.clone();
        sink.write_all(b"a").unwrap();
        other.write_all(b"b").unwrap();
        assert_eq!(log.contents(), b"ab");
    }

    #[test]
    fn discard_accepts_writes() {
        assert!(LogSink::discard().write_all(b"ignored").is_ok());
    }
}
