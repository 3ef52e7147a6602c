//! Fan subprocess output out to the caller's stream and the hub log.

use std::sync::Arc;

use bytes::Bytes;
use gpupgrade_core::idl::{ChunkTag, Message};
use gpupgrade_core::stream::MessageSender;
use gpupgrade_core::StreamError;
use gpupgrade_telemetry::LogSink;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::error::HubError;

const COPY_BUFFER_BYTES: usize = 8 * 1024;

/// Shared by every [`StreamWriter`] handed out for one operation.
///
/// If the outbound stream fails, forwarding to it stops and output keeps
/// flowing to the log, so a vanished caller cannot wedge a long-running
/// subprocess. The first stream failure is kept for [`stream_error`].
///
/// [`stream_error`]: StreamMultiplexer::stream_error
#[derive(Clone)]
pub struct StreamMultiplexer {
    stream: Arc<dyn MessageSender>,
    log: LogSink,
    stream_error: Arc<Mutex<Option<StreamError>>>,
}

impl StreamMultiplexer {
    pub fn new(stream: Arc<dyn MessageSender>, log: LogSink) -> Self {
        Self {
            stream,
            log,
            stream_error: Arc::new(Mutex::new(None)),
        }
    }

    /// A writer bound to `tag`. Take one per output channel; each writer
    /// preserves the order of its own writes.
    pub fn writer(&self, tag: ChunkTag) -> StreamWriter {
        StreamWriter {
            tag,
            mux: self.clone(),
        }
    }

    pub fn stream_error(&self) -> Option<StreamError> {
        self.stream_error.lock().clone()
    }

    fn detached(&self) -> bool {
        self.stream_error.lock().is_some()
    }

    fn detach(&self, error: StreamError) {
        let mut slot = self.stream_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

pub struct StreamWriter {
    tag: ChunkTag,
    mux: StreamMultiplexer,
}

impl StreamWriter {
    pub fn tag(&self) -> ChunkTag {
        self.tag
    }

    /// Log `data`, then send it as one chunk. No buffering.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), HubError> {
        if data.is_empty() {
            return Ok(());
        }

        self.mux
            .log
            .write_all(data)
            .map_err(|e| HubError::io(format!("write {} to hub log", self.tag), e))?;

        if self.mux.detached() {
            return Ok(());
        }

        let chunk = Message::chunk(self.tag, Bytes::copy_from_slice(data));
        if let Err(e) = self.mux.stream.send(chunk).await {
            warn!(tag = %self.tag, error = %e, "progress stream failed, continuing with hub log only");
            self.mux.detach(e);
        }
        Ok(())
    }

    /// Forward everything `reader` produces until EOF. Returns bytes copied.
    pub async fn copy_from<R>(&mut self, mut reader: R) -> Result<u64, HubError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; COPY_BUFFER_BYTES];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| HubError::io(format!("read subprocess {}", self.tag), e))?;
            if n == 0 {
                return Ok(total);
            }
            self.write(&buf[..n]).await?;
            total += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingStream;

    fn bytes_for(messages: &[Message], tag: ChunkTag) -> Vec<u8> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Chunk(c) if c.tag == tag => Some(c.data.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn per_tag_order_is_preserved() {
        let stream = Arc::new(RecordingStream::new());
        let (log, memory) = LogSink::memory();
        let mux = StreamMultiplexer::new(stream.clone(), log);

        let mut out = mux.writer(ChunkTag::Stdout);
        let mut err = mux.writer(ChunkTag::Stderr);

        out.write(b"A").await.unwrap();
        err.write(b"X").await.unwrap();
        err.write(b"Y").await.unwrap();
        out.write(b"B").await.unwrap();

        let messages = stream.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(bytes_for(&messages, ChunkTag::Stdout), b"AB");
        assert_eq!(bytes_for(&messages, ChunkTag::Stderr), b"XY");
        assert_eq!(memory.contents(), b"AXYB");
    }

    #[tokio::test]
    async fn concurrent_writers_keep_their_own_order() {
        let stream = Arc::new(RecordingStream::new());
        let (log, memory) = LogSink::memory();
        let mux = StreamMultiplexer::new(stream.clone(), log);

        let mut out = mux.writer(ChunkTag::Stdout);
        let mut err = mux.writer(ChunkTag::Stderr);

        let stdout = tokio::spawn(async move {
            for b in [b"A", b"B"] {
                out.write(b).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        let stderr = tokio::spawn(async move {
            for b in [b"X", b"Y"] {
                err.write(b).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        stdout.await.unwrap();
        stderr.await.unwrap();

        let messages = stream.messages();
        assert_eq!(bytes_for(&messages, ChunkTag::Stdout), b"AB");
        assert_eq!(bytes_for(&messages, ChunkTag::Stderr), b"XY");

        let logged = memory.contents();
        let pos = |b: u8| logged.iter().position(|&x| x == b).unwrap();
        assert!(pos(b'A') < pos(b'B'));
        assert!(pos(b'X') < pos(b'Y'));
    }

    #[tokio::test]
    async fn broken_stream_falls_back_to_log() {
        let stream = Arc::new(RecordingStream::failing_after(1));
        let (log, memory) = LogSink::memory();
        let mux = StreamMultiplexer::new(stream.clone(), log);
        let mut out = mux.writer(ChunkTag::Stdout);

        out.write(b"one ").await.unwrap();
        out.write(b"two ").await.unwrap();
        out.write(b"three").await.unwrap();

        assert_eq!(stream.messages().len(), 1);
        assert_eq!(memory.contents(), b"one two three");
        assert_eq!(mux.stream_error(), Some(StreamError::Closed));
    }

    #[tokio::test]
    async fn empty_writes_are_dropped() {
        let stream = Arc::new(RecordingStream::new());
        let mux = StreamMultiplexer::new(stream.clone(), LogSink::discard());
        mux.writer(ChunkTag::Stdout).write(b"").await.unwrap();
        assert!(stream.messages().is_empty());
    }

    #[tokio::test]
    async fn copy_from_forwards_until_eof() {
        let stream = Arc::new(RecordingStream::new());
        let (log, memory) = LogSink::memory();
        let mux = StreamMultiplexer::new(stream.clone(), log);

        let copied = mux
            .writer(ChunkTag::Stderr)
            .copy_from(&b"warning: low disk\n"[..])
            .await
            .unwrap();

        assert_eq!(copied, 18);
        assert_eq!(memory.contents(), b"warning: low disk\n");
        assert_eq!(bytes_for(&stream.messages(), ChunkTag::Stderr), b"warning: low disk\n");
    }
}
