// ABOUTME: Log multiplexer that relabels framed container output onto a shared sink
// ABOUTME: One worker task consumes successive log generations in arrival order

use crate::stream::ByteReader;
use crate::{EngineError, Result};
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Bytes in each frame header
pub const FRAME_HEADER_LEN: usize = 8;

/// Build one wire frame: stream type byte, three unused bytes, big-endian length, payload
pub fn encode_frame(stream_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&[stream_type, 0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Shared destination for labeled log output
///
/// Cloning shares the underlying writer. Each frame is written while holding
/// the lock, so a label is always followed by its own payload.
#[derive(Clone)]
pub struct LogSink {
    writer: Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl LogSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Sink backed by memory, with a handle for reading back what was written
    pub fn buffer() -> (Self, LogBuffer) {
        let buffer = LogBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Write a complete message to the sink
    pub async fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn forward_frame<R>(&self, label: &[u8], source: &mut R, length: u64) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut writer = self.writer.lock().await;
        writer.write_all(label).await?;
        let copied = tokio::io::copy(&mut (&mut *source).take(length), &mut *writer).await?;
        writer.flush().await?;
        if copied != length {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("frame truncated after {} of {} bytes", copied, length),
            ));
        }
        Ok(())
    }
}

/// In-memory log destination
#[derive(Clone, Default)]
pub struct LogBuffer {
    data: Arc<StdMutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().map(|data| data.clone()).unwrap_or_default()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl AsyncWrite for LogBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.data.lock() {
            Ok(mut data) => {
                data.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(std::io::Error::other("log buffer poisoned"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// One attached log connection, bounded by a (re)start
pub struct LogGeneration {
    reader: ByteReader,
    closed: CancellationToken,
}

impl LogGeneration {
    /// Wrap a framed log reader. Cancelling `closed` ends the generation even
    /// while the worker is blocked reading it.
    pub fn new(reader: ByteReader, closed: CancellationToken) -> Self {
        Self { reader, closed }
    }
}

/// Handle to the multiplexer worker
///
/// Generations pushed here are drained one at a time, in order. Dropping the
/// queue or calling [`LogQueue::close`] closes the channel and lets the worker
/// finish once its current generation ends.
pub struct LogQueue {
    sender: mpsc::Sender<LogGeneration>,
    worker: JoinHandle<()>,
}

impl LogQueue {
    /// Spawn the worker writing `label` + payload for every frame to `sink`
    pub fn spawn(sink: LogSink, label: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        let worker = tokio::spawn(multiplex(receiver, sink, label.into()));
        Self { sender, worker }
    }

    /// Hand the next generation to the worker
    pub async fn push(&self, generation: LogGeneration) -> Result<()> {
        self.sender
            .send(generation)
            .await
            .map_err(|_| EngineError::LogStreamClosed)
    }

    /// Close the channel and wait up to `drain` for the worker to finish
    ///
    /// Returns false when the worker was still busy at the deadline; it keeps
    /// running until its generation is closed.
    pub async fn close(self, drain: Duration) -> bool {
        drop(self.sender);
        match tokio::time::timeout(drain, self.worker).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Log multiplexer task failed: {}", e);
                true
            }
            Err(_) => false,
        }
    }
}

async fn multiplex(mut receiver: mpsc::Receiver<LogGeneration>, sink: LogSink, label: String) {
    let mut generation_number = 0u64;
    while let Some(LogGeneration { mut reader, closed }) = receiver.recv().await {
        debug!("Forwarding log generation {}", generation_number);
        tokio::select! {
            _ = closed.cancelled() => {
                trace!("Log generation {} closed by owner", generation_number);
            }
            result = forward_generation(&mut reader, &sink, label.as_bytes()) => {
                if let Err(e) = result {
                    trace!("Log generation {} ended: {}", generation_number, e);
                }
            }
        }
        generation_number += 1;
    }
    debug!("Log multiplexer finished after {} generations", generation_number);
}

/// Relabel frames from one generation until it fails or ends
async fn forward_generation<R>(source: &mut R, sink: &LogSink, label: &[u8]) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    loop {
        source.read_exact(&mut header).await?;
        let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        sink.forward_frame(label, source, u64::from(length)).await?;
    }
}
