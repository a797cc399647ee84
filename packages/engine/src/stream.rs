// ABOUTME: Sized byte stream with an owned close chain
// ABOUTME: Lets a consumer take over cleanup such as container removal by closing the stream

use crate::Result;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::warn;

/// Boxed async reader used for every byte source crossing the runtime boundary
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

type CloseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Deferred cleanup detached from a stream's reader
///
/// Produced by [`Stream::into_parts`] so transports can hand the reader to the
/// runtime and still run the close chain once the transfer finishes.
pub struct StreamCloser {
    action: Option<CloseFn>,
}

impl StreamCloser {
    /// Run the close chain. Consumes the closer so it fires at most once.
    pub async fn close(mut self) -> Result<()> {
        match self.action.take() {
            Some(action) => action().await,
            None => Ok(()),
        }
    }
}

impl Drop for StreamCloser {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            warn!("Stream dropped without being closed, running close chain in background");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = action().await {
                            warn!("Background stream close failed: {}", e);
                        }
                    });
                }
                Err(_) => warn!("No async runtime available, close chain skipped"),
            }
        }
    }
}

/// A readable source with a declared length and a close chain
///
/// The owner must call [`Stream::close`] exactly once. Closing drops the
/// reader, which releases the underlying transport, then runs every action
/// bound with [`Stream::close_after`] in binding order.
pub struct Stream {
    reader: ByteReader,
    size: u64,
    closer: StreamCloser,
}

impl Stream {
    pub fn new<R>(reader: R, size: u64) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            size,
            closer: StreamCloser { action: None },
        }
    }

    /// Wrap an in-memory buffer; the declared size is the buffer length
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::new(std::io::Cursor::new(data), size)
    }

    /// Declared byte length. Never revised after construction.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bind `after` to run once the stream is closed.
    ///
    /// The action runs after everything bound earlier. Its error is reported
    /// only when the earlier part of the chain closed cleanly.
    pub fn close_after<F, Fut>(mut self, after: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let previous = self.closer.action.take();
        self.closer.action = Some(Box::new(move || {
            async move {
                let closed = match previous {
                    Some(previous) => previous().await,
                    None => Ok(()),
                };
                let after = after().await;
                closed.and(after)
            }
            .boxed()
        }));
        self
    }

    /// Split into reader, declared size, and the pending close chain
    pub fn into_parts(self) -> (ByteReader, u64, StreamCloser) {
        (self.reader, self.size, self.closer)
    }

    /// Release the reader and run the close chain
    pub async fn close(self) -> Result<()> {
        let (reader, _, closer) = self.into_parts();
        drop(reader);
        closer.close().await
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("size", &self.size)
            .field("chained", &self.closer.action.is_some())
            .finish()
    }
}
