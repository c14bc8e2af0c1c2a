//! Streaming response support for chunked transfer.
//!
//! Streamed hooks write the status line before the command runs, then
//! deliver output chunks as the command produces them, followed by an
//! exit-code trailer.

use bytes::Bytes;
use hyper::body::Frame;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

/// A chunk of streaming data.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    /// The data bytes for this chunk.
    pub data: Bytes,
}

impl StreamChunk {
    /// Check if this chunk is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Command output arrives as raw read-buffer slices; the exit trailer is
// formatted as a String.
impl From<&[u8]> for StreamChunk {
    fn from(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }
}

impl From<String> for StreamChunk {
    fn from(data: String) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}

/// Wrapper stream that converts `StreamChunk` to `Frame<Bytes>`.
pub struct ChunkFrameStream {
    inner: ReceiverStream<StreamChunk>,
}

impl ChunkFrameStream {
    /// Create a new chunk frame stream from a receiver.
    pub fn new(rx: mpsc::Receiver<StreamChunk>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }
}

impl Stream for ChunkFrameStream {
    type Item = Result<Frame<Bytes>, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(chunk)) => {
                    // Skip empty chunks instead of emitting zero-length frames.
                    if chunk.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(Frame::data(chunk.data))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Default buffer size for streaming channels.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 100;

/// Create a new streaming channel pair.
#[inline]
pub fn stream_channel(
    buffer_size: usize,
) -> (mpsc::Sender<StreamChunk>, mpsc::Receiver<StreamChunk>) {
    mpsc::channel(buffer_size)
}
