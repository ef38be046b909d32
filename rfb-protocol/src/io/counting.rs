//! Byte-counting reader, used to pin down framing bugs: wrap a decoder's
//! stream in [`CountingReader`] and compare bytes consumed against what the
//! rectangle header claimed.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Wraps an [`AsyncRead`], tallying total bytes read in an [`AtomicU64`] so
/// the count can be sampled from another task via [`counter`](Self::counter).
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    /// Create a new CountingReader wrapping the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the total number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Reset the byte counter to zero.
    pub fn reset_counter(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
    }

    /// Clones the counter handle so byte count can be read from elsewhere
    /// while this reader is still borrowed.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes_read)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        let after = buf.filled().len();
        let bytes_read = (after - before) as u64;
        self.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
        result
    }
}

/// Reads exactly `len` bytes into a freshly allocated `Vec`, for decoders
/// that need the whole payload in memory before they can parse it.
pub async fn read_exact_to_vec<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    tokio::io::AsyncReadExt::read_exact(reader, &mut buf).await?;
    Ok(buf)
}
