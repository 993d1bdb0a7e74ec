//! Sized byte streams with close finalizers.
//!
//! A [`DataStream`] is handed to whoever should consume it; that consumer
//! owns it and closes it. Finalizers attached to the stream (for example
//! removing the container a file was extracted from) run once, after the
//! reader has been released, whether the stream is closed explicitly or
//! simply dropped.

use crate::container::Result;
use futures::future::BoxFuture;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, warn};

/// Cleanup step run after a stream's reader is released.
pub type Finalizer = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A byte-readable resource plus its declared size.
pub struct DataStream {
    reader: Option<Pin<Box<dyn AsyncRead + Send>>>,
    size: u64,
    finalizers: Vec<Finalizer>,
}

impl DataStream {
    /// Wrap a reader with its declared size.
    pub fn new<R>(reader: R, size: u64) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Some(Box::pin(reader)),
            size,
            finalizers: Vec::new(),
        }
    }

    /// Stream over an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self::new(io::Cursor::new(bytes), size)
    }

    /// Declared size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Run `finalizer` after the stream's reader is released.
    ///
    /// Finalizers run in the order they were attached.
    pub fn on_close<F, Fut>(&mut self, finalizer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.finalizers
            .push(Box::new(move || Box::pin(finalizer()) as BoxFuture<'static, Result<()>>));
    }

    /// Read the remaining bytes into memory.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;

        let mut buf = Vec::with_capacity(self.size.min(64 * 1024 * 1024) as usize);
        AsyncReadExt::read_to_end(self, &mut buf).await?;
        Ok(buf)
    }

    /// Release the reader, then run every finalizer.
    ///
    /// All finalizers run even if an earlier one fails; the first error is
    /// returned.
    pub async fn close(mut self) -> Result<()> {
        self.reader.take();
        let finalizers = std::mem::take(&mut self.finalizers);
        run_finalizers(finalizers).await
    }
}

async fn run_finalizers(finalizers: Vec<Finalizer>) -> Result<()> {
    let mut first_err = None;
    for finalizer in finalizers {
        if let Err(e) = finalizer().await {
            debug!("Stream finalizer failed: {}", e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl AsyncRead for DataStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.reader.as_mut() {
            Some(reader) => reader.as_mut().poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "stream already closed",
            ))),
        }
    }
}

impl Drop for DataStream {
    fn drop(&mut self) {
        if self.finalizers.is_empty() {
            return;
        }
        self.reader.take();
        let finalizers = std::mem::take(&mut self.finalizers);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = run_finalizers(finalizers).await {
                        warn!("Cleanup after abandoned stream failed: {}", e);
                    }
                });
            }
            Err(_) => warn!(
                "Stream dropped outside a tokio runtime; {} finalizer(s) skipped",
                finalizers.len()
            ),
        }
    }
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("size", &self.size)
            .field("open", &self.reader.is_some())
            .field("finalizers", &self.finalizers.len())
            .finish()
    }
}
