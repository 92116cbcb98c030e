//! Download streams handed to consumers through `Ready` events.
//!
//! A stream starts `Pending`. The first read moves it to `Active`; reading to
//! the end makes it `Complete`. `end()` before any read makes it `Skipped`. A
//! stream nobody touches before the manager's timeout becomes `Errored` and its
//! connection is dropped.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::error::{Error, ErrorKind};

/// Lifecycle state of a [`DownloadStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Waiting for the consumer's first read.
    Pending,
    /// Being read.
    Active,
    /// Read to the end.
    Complete,
    /// Ended before any read.
    Skipped,
    /// Timed out unread, failed mid-read, or dropped mid-read.
    Errored,
}

impl StreamState {
    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped | Self::Errored)
    }
}

pub(crate) enum ByteSource {
    /// Pre-filled bytes (data URIs).
    Buffered(Option<Vec<u8>>),
    /// Network body.
    Network(BoxStream<'static, Result<Vec<u8>, reqwest::Error>>),
}

impl ByteSource {
    async fn next(&mut self) -> Option<Result<Vec<u8>, reqwest::Error>> {
        match self {
            Self::Buffered(bytes) => bytes.take().map(Ok),
            Self::Network(stream) => stream.next().await,
        }
    }
}

pub(crate) struct StreamShared {
    state: watch::Sender<StreamState>,
    source: Mutex<Option<ByteSource>>,
}

impl StreamShared {
    pub(crate) fn new(source: ByteSource) -> Arc<Self> {
        let (state, _) = watch::channel(StreamState::Pending);
        Arc::new(Self {
            state,
            source: Mutex::new(Some(source)),
        })
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub(crate) fn current(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Moves `from → to` atomically; returns whether the transition happened.
    pub(crate) fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Drops the byte source, closing the connection.
    pub(crate) async fn close(&self) {
        self.source.lock().await.take();
    }
}

/// A downloaded asset, readable once.
pub struct DownloadStream {
    url: String,
    content_type: Option<String>,
    length: Option<u64>,
    shared: Arc<StreamShared>,
}

impl fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadStream")
            .field("url", &self.url)
            .field("content_type", &self.content_type)
            .field("length", &self.length)
            .field("state", &self.state())
            .finish()
    }
}

impl DownloadStream {
    pub(crate) fn new(
        url: String,
        content_type: Option<String>,
        length: Option<u64>,
        shared: Arc<StreamShared>,
    ) -> Self {
        Self {
            url,
            content_type,
            length,
            shared,
        }
    }

    pub(crate) fn shared(&self) -> Arc<StreamShared> {
        Arc::clone(&self.shared)
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// `Content-Type` of the asset, if known.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Length in bytes, if known.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.shared.current()
    }

    fn timed_out(&self) -> Error {
        Error::new(ErrorKind::Timeout).with_url(self.url.clone())
    }

    /// Reads the next chunk; `Ok(None)` at the end.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Timeout`] when the stream already timed out unread, or the
    /// transport error that interrupted the body.
    pub async fn next_chunk(&self) -> Result<Option<Vec<u8>>, Error> {
        self.shared.transition(StreamState::Pending, StreamState::Active);
        match self.state() {
            StreamState::Active => {}
            StreamState::Errored => return Err(self.timed_out()),
            StreamState::Pending | StreamState::Complete | StreamState::Skipped => return Ok(None),
        }

        let mut source = self.shared.source.lock().await;
        let Some(bytes) = source.as_mut() else {
            return Ok(None);
        };
        match bytes.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => {
                source.take();
                self.shared.transition(StreamState::Active, StreamState::Errored);
                Err(Error::from_transport(&e).with_url(self.url.clone()))
            }
            None => {
                source.take();
                self.shared.transition(StreamState::Active, StreamState::Complete);
                debug!(url = %self.url, "download stream complete");
                Ok(None)
            }
        }
    }

    /// Reads the remaining bytes into memory.
    ///
    /// # Errors
    ///
    /// As [`next_chunk`](Self::next_chunk).
    pub async fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = Vec::with_capacity(usize::try_from(self.length.unwrap_or(0)).unwrap_or(0));
        while let Some(chunk) = self.next_chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer)
    }

    /// Streams the remaining bytes into a file, returning the byte count.
    ///
    /// # Errors
    ///
    /// As [`next_chunk`](Self::next_chunk), plus [`ErrorKind::Io`] when the file
    /// cannot be written.
    pub async fn save_as(&self, path: impl AsRef<Path>) -> Result<u64, Error> {
        let path = path.as_ref();
        let io_error = |e: std::io::Error| {
            Error::new(ErrorKind::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })
            .with_url(self.url.clone())
        };
        let file = File::create(path).await.map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        let mut written: u64 = 0;
        while let Some(chunk) = self.next_chunk().await? {
            writer.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        writer.flush().await.map_err(io_error)?;
        debug!(url = %self.url, path = %path.display(), bytes = written, "download saved");
        Ok(written)
    }

    /// Releases the stream without reading it (counted as a skip).
    ///
    /// Has no effect once reading has started or the stream timed out.
    pub async fn end(&self) {
        if self.shared.transition(StreamState::Pending, StreamState::Skipped) {
            self.shared.close().await;
            debug!(url = %self.url, "download stream skipped");
        }
    }
}

impl Drop for DownloadStream {
    fn drop(&mut self) {
        // An unread stream is left to the orphan timeout; a half-read one is abandoned.
        self.shared.transition(StreamState::Active, StreamState::Errored);
    }
}
