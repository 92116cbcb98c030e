//! Bounded-concurrency download queue.
//!
//! URLs are deduplicated against a cache, queued, and drained in batches by a
//! single run loop. `data:` URIs are decoded on the spot and never wait for a
//! permit. Each batch is processed with at most `parallel` items in
//! flight, gated by a [`Semaphore`]. Every item produces a `Ready` event with a
//! [`DownloadStream`] or an `Error` event; the loop emits `End` once the queue
//! is empty.
//!
//! # Example
//!
//! ```no_run
//! use pagewalk_core::{Client, DownloadEvent};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new();
//! let downloads = client.download();
//! let mut events = downloads.events().expect("events not taken yet");
//! downloads.enqueue("https://example.com/logo.png")?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         DownloadEvent::Ready(stream) => {
//!             stream.save_as("logo.png").await?;
//!         }
//!         DownloadEvent::End => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::stream::{ByteSource, DownloadStream, StreamShared, StreamState};
use crate::client::{Client, ClientInner};
use crate::error::{Error, ErrorKind};

/// Minimum accepted parallelism.
pub const MIN_PARALLEL: usize = 1;

/// Maximum accepted parallelism.
pub const MAX_PARALLEL: usize = 5;

/// Parallelism of a fresh manager.
pub const DEFAULT_PARALLEL: usize = 3;

/// Orphan timeout of a fresh manager.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Aggregate counters of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadState {
    /// Items enqueued and not yet resolved.
    pub queue: usize,
    /// Streams read to the end.
    pub complete: usize,
    /// Failed, timed-out or aborted items.
    pub error: usize,
}

/// Notification emitted by the manager.
#[derive(Debug)]
pub enum DownloadEvent {
    /// A URL entered the queue.
    Add(String),
    /// An asset is ready to be read.
    Ready(DownloadStream),
    /// An item failed.
    Error {
        /// The failing URL.
        url: String,
        /// What went wrong.
        error: Error,
    },
    /// The queue drained.
    End,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    running: bool,
    /// `data:` items resolved at enqueue time and not yet settled.
    inline: usize,
}

impl QueueState {
    fn idle(&self) -> bool {
        !self.running && self.pending.is_empty() && self.inline == 0
    }
}

/// Download queue shared by a root client and its forks.
pub struct DownloadManager {
    client: Weak<ClientInner>,
    parallel: AtomicUsize,
    timeout_ms: AtomicU64,
    cache: DashMap<String, ()>,
    queue: Mutex<QueueState>,
    state: Mutex<DownloadState>,
    sender: UnboundedSender<DownloadEvent>,
    receiver: Mutex<Option<UnboundedReceiver<DownloadEvent>>>,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("parallel", &self.parallel())
            .field("timeout", &self.timeout())
            .field("cached", &self.cache.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            client,
            parallel: AtomicUsize::new(DEFAULT_PARALLEL),
            timeout_ms: AtomicU64::new(u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX)),
            cache: DashMap::new(),
            queue: Mutex::new(QueueState::default()),
            state: Mutex::new(DownloadState::default()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn events(&self) -> Option<UnboundedReceiver<DownloadEvent>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Configured parallelism.
    #[must_use]
    pub fn parallel(&self) -> usize {
        self.parallel.load(Ordering::SeqCst)
    }

    /// Sets the parallelism. The value is validated by the next
    /// [`enqueue`](Self::enqueue).
    pub fn set_parallel(&self, parallel: usize) {
        self.parallel.store(parallel, Ordering::SeqCst);
    }

    /// Orphan timeout: how long a `Ready` stream may wait for its first read.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    /// Sets the orphan timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            Ordering::SeqCst,
        );
    }

    /// Snapshot of the aggregate counters.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets every URL seen so far so it can be enqueued again.
    pub fn clear_cache(&self) {
        debug!(cached = self.cache.len(), "clearing download cache");
        self.cache.clear();
    }

    /// Queues `url` for download.
    ///
    /// Returns `false` without queuing when `url` is empty or was already
    /// queued since the last [`clear_cache`](Self::clear_cache).
    ///
    /// `data:` URIs bypass the batch queue: their `Add` and `Ready` (or
    /// `Error`) events are emitted before this returns.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidParallelism`] when the parallelism is outside
    /// `1..=5`, [`ErrorKind::UnsupportedEnvironment`] outside a tokio runtime.
    #[instrument(level = "debug", skip(self))]
    pub fn enqueue(self: &Arc<Self>, url: &str) -> Result<bool, Error> {
        let parallel = self.parallel();
        if !(MIN_PARALLEL..=MAX_PARALLEL).contains(&parallel) {
            return Err(Error::new(ErrorKind::InvalidParallelism { value: parallel }).with_url(url));
        }
        let handle = Handle::try_current().map_err(|_| {
            Error::new(ErrorKind::UnsupportedEnvironment {
                reason: "downloads require a running tokio runtime".to_string(),
            })
            .with_url(url)
        })?;

        let url = url.trim();
        if url.is_empty() {
            return Ok(false);
        }
        if self.cache.insert(url.to_string(), ()).is_some() {
            debug!(url, "download already queued");
            return Ok(false);
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        self.emit(DownloadEvent::Add(url.to_string()));
        if url.starts_with("data:") {
            match inline_stream(url) {
                Ok(stream) => {
                    queue.inline += 1;
                    self.update(|state| state.queue += 1);
                    let shared = stream.shared();
                    let watcher = shared.subscribe();
                    self.emit(DownloadEvent::Ready(stream));
                    let manager = Arc::clone(self);
                    let url = url.to_string();
                    handle.spawn(async move {
                        manager.watch(url, shared, watcher).await;
                        manager.settle_inline();
                    });
                }
                Err(error) => {
                    self.fail(url.to_string(), error);
                    if queue.idle() {
                        self.emit(DownloadEvent::End);
                    }
                }
            }
            return Ok(true);
        }

        queue.pending.push_back(url.to_string());
        self.update(|state| state.queue += 1);
        if !queue.running {
            queue.running = true;
            handle.spawn(Arc::clone(self).run());
        }
        Ok(true)
    }

    /// Settles one inline item, emitting `End` when nothing else is pending.
    fn settle_inline(&self) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.inline = queue.inline.saturating_sub(1);
        self.update(|state| state.queue = state.queue.saturating_sub(1));
        if queue.idle() {
            self.emit(DownloadEvent::End);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut DownloadState)) {
        apply(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn emit(&self, event: DownloadEvent) {
        // The receiver may have been dropped; events are then discarded.
        let _ = self.sender.send(event);
    }

    /// Drains batches until the queue stays empty, then emits `End`.
    async fn run(self: Arc<Self>) {
        loop {
            let batch: Vec<String> = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                if queue.pending.is_empty() {
                    queue.running = false;
                    if queue.idle() {
                        self.emit(DownloadEvent::End);
                    }
                    break;
                }
                queue.pending.drain(..).collect()
            };

            let parallel = self.parallel().clamp(MIN_PARALLEL, MAX_PARALLEL);
            info!(items = batch.len(), parallel, "processing download batch");
            let semaphore = Arc::new(Semaphore::new(parallel));
            let mut handles = Vec::with_capacity(batch.len());
            for url in batch {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    warn!("download semaphore closed unexpectedly");
                    break;
                };
                let manager = Arc::clone(&self);
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    manager.process(url).await;
                }));
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "download task failed");
                }
            }
        }
        debug!(state = ?self.state(), "download queue drained");
    }

    /// Resolves one item and settles its counters.
    async fn process(&self, url: String) {
        match self.open(&url).await {
            Ok(stream) => self.supervise(url, stream).await,
            Err(error) => self.fail(url, error),
        }
        self.update(|state| state.queue = state.queue.saturating_sub(1));
    }

    fn fail(&self, url: String, error: Error) {
        warn!(url = %url, error = %error, "download failed");
        self.update(|state| state.error += 1);
        self.emit(DownloadEvent::Error { url, error });
    }

    /// Opens the network byte source for `url` and wraps it in a stream.
    async fn open(&self, url: &str) -> Result<DownloadStream, Error> {
        let client = self.client.upgrade().map(Client::from_inner).ok_or_else(|| {
            Error::new(ErrorKind::UnsupportedEnvironment {
                reason: "the owning client was dropped".to_string(),
            })
            .with_url(url)
        })?;
        let response = client.open_stream(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(ErrorKind::ServerStatus {
                status_code: status.as_u16(),
            })
            .with_url(url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let length = response.content_length();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(DownloadStream::new(
            url.to_string(),
            content_type,
            length,
            StreamShared::new(ByteSource::Network(body)),
        ))
    }

    /// Hands the stream to the consumer and waits for it to settle.
    async fn supervise(&self, url: String, stream: DownloadStream) {
        let shared = stream.shared();
        let watcher = shared.subscribe();
        self.emit(DownloadEvent::Ready(stream));
        self.watch(url, shared, watcher).await;
    }

    /// Waits for a handed-out stream to settle and records the outcome.
    async fn watch(
        &self,
        url: String,
        shared: Arc<StreamShared>,
        mut watcher: watch::Receiver<StreamState>,
    ) {
        let first = tokio::time::timeout(
            self.timeout(),
            watcher.wait_for(|state| *state != StreamState::Pending),
        )
        .await
        .map(|seen| seen.map_or_else(|_| shared.current(), |state| *state));
        let mut settled = match first {
            Ok(state) => state,
            Err(_) if shared.transition(StreamState::Pending, StreamState::Errored) => {
                shared.close().await;
                let error = Error::new(ErrorKind::Timeout).with_url(url.as_str());
                self.fail(url, error);
                return;
            }
            Err(_) => shared.current(),
        };

        if settled == StreamState::Active {
            settled = watcher
                .wait_for(|state| state.is_terminal())
                .await
                .map_or_else(|_| shared.current(), |state| *state);
        }

        match settled {
            StreamState::Complete => {
                debug!(url = %url, "download complete");
                self.update(|state| state.complete += 1);
            }
            StreamState::Skipped => debug!(url = %url, "download skipped"),
            StreamState::Errored | StreamState::Pending | StreamState::Active => self.fail(
                url.clone(),
                Error::new(ErrorKind::Transport {
                    code: None,
                    message: "download stream aborted before completion".to_string(),
                })
                .with_url(url),
            ),
        }
    }
}

/// Builds a pre-filled stream for a `data:` URI.
fn inline_stream(url: &str) -> Result<DownloadStream, Error> {
    let (content_type, bytes) = decode_data_uri(url)?;
    let length = Some(bytes.len() as u64);
    Ok(DownloadStream::new(
        url.to_string(),
        content_type,
        length,
        StreamShared::new(ByteSource::Buffered(Some(bytes))),
    ))
}

/// Decodes `data:[<mediatype>][;base64],<data>`.
fn decode_data_uri(uri: &str) -> Result<(Option<String>, Vec<u8>), Error> {
    let invalid = || Error::new(ErrorKind::InvalidUrl { url: uri.to_string() });
    let rest = uri.strip_prefix("data:").ok_or_else(invalid)?;
    let (meta, data) = rest.split_once(',').ok_or_else(invalid)?;

    let (media_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(media_type) => (media_type, true),
        None => (meta, false),
    };
    let bytes = if is_base64 {
        let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD.decode(compact).map_err(|_| invalid())?
    } else {
        urlencoding::decode_binary(data.as_bytes()).into_owned()
    };
    let content_type = if media_type.is_empty() {
        "text/plain;charset=US-ASCII".to_string()
    } else {
        media_type.to_string()
    };
    Ok((Some(content_type), bytes))
}
