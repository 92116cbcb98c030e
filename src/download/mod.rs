//! Asset downloads.
//!
//! [`DownloadManager`] queues URLs from [`Selection::download`](crate::Selection::download)
//! or direct calls, deduplicates them, fetches them with bounded concurrency and
//! hands each asset to the consumer as a [`DownloadStream`] through
//! [`DownloadEvent`] notifications.

mod manager;
mod stream;

pub use manager::{
    DEFAULT_PARALLEL, DEFAULT_TIMEOUT, DownloadEvent, DownloadManager, DownloadState, MAX_PARALLEL,
    MIN_PARALLEL,
};
pub use stream::{DownloadStream, StreamState};
