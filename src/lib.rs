//! Pagewalk Core Library
//!
//! A scripted web client: fetch a page, normalize its charset to UTF-8, parse
//! it, query it with CSS selectors and drive it like a browser would (follow
//! links, fill in and submit forms, tick checkboxes, download assets) without
//! running one.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`client`] - Client instances, configuration mutator, fork and reset
//! - [`config`] - Client configuration properties
//! - [`cookies`] - Cookie jar with JSON import/export
//! - [`document`] - Parsed pages, selections and browser emulation
//! - [`download`] - Bounded-concurrency asset download queue
//! - [`encoding`] - Charset detection, conversion and outbound escaping
//! - [`request`] - Request preparation and redirect-aware transports
//!
//! # Example
//!
//! ```no_run
//! use pagewalk_core::{Client, OnMissing, Params};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new();
//! let page = client.fetch("https://example.com/login").await?;
//! let form = page.select("form#login")?;
//! form.set_field("user", "alice", OnMissing::None)?
//!     .set_field("password", "secret", OnMissing::None)?;
//! let next = form.submit(&Params::new()).await?;
//! println!("{} -> {}", next.url(), next.select("h1")?.text());
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod cookies;
pub mod document;
pub mod download;
pub mod encoding;
pub mod error;
pub mod params;
pub mod request;
pub mod user_agent;

// Re-export commonly used types
pub use client::Client;
pub use config::{AgentOptions, ClientConfig, HeaderList, Property};
pub use cookies::{CookieEntry, CookieStore, SameSite};
pub use document::{
    Document, FieldSource, NavigationContext, OnMissing, Page, ResponseMeta, Selection, UrlFilter,
};
pub use download::{DownloadEvent, DownloadManager, DownloadState, DownloadStream, StreamState};
pub use encoding::EncodingService;
pub use error::{Error, ErrorKind, FetchError};
pub use params::{FieldValue, Params};
