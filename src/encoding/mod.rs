//! Character encoding detection, conversion and outbound escaping.
//!
//! Inbound bodies are normalized to UTF-8 before parsing; outbound form values
//! are converted to the target document's charset before percent-encoding.
//!
//! # Example
//!
//! ```
//! use pagewalk_core::encoding::EncodingService;
//!
//! let service = EncodingService::default();
//! assert_eq!(service.escape("utf-8", "a b").unwrap(), "a%20b");
//! assert_eq!(service.escape("utf-8", "plain-text_1.0~").unwrap(), "plain-text_1.0~");
//! ```

mod codec;
mod detect;

use std::sync::Arc;

use tracing::{debug, warn};

pub use codec::{BACKENDS, Codec, EncodingRsCodec, Utf8OnlyCodec, backend_by_name};
pub use detect::{Guess, MIN_CONFIDENCE, detect, guess, head_charset_hint};

use crate::error::{Error, ErrorKind};

/// Detection, conversion and escaping over a swappable [`Codec`] backend.
#[derive(Debug, Clone)]
pub struct EncodingService {
    backend: Arc<dyn Codec>,
    pinned: bool,
}

impl Default for EncodingService {
    fn default() -> Self {
        Self {
            backend: Arc::new(EncodingRsCodec),
            pinned: false,
        }
    }
}

impl EncodingService {
    /// Creates a service over a specific backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn Codec>) -> Self {
        Self {
            backend,
            pinned: false,
        }
    }

    /// Name of the active backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Prevents any further backend switch.
    ///
    /// Embedders that ship a fixed conversion backend call this once; later
    /// switch attempts are logged and ignored.
    pub fn pin(&mut self) {
        self.pinned = true;
    }

    /// Whether the backend is pinned.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Switches to the built-in backend named `name`.
    ///
    /// Returns `false` (and keeps the previous backend) when the name is unknown
    /// or the service is pinned.
    pub fn set_backend(&mut self, name: &str) -> bool {
        if self.pinned {
            warn!(
                requested = %name,
                active = %self.backend.name(),
                "codec backend is pinned; keeping the active backend"
            );
            return false;
        }
        let Some(backend) = backend_by_name(name) else {
            warn!(requested = %name, available = ?BACKENDS, "unknown codec backend");
            return false;
        };
        debug!(backend = %backend.name(), "codec backend switched");
        self.backend = backend;
        true
    }

    /// Installs a custom backend, unless pinned.
    pub fn set_custom_backend(&mut self, backend: Arc<dyn Codec>) -> bool {
        if self.pinned {
            warn!(requested = %backend.name(), "codec backend is pinned; keeping the active backend");
            return false;
        }
        self.backend = backend;
        true
    }

    /// See [`detect()`].
    #[must_use]
    pub fn detect(&self, bytes: &[u8]) -> Option<String> {
        detect::detect(bytes)
    }

    /// Converts `bytes` in charset `encoding` into UTF-8 text.
    ///
    /// UTF-8 input is passed through untouched (invalid sequences are replaced).
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Conversion`] when the active backend does not support
    /// the charset.
    pub fn convert(&self, encoding: &str, bytes: &[u8]) -> Result<String, Error> {
        if codec::is_utf8_label(encoding) {
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }
        self.backend.decode(encoding, bytes).ok_or_else(|| {
            Error::new(ErrorKind::Conversion {
                charset: encoding.to_string(),
            })
        })
    }

    /// Percent-encodes `text` for transmission in charset `encoding`.
    ///
    /// Text made only of RFC 3986 unreserved characters is returned unchanged.
    /// Otherwise the text is converted to the target charset and every byte
    /// outside the unreserved set is written as `%XX`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Conversion`] when the active backend does not support
    /// the charset.
    pub fn escape(&self, encoding: &str, text: &str) -> Result<String, Error> {
        if text.bytes().all(is_unreserved) {
            return Ok(text.to_string());
        }
        let bytes = if codec::is_utf8_label(encoding) {
            text.as_bytes().to_vec()
        } else {
            self.backend.encode(encoding, text).ok_or_else(|| {
                Error::new(ErrorKind::Conversion {
                    charset: encoding.to_string(),
                })
            })?
        };
        Ok(urlencoding::encode_binary(&bytes).into_owned())
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}
