//! Error taxonomy for fetch, navigation and download operations.
//!
//! Every failure is an [`ErrorKind`] annotated with the request URL and the
//! outbound parameters ([`Error`]), so a failure deep inside a navigation chain
//! still says which request produced it. Navigation calls return [`FetchError`],
//! which additionally carries the parsed page for soft failures (non-2xx with a
//! body) so scraping logic can inspect "friendly" error pages.

use std::fmt;

use thiserror::Error;

use crate::document::Page;
use crate::params::Params;

/// What went wrong.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// DNS, connect, TLS or other transport failure.
    #[error("transport error{}: {message}", .code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    Transport {
        /// OS-level error code or transport category, when known.
        code: Option<String>,
        /// Human-readable description from the transport.
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered without a body.
    #[error("no content (HTTP {status_code})")]
    NoContent {
        /// HTTP status of the empty response.
        status_code: u16,
    },

    /// The server answered with a non-2xx status; the page is still available.
    #[error("server status error (HTTP {status_code})")]
    ServerStatus {
        /// HTTP status code.
        status_code: u16,
    },

    /// The active codec cannot convert to or from a charset.
    #[error("cannot convert charset {charset}")]
    Conversion {
        /// The charset that was attempted.
        charset: String,
    },

    /// The response body exceeded `maxDataSize`.
    #[error("response exceeded data size limit of {limit} bytes")]
    DataSizeLimit {
        /// The configured limit in bytes.
        limit: u64,
    },

    /// The redirect chain was longer than allowed.
    #[error("redirect limit of {max} exceeded")]
    RedirectLimit {
        /// Maximum number of redirects followed.
        max: u8,
    },

    /// `click()` target is neither a link nor a submit button.
    #[error("element is not clickable: {reason}")]
    NotClickable {
        /// Why the element was rejected.
        reason: String,
    },

    /// The element cannot take part in the requested operation.
    #[error("invalid element: {reason}")]
    InvalidElement {
        /// Why the element was rejected.
        reason: String,
    },

    /// `set_field` with [`OnMissing::Throw`](crate::OnMissing::Throw) found no field.
    #[error("form field not found: {name}")]
    FieldNotFound {
        /// The missing field name.
        name: String,
    },

    /// Download parallelism outside the accepted range.
    #[error("invalid download parallelism {value}: must be between 1 and 5")]
    InvalidParallelism {
        /// The rejected value.
        value: usize,
    },

    /// The operation cannot run in the current execution environment.
    #[error("unsupported environment: {reason}")]
    UnsupportedEnvironment {
        /// What is missing.
        reason: String,
    },

    /// The URL cannot be parsed or resolved.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
    },

    /// A downloaded asset could not be written to disk.
    #[error("I/O error at {path}: {message}")]
    Io {
        /// Target path.
        path: String,
        /// Description of the failure.
        message: String,
    },

    /// The CSS selector cannot be parsed.
    #[error("invalid selector: {selector}")]
    InvalidSelector {
        /// The offending selector text.
        selector: String,
    },
}

/// An [`ErrorKind`] annotated with the request it belongs to.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    url: Option<String>,
    params: Option<Params>,
}

impl Error {
    /// Creates an unannotated error.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            url: None,
            params: None,
        }
    }

    /// Attaches the request URL and outbound parameters.
    #[must_use]
    pub fn with_request(mut self, url: impl Into<String>, params: &Params) -> Self {
        self.url = Some(url.into());
        if !params.is_empty() {
            self.params = Some(params.clone());
        }
        self
    }

    /// Attaches only the request URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The error category.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The request URL, if known.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The outbound parameters, if any were sent.
    #[must_use]
    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    /// The HTTP status carried by `NoContent` / `ServerStatus`.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::NoContent { status_code } | ErrorKind::ServerStatus { status_code } => {
                Some(status_code)
            }
            _ => None,
        }
    }

    /// Maps a reqwest failure to `Timeout` or `Transport`.
    pub(crate) fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::new(ErrorKind::Timeout);
        }
        Self::new(ErrorKind::Transport {
            code: transport_code(error),
            message: error.to_string(),
        })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(url) = &self.url {
            write!(f, " [url: {url}]")?;
        }
        if let Some(params) = &self.params {
            let names: Vec<&str> = params.iter().map(|(name, _)| name).collect();
            write!(f, " [params: {}]", names.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Walks the source chain for an `io::Error` and reports its kind, which is the
/// closest portable equivalent of an OS-level error code.
fn transport_code(error: &reqwest::Error) -> Option<String> {
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            return Some(
                io.raw_os_error()
                    .map_or_else(|| format!("{:?}", io.kind()), |code| format!("os error {code}")),
            );
        }
        source = inner.source();
    }
    if error.is_connect() {
        Some("connect".to_string())
    } else if error.is_request() {
        Some("request".to_string())
    } else {
        None
    }
}

/// Failure of a navigation call (`fetch`, `click`, `submit`).
///
/// Soft failures (`ServerStatus`) keep the parsed page; hard failures have none.
#[derive(Debug)]
pub struct FetchError {
    error: Error,
    page: Option<Box<Page>>,
}

impl FetchError {
    pub(crate) fn with_page(error: Error, page: Page) -> Self {
        Self {
            error,
            page: Some(Box::new(page)),
        }
    }

    /// The annotated error.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Shorthand for `error().kind()`.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        self.error.kind()
    }

    /// Shorthand for `error().status_code()`.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.error.status_code()
    }

    /// The parsed page delivered with a soft failure.
    #[must_use]
    pub fn page(&self) -> Option<&Page> {
        self.page.as_deref()
    }

    /// Takes the page out of a soft failure.
    #[must_use]
    pub fn into_page(self) -> Option<Page> {
        self.page.map(|page| *page)
    }

    /// Drops the page and keeps the annotated error.
    #[must_use]
    pub fn into_error(self) -> Error {
        self.error
    }
}

impl From<Error> for FetchError {
    fn from(error: Error) -> Self {
        Self { error, page: None }
    }
}

impl From<ErrorKind> for FetchError {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind).into()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_url_and_param_names() {
        let params = Params::new().with("q", "rust").with("page", "2");
        let error = Error::new(ErrorKind::ServerStatus { status_code: 404 })
            .with_request("https://example.com/search", &params);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected status in: {msg}");
        assert!(msg.contains("https://example.com/search"), "Expected URL in: {msg}");
        assert!(msg.contains("q, page"), "Expected param names in: {msg}");
    }

    #[test]
    fn test_status_code_only_for_status_kinds() {
        assert_eq!(
            Error::new(ErrorKind::NoContent { status_code: 204 }).status_code(),
            Some(204)
        );
        assert_eq!(Error::new(ErrorKind::Timeout).status_code(), None);
    }

    #[test]
    fn test_empty_params_are_not_recorded() {
        let error = Error::new(ErrorKind::Timeout).with_request("https://example.com/", &Params::new());
        assert!(error.params().is_none());
        assert_eq!(error.url(), Some("https://example.com/"));
    }

    #[test]
    fn test_transport_display_with_code() {
        let kind = ErrorKind::Transport {
            code: Some("ConnectionRefused".to_string()),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            kind.to_string(),
            "transport error (ConnectionRefused): connection refused"
        );
    }

    #[test]
    fn test_parallelism_display_names_range() {
        let msg = ErrorKind::InvalidParallelism { value: 9 }.to_string();
        assert!(msg.contains('9'));
        assert!(msg.contains("between 1 and 5"));
    }
}
