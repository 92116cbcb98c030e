//! Request composition and execution.
//!
//! A request moves through `Prepared → InFlight → Succeeded | Redirecting |
//! Failed`. [`prepare`] turns a method, URL and payload into a [`RequestSpec`];
//! [`transport::execute`] and [`blocking::execute`] run it with manual redirect
//! handling and hand back a [`RawResponse`].

pub(crate) mod blocking;
pub mod redirect;
pub(crate) mod transport;

use std::time::Duration;

use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

use crate::config::{ClientConfig, HeaderList};
use crate::encoding::EncodingService;
use crate::error::{Error, ErrorKind};
use crate::params::Params;
use crate::user_agent;

pub use redirect::MAX_REDIRECTS;

/// Outbound payload.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Parameters escaped at prepare time with the request encoding.
    Params(Params),
    /// Already escaped `k=v&...` text. `params` is kept for error annotation.
    Encoded {
        /// The escaped query/body text.
        text: String,
        /// The unescaped parameters it was built from.
        params: Params,
    },
}

impl Payload {
    fn params(&self) -> &Params {
        match self {
            Self::Params(params) | Self::Encoded { params, .. } => params,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Params(Params::new())
    }
}

/// A fully prepared request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method of the first hop.
    pub method: Method,
    /// URL of the first hop, query included.
    pub url: Url,
    /// Headers for every hop (the `Cookie` header is added per hop).
    pub headers: HeaderList,
    /// Form body for non-GET methods.
    pub body: Option<String>,
    /// Outbound parameters, for error annotation.
    pub params: Params,
    /// Caller-forced response charset.
    pub encoding_override: Option<String>,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
    /// Response size ceiling.
    pub max_data_size: Option<u64>,
    /// Follow meta-refresh redirects.
    pub follow_meta_refresh: bool,
    /// Log at info level.
    pub debug: bool,
}

impl RequestSpec {
    /// Annotates an error with this request's URL and parameters.
    pub(crate) fn annotate(&self, error: Error) -> Error {
        error.with_request(self.url.as_str(), &self.params)
    }
}

/// Final response after redirects, before encoding conversion and parsing.
#[derive(Debug)]
pub struct RawResponse {
    /// HTTP status of the final hop.
    pub status: u16,
    /// Headers of the final hop.
    pub headers: HeaderMap,
    /// URL of the final hop.
    pub url: Url,
    /// Number of redirects followed.
    pub redirects: u8,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

/// Builds a [`RequestSpec`].
///
/// Config headers come first; `User-Agent`, `Accept` and `Accept-Language`
/// defaults fill in only what the caller has not set. `referer` is the client's
/// last visited URL and is only used when the `referer` property is on.
/// GET and HEAD carry parameters in the query string; other methods send them
/// as an `application/x-www-form-urlencoded` body. The `Cookie` header is
/// attached per hop by the transport, since redirects change the target.
///
/// # Errors
///
/// [`ErrorKind::InvalidUrl`] for an unparsable URL, [`ErrorKind::Conversion`]
/// when a parameter cannot be expressed in the request encoding.
pub(crate) fn prepare(
    config: &ClientConfig,
    encoding: &EncodingService,
    referer: Option<&str>,
    method: Method,
    url: &str,
    payload: Payload,
    encoding_override: Option<&str>,
) -> Result<RequestSpec, Error> {
    let params = payload.params().clone();
    let mut target = Url::parse(url.trim()).map_err(|_| {
        Error::new(ErrorKind::InvalidUrl {
            url: url.to_string(),
        })
        .with_request(url, &params)
    })?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(Error::new(ErrorKind::InvalidUrl {
            url: url.to_string(),
        })
        .with_request(url, &params));
    }

    let encoded = match &payload {
        Payload::Params(params) => {
            let charset = encoding_override.unwrap_or("utf-8");
            encode_params(encoding, charset, params, !is_query_method(&method))
                .map_err(|e| e.with_request(url, params))?
        }
        Payload::Encoded { text, .. } => text.clone(),
    };

    let mut body = None;
    if is_query_method(&method) {
        if !encoded.is_empty() {
            let query = match target.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
                _ => encoded,
            };
            target.set_query(Some(&query));
        }
    } else {
        body = Some(encoded);
    }

    Ok(RequestSpec {
        method,
        url: target,
        headers: compose_headers(config, referer),
        body,
        params,
        encoding_override: encoding_override.map(str::to_string),
        timeout: config.timeout(),
        max_data_size: config.max_data_size,
        follow_meta_refresh: config.follow_meta_refresh,
        debug: config.debug,
    })
}

fn is_query_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn compose_headers(config: &ClientConfig, referer: Option<&str>) -> HeaderList {
    let mut headers = config.headers.clone();
    if !headers.contains("user-agent") {
        headers.set("User-Agent", user_agent::default_user_agent());
    }
    if !headers.contains("accept") {
        headers.set("Accept", user_agent::DEFAULT_ACCEPT);
    }
    if !headers.contains("accept-language")
        && let Some(language) = user_agent::system_accept_language()
    {
        headers.set("Accept-Language", language);
    }
    if !config.gzip {
        headers.set("Accept-Encoding", "identity");
    }
    if config.referer
        && !headers.contains("referer")
        && let Some(referer) = referer
    {
        headers.set("Referer", referer);
    }
    headers
}

/// Escapes parameters into `k=v&k=v2` form in `charset`.
///
/// List values repeat the key. With `space_as_plus`, spaces are written as `+`
/// (form body convention) instead of `%20`.
///
/// # Errors
///
/// [`ErrorKind::Conversion`] when a key or value cannot be encoded.
pub(crate) fn encode_params(
    encoding: &EncodingService,
    charset: &str,
    params: &Params,
    space_as_plus: bool,
) -> Result<String, Error> {
    let mut pairs = Vec::with_capacity(params.len());
    for (name, value) in params.iter() {
        let key = encoding.escape(charset, name)?;
        for item in value.values() {
            pairs.push(format!("{key}={}", encoding.escape(charset, item)?));
        }
    }
    let joined = pairs.join("&");
    Ok(if space_as_plus {
        joined.replace("%20", "+")
    } else {
        joined
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::params::FieldValue;

    fn prepare_simple(config: &ClientConfig, method: Method, url: &str, params: Params) -> RequestSpec {
        prepare(
            config,
            &EncodingService::default(),
            Some("https://example.com/prev"),
            method,
            url,
            Payload::Params(params),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_get_params_go_to_query() {
        let spec = prepare_simple(
            &ClientConfig::default(),
            Method::GET,
            "https://example.com/search?lang=ja",
            Params::new().with("q", "rust lang"),
        );
        assert_eq!(spec.url.query(), Some("lang=ja&q=rust%20lang"));
        assert!(spec.body.is_none());
    }

    #[test]
    fn test_post_params_go_to_body() {
        let spec = prepare_simple(
            &ClientConfig::default(),
            Method::POST,
            "https://example.com/login",
            Params::new().with("user", "a b").with("tags", FieldValue::from(vec!["x", "y"])),
        );
        assert_eq!(spec.url.query(), None);
        assert_eq!(spec.body.as_deref(), Some("user=a+b&tags=x&tags=y"));
    }

    #[test]
    fn test_encoding_override_escapes_params() {
        let spec = prepare(
            &ClientConfig::default(),
            &EncodingService::default(),
            None,
            Method::GET,
            "https://example.com/",
            Payload::Params(Params::new().with("q", "あ")),
            Some("shift_jis"),
        )
        .unwrap();
        assert_eq!(spec.url.query(), Some("q=%82%A0"));
        assert_eq!(spec.encoding_override.as_deref(), Some("shift_jis"));
    }

    #[test]
    fn test_default_headers_fill_only_unset() {
        let mut config = ClientConfig::default();
        config.headers.set("user-agent", "custom/1.0");
        let spec = prepare_simple(&config, Method::GET, "https://example.com/", Params::new());
        assert_eq!(spec.headers.get("User-Agent"), Some("custom/1.0"));
        assert_eq!(spec.headers.get("accept"), Some(user_agent::DEFAULT_ACCEPT));
        assert_eq!(spec.headers.get("referer"), Some("https://example.com/prev"));
    }

    #[test]
    fn test_referer_disabled() {
        let config = ClientConfig {
            referer: false,
            ..ClientConfig::default()
        };
        let spec = prepare_simple(&config, Method::GET, "https://example.com/", Params::new());
        assert!(!spec.headers.contains("referer"));
    }

    #[test]
    fn test_gzip_off_requests_identity() {
        let config = ClientConfig {
            gzip: false,
            ..ClientConfig::default()
        };
        let spec = prepare_simple(&config, Method::GET, "https://example.com/", Params::new());
        assert_eq!(spec.headers.get("accept-encoding"), Some("identity"));
    }

    #[test]
    fn test_invalid_url_is_annotated() {
        let err = prepare(
            &ClientConfig::default(),
            &EncodingService::default(),
            None,
            Method::GET,
            "not a url",
            Payload::Params(Params::new().with("a", "1")),
            None,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidUrl { .. }));
        assert_eq!(err.url(), Some("not a url"));
        assert!(err.params().is_some());
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let err = prepare(
            &ClientConfig::default(),
            &EncodingService::default(),
            None,
            Method::GET,
            "ftp://example.com/file",
            Payload::default(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidUrl { .. }));
    }
}
