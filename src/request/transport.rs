//! Async execution over `reqwest` with manual redirect handling.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HeaderName, HeaderValue, REFERER, SET_COOKIE};
use reqwest::{Client, ClientBuilder, Method, Proxy, redirect};
use tracing::{debug, info, instrument, warn};

use super::redirect::{MAX_REDIRECTS, RedirectKind};
use super::{RawResponse, RequestSpec};
use crate::config::{AgentOptions, HeaderList};
use crate::cookies::CookieStore;
use crate::error::{Error, ErrorKind};

/// Builds the async transport. Redirects are never followed by reqwest.
pub(crate) fn build_client(options: &AgentOptions) -> Result<Client, reqwest::Error> {
    let mut builder: ClientBuilder = Client::builder()
        .redirect(redirect::Policy::none())
        .gzip(true)
        .danger_accept_invalid_certs(options.accept_invalid_certs);
    if let Some(ms) = options.connect_timeout {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

/// One hop's request parameters, shared with the blocking transport.
pub(super) struct Hop {
    pub(super) method: Method,
    pub(super) url: url::Url,
    pub(super) body: Option<String>,
    pub(super) referer: Option<String>,
}

impl Hop {
    pub(super) fn first(spec: &RequestSpec) -> Self {
        Self {
            method: spec.method.clone(),
            url: spec.url.clone(),
            body: spec.body.clone(),
            referer: None,
        }
    }

    /// The hop that follows a redirect: always GET, no body or parameters.
    pub(super) fn follow(&self, target: url::Url, kind: RedirectKind) -> Self {
        Self {
            method: Method::GET,
            referer: (kind == RedirectKind::MetaRefresh).then(|| self.url.to_string()),
            url: target,
            body: None,
        }
    }

    /// Header pairs for this hop, with the `Cookie` header from the jar.
    pub(super) fn headers(&self, base: &HeaderList, cookies: &CookieStore) -> Vec<(HeaderName, HeaderValue)> {
        let mut headers: Vec<(HeaderName, HeaderValue)> = base
            .iter()
            .filter(|(name, _)| !(self.referer.is_some() && name.eq_ignore_ascii_case("referer")))
            .filter_map(|(name, value)| {
                match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                    (Ok(name), Ok(value)) => Some((name, value)),
                    _ => {
                        warn!(header = %name, "skipping header with invalid name or value");
                        None
                    }
                }
            })
            .collect();
        if let Some(referer) = self.referer.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.push((REFERER, referer));
        }
        if let Some(cookie) = cookies
            .cookie_header(&self.url)
            .and_then(|c| HeaderValue::from_str(&c).ok())
        {
            headers.push((COOKIE, cookie));
        }
        if self.body.is_some() {
            headers.push((
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            ));
        }
        headers
    }
}

/// Feeds `Set-Cookie` headers of a hop into the jar.
pub(super) fn absorb_cookies(cookies: &CookieStore, url: &url::Url, headers: &reqwest::header::HeaderMap) {
    let values = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok());
    cookies.store_response_cookies(url, values);
}

/// Fails fast when the declared length already exceeds the ceiling.
pub(super) fn check_declared_length(headers: &reqwest::header::HeaderMap, limit: Option<u64>) -> Result<(), Error> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    match declared {
        Some(length) if length > limit => Err(Error::new(ErrorKind::DataSizeLimit { limit })),
        _ => Ok(()),
    }
}

pub(super) fn log_hop(spec: &RequestSpec, hop: &Hop, status: u16) {
    if spec.debug {
        info!(method = %hop.method, url = %hop.url, status, "request completed");
    } else {
        debug!(method = %hop.method, url = %hop.url, status, "request completed");
    }
}

/// Executes a request, following HTTP and meta-refresh redirects.
///
/// # Errors
///
/// `Timeout`/`Transport` for transport failures, `DataSizeLimit` when the body
/// exceeds the ceiling, `RedirectLimit` when a sixth redirect is requested.
/// Every error is annotated with the request URL and parameters.
#[instrument(level = "debug", skip_all, fields(method = %spec.method, url = %spec.url))]
pub(crate) async fn execute(
    client: &Client,
    cookies: &CookieStore,
    spec: &RequestSpec,
) -> Result<RawResponse, Error> {
    let mut hop = Hop::first(spec);
    let mut redirects: u8 = 0;

    loop {
        let mut request = client.request(hop.method.clone(), hop.url.clone());
        for (name, value) in hop.headers(&spec.headers, cookies) {
            request = request.header(name, value);
        }
        if let Some(body) = &hop.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = spec.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| spec.annotate(Error::from_transport(&e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        absorb_cookies(cookies, &url, &headers);
        log_hop(spec, &hop, status.as_u16());

        check_declared_length(&headers, spec.max_data_size).map_err(|e| spec.annotate(e))?;
        let body = read_body(response, spec.max_data_size)
            .await
            .map_err(|e| spec.annotate(e))?;

        let Some(target) = super::redirect::target(status, &headers, &url, &body, spec.follow_meta_refresh)
        else {
            return Ok(RawResponse {
                status: status.as_u16(),
                headers,
                url,
                redirects,
                body,
            });
        };

        if redirects >= MAX_REDIRECTS {
            warn!(url = %url, max = MAX_REDIRECTS, "redirect limit exceeded");
            return Err(spec.annotate(Error::new(ErrorKind::RedirectLimit { max: MAX_REDIRECTS })));
        }
        redirects += 1;
        debug!(from = %url, to = %target.url, kind = ?target.kind, redirects, "following redirect");
        hop = hop.follow(target.url, target.kind);
    }
}

/// Sends a request and returns the final response with its body unread.
///
/// Only HTTP redirects are followed; the body of an intermediate hop is never
/// inspected.
///
/// # Errors
///
/// `Timeout`/`Transport` for transport failures, `RedirectLimit` when a sixth
/// redirect is requested.
#[instrument(level = "debug", skip_all, fields(url = %spec.url))]
pub(crate) async fn open(
    client: &Client,
    cookies: &CookieStore,
    spec: &RequestSpec,
) -> Result<reqwest::Response, Error> {
    let mut hop = Hop::first(spec);
    let mut redirects: u8 = 0;

    loop {
        let mut request = client.request(hop.method.clone(), hop.url.clone());
        for (name, value) in hop.headers(&spec.headers, cookies) {
            request = request.header(name, value);
        }
        let send = request.send();
        let response = match spec.timeout {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| spec.annotate(Error::new(ErrorKind::Timeout)))?,
            None => send.await,
        }
        .map_err(|e| spec.annotate(Error::from_transport(&e)))?;

        let url = response.url().clone();
        absorb_cookies(cookies, &url, response.headers());
        log_hop(spec, &hop, response.status().as_u16());

        let Some(target) = super::redirect::target(response.status(), response.headers(), &url, &[], false) else {
            return Ok(response);
        };
        if redirects >= MAX_REDIRECTS {
            return Err(spec.annotate(Error::new(ErrorKind::RedirectLimit { max: MAX_REDIRECTS })));
        }
        redirects += 1;
        debug!(from = %url, to = %target.url, redirects, "following download redirect");
        hop = hop.follow(target.url, target.kind);
    }
}

/// Streams the body into memory, aborting once `limit` is exceeded.
async fn read_body(response: reqwest::Response, limit: Option<u64>) -> Result<Vec<u8>, Error> {
    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::from_transport(&e))?;
        body.extend_from_slice(&chunk);
        if let Some(limit) = limit
            && body.len() as u64 > limit
        {
            // Dropping the stream aborts the connection.
            return Err(Error::new(ErrorKind::DataSizeLimit { limit }));
        }
    }
    Ok(body)
}
