//! Blocking execution over `reqwest::blocking`.
//!
//! Runs the same redirect, cookie and size-limit pipeline as the async path on
//! the calling thread. Refused inside an async runtime, where blocking the
//! worker thread would stall every other task on it.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::{Proxy, redirect};
use tracing::{debug, instrument, warn};

use super::redirect::MAX_REDIRECTS;
use super::transport::{Hop, absorb_cookies, check_declared_length, log_hop};
use super::{RawResponse, RequestSpec};
use crate::config::AgentOptions;
use crate::cookies::CookieStore;
use crate::error::{Error, ErrorKind};

const READ_CHUNK: usize = 8 * 1024;

/// Fails with `UnsupportedEnvironment` when called from inside a tokio runtime.
pub(crate) fn ensure_blocking_allowed() -> Result<(), Error> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(Error::new(ErrorKind::UnsupportedEnvironment {
            reason: "blocking requests cannot run inside an async runtime; use the async API".to_string(),
        }));
    }
    Ok(())
}

/// Builds the blocking transport. Must be called outside an async runtime.
pub(crate) fn build_client(options: &AgentOptions) -> Result<Client, reqwest::Error> {
    let mut builder: ClientBuilder = Client::builder()
        .redirect(redirect::Policy::none())
        .gzip(true)
        .danger_accept_invalid_certs(options.accept_invalid_certs)
        // Per-request timeouts are applied by `execute`.
        .timeout(None::<Duration>);
    if let Some(ms) = options.connect_timeout {
        builder = builder.connect_timeout(Duration::from_millis(ms));
    }
    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

/// Blocking counterpart of [`super::transport::execute`].
///
/// # Errors
///
/// Same as the async path, plus `UnsupportedEnvironment` inside a runtime.
#[instrument(level = "debug", skip_all, fields(method = %spec.method, url = %spec.url))]
pub(crate) fn execute(client: &Client, cookies: &CookieStore, spec: &RequestSpec) -> Result<RawResponse, Error> {
    ensure_blocking_allowed().map_err(|e| spec.annotate(e))?;

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
            .map_err(|e| spec.annotate(Error::from_transport(&e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        absorb_cookies(cookies, &url, &headers);
        log_hop(spec, &hop, status.as_u16());

        check_declared_length(&headers, spec.max_data_size).map_err(|e| spec.annotate(e))?;
        let body = read_body(response, spec.max_data_size).map_err(|e| spec.annotate(e))?;

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

fn read_body(mut response: reqwest::blocking::Response, limit: Option<u64>) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    let mut chunk = vec![0_u8; READ_CHUNK];
    loop {
        let read = response.read(&mut chunk).map_err(|e| {
            // reqwest surfaces its own errors (timeouts included) inside io::Error.
            match e.get_ref().and_then(|inner| inner.downcast_ref::<reqwest::Error>()) {
                Some(inner) => Error::from_transport(inner),
                None if e.kind() == std::io::ErrorKind::TimedOut => Error::new(ErrorKind::Timeout),
                None => Error::new(ErrorKind::Transport {
                    code: Some(format!("{:?}", e.kind())),
                    message: e.to_string(),
                }),
            }
        })?;
        if read == 0 {
            return Ok(body);
        }
        body.extend_from_slice(&chunk[..read]);
        if let Some(limit) = limit
            && body.len() as u64 > limit
        {
            return Err(Error::new(ErrorKind::DataSizeLimit { limit }));
        }
    }
}
