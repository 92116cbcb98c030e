//! Form submission.

use reqwest::Method;
use scraper::ElementRef;
use tracing::debug;

use super::Document;
use super::form::fields;
use super::navigate::Navigation;
use crate::error::{Error, ErrorKind};
use crate::params::Params;
use crate::request::{Payload, encode_params};

/// Charset a form submits in: the first `accept-charset` token, else the
/// document's detected charset, else UTF-8.
pub(crate) fn submit_encoding(document: &Document, form: ElementRef<'_>) -> String {
    form.value()
        .attr("accept-charset")
        .and_then(|value| {
            value
                .split(|c: char| c.is_whitespace() || c == ',')
                .find(|token| !token.is_empty())
        })
        .map(str::to_string)
        .or_else(|| document.context().detected_encoding.clone())
        .unwrap_or_else(|| "utf-8".to_string())
}

/// Builds the navigation for submitting `form` with `overrides` merged over
/// its current fields.
///
/// POST bodies write spaces as `+`; GET submissions append the query to the
/// action URL.
///
/// # Errors
///
/// [`ErrorKind::InvalidUrl`] for an unresolvable action, [`ErrorKind::Conversion`]
/// when a value cannot be expressed in the submit charset.
pub(crate) fn prepare(document: &Document, form: ElementRef<'_>, overrides: &Params) -> Result<Navigation, Error> {
    let method = form
        .value()
        .attr("method")
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .and_then(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
        .unwrap_or(Method::GET);

    let action = form.value().attr("action").unwrap_or_default();
    let url = if action.trim().is_empty() {
        document.context().resolved_url.clone()
    } else {
        document.resolve(action).ok_or_else(|| {
            Error::new(ErrorKind::InvalidUrl {
                url: action.to_string(),
            })
        })?
    };

    let mut params = fields(document, form);
    params.merge(overrides);

    let charset = submit_encoding(document, form);
    let is_query = method == Method::GET || method == Method::HEAD;
    let encoding = document.client().encoding();
    let text = encode_params(&encoding, &charset, &params, !is_query)
        .map_err(|e| e.with_request(url.as_str(), &params))?;

    debug!(method = %method, action = %url, charset = %charset, fields = params.len(), "submitting form");
    Ok(Navigation {
        method,
        url: url.to_string(),
        payload: Payload::Encoded { text, params },
    })
}
