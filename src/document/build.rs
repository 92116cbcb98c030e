//! Turns a raw response into a [`Page`].

use reqwest::header::CONTENT_TYPE;
use scraper::{Html, HtmlTreeSink};
use tracing::{debug, instrument};
use url::Url;
use xml5ever::tendril::TendrilSink;

use super::{Document, NavigationContext, Page, ResponseMeta};
use crate::client::Client;
use crate::error::{Error, ErrorKind, FetchError};
use crate::request::{RawResponse, RequestSpec};

/// URL path extensions that select XML mode.
const XML_EXTENSIONS: &[&str] = &["rss", "rdf", "atom", "opml", "xsl", "xslt"];

/// Decodes, parses and wraps a response.
///
/// # Errors
///
/// [`ErrorKind::NoContent`] for an empty body (no page), [`ErrorKind::Conversion`]
/// when the charset is unsupported, and [`ErrorKind::ServerStatus`] for non-2xx
/// responses, which still carry the parsed page.
#[instrument(level = "debug", skip_all, fields(url = %raw.url, status = raw.status))]
pub(crate) fn build(client: &Client, raw: RawResponse, spec: &RequestSpec) -> Result<Page, FetchError> {
    if raw.body.is_empty() {
        return Err(spec
            .annotate(Error::new(ErrorKind::NoContent {
                status_code: raw.status,
            }))
            .into());
    }

    let encoding = spec
        .encoding_override
        .clone()
        .or_else(|| client.encoding().detect(&raw.body))
        .map(|name| name.to_ascii_lowercase());
    let body = match &encoding {
        Some(name) => client
            .encoding()
            .convert(name, &raw.body)
            .map_err(|e| spec.annotate(e))?,
        None => String::from_utf8_lossy(&raw.body).into_owned(),
    };

    let config = client.config();
    let content_type = raw
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let is_xml_mode = !config.force_html && (is_xml_content_type(content_type) || has_xml_extension(&raw.url));
    debug!(encoding = ?encoding, xml = is_xml_mode, "parsing document");

    let html = if is_xml_mode { parse_xml(&body) } else { Html::parse_document(&body) };
    let context = NavigationContext {
        resolved_url: raw.url.clone(),
        detected_encoding: encoding,
        is_xml_mode,
    };

    if config.referer {
        client.record_referer(&raw.url);
    }

    let page = Page {
        response: ResponseMeta {
            status: raw.status,
            cookies: client.cookie_snapshot(&raw.url),
            headers: raw.headers,
            url: raw.url,
            redirects: raw.redirects,
        },
        body,
        document: Document::new(html, context, client.clone()),
    };

    if !(200..300).contains(&page.response.status) {
        let error = spec.annotate(Error::new(ErrorKind::ServerStatus {
            status_code: page.response.status,
        }));
        return Err(FetchError::with_page(error, page));
    }
    Ok(page)
}

/// XML and XHTML MIME types, including `+xml` suffixes.
fn is_xml_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.ends_with("/xml") || mime.ends_with("+xml")
}

fn has_xml_extension(url: &Url) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .is_some_and(|(_, ext)| XML_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Parses XML into the same tree type the HTML parser produces.
fn parse_xml(text: &str) -> Html {
    xml5ever::driver::parse_document(HtmlTreeSink::new(Html::new_document()), Default::default()).one(text)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scraper::Selector;

    use super::*;

    #[test]
    fn test_xml_content_types() {
        assert!(is_xml_content_type("application/xml"));
        assert!(is_xml_content_type("text/xml; charset=utf-8"));
        assert!(is_xml_content_type("application/rss+xml"));
        assert!(is_xml_content_type("application/xhtml+xml"));
        assert!(!is_xml_content_type("text/html"));
        assert!(!is_xml_content_type(""));
    }

    #[test]
    fn test_xml_extensions() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(has_xml_extension(&url("https://example.com/feed.rss")));
        assert!(has_xml_extension(&url("https://example.com/a/b.ATOM?x=1")));
        assert!(!has_xml_extension(&url("https://example.com/index.html")));
        assert!(!has_xml_extension(&url("https://example.com/rss")));
    }

    #[test]
    fn test_parse_xml_keeps_case_and_structure() {
        let html = parse_xml("<?xml version=\"1.0\"?><rss><channel><title>T</title><item><link>u</link></item></channel></rss>");
        let link = html.select(&Selector::parse("item link").unwrap()).next().unwrap();
        assert_eq!(link.text().collect::<String>(), "u");
    }
}
