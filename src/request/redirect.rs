//! Redirect target resolution shared by the async and blocking transports.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, LOCATION};
use url::Url;

/// Maximum number of redirects followed for one request.
pub const MAX_REDIRECTS: u8 = 5;

static HTML_COMMENT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());

static META_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").ok());

static HTTP_EQUIV_REFRESH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)http-equiv\s*=\s*["']?\s*refresh\b"#).ok());

static CONTENT_ATTR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?is)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).ok());

static REFRESH_URL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)url\s*=\s*["']?([^"'\s]+)"#).ok());

/// How the redirect was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// 3xx status with a `Location` header.
    Http,
    /// `<meta http-equiv="refresh">` in an HTML body.
    MetaRefresh,
}

/// Where to go next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Absolute target URL.
    pub url: Url,
    /// Source of the redirect.
    pub kind: RedirectKind,
}

/// Computes the redirect target of a response, if any.
///
/// HTTP redirects take precedence. Meta-refresh is only considered when
/// `follow_meta_refresh` is set and the response is HTML.
#[must_use]
pub fn target(
    status: StatusCode,
    headers: &HeaderMap,
    request_url: &Url,
    body: &[u8],
    follow_meta_refresh: bool,
) -> Option<RedirectTarget> {
    if status.is_redirection()
        && let Some(location) = headers.get(LOCATION).and_then(|v| v.to_str().ok())
        && let Ok(url) = request_url.join(location.trim())
    {
        return Some(RedirectTarget {
            url,
            kind: RedirectKind::Http,
        });
    }

    if !follow_meta_refresh || !is_html(headers) {
        return None;
    }
    let refresh = meta_refresh_url(&String::from_utf8_lossy(body))?;
    let url = request_url.join(&refresh).ok()?;
    Some(RedirectTarget {
        url,
        kind: RedirectKind::MetaRefresh,
    })
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("html"))
}

/// Extracts the URL of the first `<meta http-equiv="refresh">` outside comments.
#[must_use]
pub fn meta_refresh_url(html: &str) -> Option<String> {
    let comment_re = HTML_COMMENT.as_ref()?;
    let meta_re = META_TAG.as_ref()?;
    let equiv_re = HTTP_EQUIV_REFRESH.as_ref()?;
    let content_re = CONTENT_ATTR.as_ref()?;
    let url_re = REFRESH_URL.as_ref()?;

    let stripped = comment_re.replace_all(html, "");
    meta_re
        .find_iter(&stripped)
        .map(|tag| tag.as_str())
        .filter(|tag| equiv_re.is_match(tag))
        .find_map(|tag| {
            let caps = content_re.captures(tag)?;
            let content = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            let url = url_re.captures(content.as_str())?.get(1)?;
            Some(url.as_str().to_string())
        })
}
