//! Per-client cookie jar.
//!
//! Cookies arrive through `Set-Cookie` headers on every response (redirect hops
//! included, since redirects are followed by hand) and leave through the
//! `Cookie` header composed for each outbound request. The jar round-trips
//! through a portable JSON array of [`CookieEntry`] records.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

/// `SameSite` attribute of a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SameSite {
    /// Sent only for same-site requests.
    Strict,
    /// Sent for same-site requests and top-level navigations.
    Lax,
    /// Sent with every request.
    #[default]
    None,
}

/// One cookie in the portable JSON format.
///
/// `domain` is dot-prefixed when the cookie also applies to subdomains.
/// `expires` is seconds since the epoch (millisecond precision), or `-1` for a
/// session cookie.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieEntry {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, redacted in Debug output).
    pub value: String,
    /// Domain, dot-prefixed unless host-only.
    pub domain: String,
    /// Path scope.
    pub path: String,
    /// Expiry in epoch seconds, `-1` for session cookies.
    pub expires: f64,
    /// Hidden from scripts.
    pub http_only: bool,
    /// Sent only over HTTPS.
    pub secure: bool,
    /// `SameSite` policy.
    #[serde(default)]
    pub same_site: SameSite,
}

impl fmt::Debug for CookieEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieEntry")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("expires", &self.expires)
            .field("http_only", &self.http_only)
            .field("secure", &self.secure)
            .field("same_site", &self.same_site)
            .finish()
    }
}

#[derive(Clone)]
struct StoredCookie {
    name: String,
    value: String,
    /// Lower-cased, without leading dot.
    domain: String,
    host_only: bool,
    path: String,
    /// Expiry in epoch milliseconds; `None` for session cookies.
    expires_ms: Option<i64>,
    http_only: bool,
    secure: bool,
    same_site: SameSite,
}

impl StoredCookie {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_ms.is_some_and(|expires| expires <= now_ms)
    }

    fn same_identity(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches(&self, url: &Url, now_ms: i64) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(&host, &self.domain)
        };
        domain_ok
            && path_matches(url.path(), &self.path)
            && (!self.secure || url.scheme() == "https")
            && !self.is_expired(now_ms)
    }

    fn to_entry(&self) -> CookieEntry {
        CookieEntry {
            name: self.name.clone(),
            value: self.value.clone(),
            domain: if self.host_only {
                self.domain.clone()
            } else {
                format!(".{}", self.domain)
            },
            path: self.path.clone(),
            #[allow(clippy::cast_precision_loss)]
            expires: self.expires_ms.map_or(-1.0, |ms| ms as f64 / 1000.0),
            http_only: self.http_only,
            secure: self.secure,
            same_site: self.same_site,
        }
    }

    fn from_entry(entry: &CookieEntry) -> Option<Self> {
        if entry.name.is_empty() || entry.domain.trim_start_matches('.').is_empty() {
            return None;
        }
        let host_only = !entry.domain.starts_with('.');
        #[allow(clippy::cast_possible_truncation)]
        let expires_ms = (entry.expires >= 0.0).then(|| (entry.expires * 1000.0).trunc() as i64);
        Some(Self {
            name: entry.name.clone(),
            value: entry.value.clone(),
            domain: entry.domain.trim_start_matches('.').to_ascii_lowercase(),
            host_only,
            path: if entry.path.is_empty() {
                "/".to_string()
            } else {
                entry.path.clone()
            },
            expires_ms,
            http_only: entry.http_only,
            secure: entry.secure,
            same_site: entry.same_site,
        })
    }
}

/// Thread-safe cookie jar owned by one client instance.
#[derive(Default)]
pub struct CookieStore {
    cookies: Mutex<Vec<StoredCookie>>,
}

impl fmt::Debug for CookieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStore")
            .field("count", &self.len())
            .finish()
    }
}

impl Clone for CookieStore {
    /// Deep copy; the clone evolves independently.
    fn clone(&self) -> Self {
        Self {
            cookies: Mutex::new(self.lock().clone()),
        }
    }
}

impl CookieStore {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StoredCookie>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored cookies, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the jar is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes every cookie.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Parses `Set-Cookie` header values received from `url` and merges them.
    #[instrument(level = "debug", skip(self, headers), fields(url = %url))]
    pub fn store_response_cookies<'a>(&self, url: &Url, headers: impl IntoIterator<Item = &'a str>) {
        let now = now_ms();
        let mut jar = self.lock();
        for header in headers {
            let Some(cookie) = parse_set_cookie(header, url, now) else {
                continue;
            };
            jar.retain(|existing| !existing.same_identity(&cookie));
            if cookie.is_expired(now) {
                debug!(name = %cookie.name, domain = %cookie.domain, "cookie expired by server");
                continue;
            }
            debug!(name = %cookie.name, domain = %cookie.domain, "cookie stored");
            jar.push(cookie);
        }
    }

    /// Builds the `Cookie` header value for a request to `url`.
    #[must_use]
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        let now = now_ms();
        let jar = self.lock();
        let mut matching: Vec<&StoredCookie> =
            jar.iter().filter(|cookie| cookie.matches(url, now)).collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Name → value map of the cookies applicable to `url`.
    #[must_use]
    pub fn snapshot(&self, url: &Url) -> BTreeMap<String, String> {
        let now = now_ms();
        self.lock()
            .iter()
            .filter(|cookie| cookie.matches(url, now))
            .map(|cookie| (cookie.name.clone(), cookie.value.clone()))
            .collect()
    }

    /// Merges portable entries into the jar, replacing same-identity cookies.
    ///
    /// Returns the number of entries accepted.
    pub fn import(&self, entries: &[CookieEntry]) -> usize {
        let now = now_ms();
        let mut jar = self.lock();
        let mut accepted = 0;
        for entry in entries {
            let Some(cookie) = StoredCookie::from_entry(entry) else {
                warn!(name = %entry.name, domain = %entry.domain, "skipping cookie entry without name or domain");
                continue;
            };
            jar.retain(|existing| !existing.same_identity(&cookie));
            if !cookie.is_expired(now) {
                jar.push(cookie);
                accepted += 1;
            }
        }
        accepted
    }

    /// Exports every live cookie in the portable format.
    #[must_use]
    pub fn export(&self) -> Vec<CookieEntry> {
        let now = now_ms();
        self.lock()
            .iter()
            .filter(|cookie| !cookie.is_expired(now))
            .map(StoredCookie::to_entry)
            .collect()
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// Directory of the request path (RFC 6265 §5.1.4).
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Parses one `Set-Cookie` header value in the context of the request URL.
fn parse_set_cookie(header: &str, url: &Url, now: i64) -> Option<StoredCookie> {
    let host = url.host_str()?.to_ascii_lowercase();
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().trim_matches('"').to_string(),
        domain: host.clone(),
        host_only: true,
        path: default_path(url),
        expires_ms: None,
        http_only: false,
        secure: false,
        same_site: SameSite::default(),
    };
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = val.trim_start_matches('.').to_ascii_lowercase();
                if domain.is_empty() {
                    continue;
                }
                if !domain_matches(&host, &domain) {
                    warn!(domain = %domain, host = %host, "rejecting cookie for foreign domain");
                    return None;
                }
                cookie.domain = domain;
                cookie.host_only = false;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "expires" => {
                if let Some(time) = parse_cookie_date(val) {
                    cookie.expires_ms = Some(
                        time.duration_since(UNIX_EPOCH)
                            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
                            .unwrap_or(0),
                    );
                }
            }
            "max-age" => max_age = val.parse().ok(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "samesite" => {
                cookie.same_site = match val.to_ascii_lowercase().as_str() {
                    "strict" => SameSite::Strict,
                    "lax" => SameSite::Lax,
                    _ => SameSite::None,
                };
            }
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        cookie.expires_ms = Some(now.saturating_add(seconds.saturating_mul(1000)));
    }
    Some(cookie)
}

/// Parses an HTTP date, tolerating the dashed Netscape variant
/// (`Wed, 21-Oct-2026 07:28:00 GMT`).
fn parse_cookie_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value)
        .ok()
        .or_else(|| httpdate::parse_http_date(&value.replace('-', " ")).ok())
        .or_else(|| {
            // Two-digit years.
            let value = value.replace('-', " ");
            let mut fields: Vec<&str> = value.split_whitespace().collect();
            let year = fields.get(3).filter(|year| year.len() == 2)?.parse::<u32>().ok()?;
            let full = (if year < 70 { 2000 + year } else { 1900 + year }).to_string();
            fields[3] = &full;
            httpdate::parse_http_date(&fields.join(" ")).ok()
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_host_only_cookie_not_sent_to_subdomain() {
        let store = CookieStore::new();
        store.store_response_cookies(&url("https://example.com/login"), ["sid=abc; Path=/"]);
        assert_eq!(
            store.cookie_header(&url("https://example.com/account")).as_deref(),
            Some("sid=abc")
        );
        assert_eq!(store.cookie_header(&url("https://www.example.com/")), None);
    }

    #[test]
    fn test_domain_cookie_sent_to_subdomain_and_exported_with_dot() {
        let store = CookieStore::new();
        store.store_response_cookies(
            &url("https://www.example.com/"),
            ["pref=ja; Domain=example.com; Path=/"],
        );
        assert_eq!(
            store.cookie_header(&url("https://static.example.com/")).as_deref(),
            Some("pref=ja")
        );
        assert_eq!(store.export()[0].domain, ".example.com");
    }

    #[test]
    fn test_foreign_domain_rejected() {
        let store = CookieStore::new();
        store.store_response_cookies(&url("https://example.com/"), ["evil=1; Domain=other.com"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_default_path_is_request_directory() {
        let store = CookieStore::new();
        store.store_response_cookies(&url("http://example.com/app/login"), ["a=1"]);
        assert!(store.cookie_header(&url("http://example.com/app/page")).is_some());
        assert!(store.cookie_header(&url("http://example.com/other")).is_none());
        assert!(store.cookie_header(&url("http://example.com/application")).is_none());
    }

    #[test]
    fn test_secure_cookie_only_over_https() {
        let store = CookieStore::new();
        store.store_response_cookies(&url("https://example.com/"), ["token=t; Secure; HttpOnly"]);
        assert!(store.cookie_header(&url("http://example.com/")).is_none());
        assert!(store.cookie_header(&url("https://example.com/")).is_some());
        let entry = &store.export()[0];
        assert!(entry.secure);
        assert!(entry.http_only);
    }

    #[test]
    fn test_max_age_zero_deletes_cookie() {
        let store = CookieStore::new();
        let u = url("https://example.com/");
        store.store_response_cookies(&u, ["sid=abc"]);
        store.store_response_cookies(&u, ["sid=; Max-Age=0"]);
        assert!(store.cookie_header(&u).is_none());
    }

    #[test]
    fn test_longer_path_first() {
        let store = CookieStore::new();
        store.store_response_cookies(&url("https://example.com/"), ["a=root; Path=/", "b=deep; Path=/app"]);
        assert_eq!(
            store.cookie_header(&url("https://example.com/app/x")).as_deref(),
            Some("b=deep; a=root")
        );
    }

    #[test]
    fn test_expires_netscape_format() {
        let store = CookieStore::new();
        store.store_response_cookies(
            &url("https://example.com/"),
            ["keep=1; Expires=Wed, 21-Oct-2099 07:28:00 GMT"],
        );
        let entry = &store.export()[0];
        assert!(entry.expires > 4_000_000_000.0);
    }

    #[test]
    fn test_export_import_round_trip() {
        let entries = vec![
            CookieEntry {
                name: "sid".to_string(),
                value: "abc".to_string(),
                domain: "example.com".to_string(),
                path: "/".to_string(),
                expires: -1.0,
                http_only: true,
                secure: false,
                same_site: SameSite::Lax,
            },
            CookieEntry {
                name: "pref".to_string(),
                value: "ja".to_string(),
                domain: ".example.com".to_string(),
                path: "/app".to_string(),
                expires: 4_102_444_800.123_456,
                http_only: false,
                secure: true,
                same_site: SameSite::Strict,
            },
        ];
        let store = CookieStore::new();
        assert_eq!(store.import(&entries), 2);
        let exported = store.export();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0], entries[0]);
        assert_eq!(exported[1].domain, ".example.com");
        // Only sub-millisecond precision is lost.
        assert!((exported[1].expires - entries[1].expires).abs() < 0.001);
        assert_eq!(exported[1].same_site, SameSite::Strict);
    }

    #[test]
    fn test_json_shape_is_camel_case() {
        let entry = CookieEntry {
            name: "n".to_string(),
            value: "v".to_string(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
            expires: -1.0,
            http_only: true,
            secure: false,
            same_site: SameSite::None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"httpOnly\":true"));
        assert!(json.contains("\"sameSite\":\"None\""));
    }

    #[test]
    fn test_clone_is_independent() {
        let store = CookieStore::new();
        let u = url("https://example.com/");
        store.store_response_cookies(&u, ["a=1"]);
        let copy = store.clone();
        copy.store_response_cookies(&u, ["b=2"]);
        assert_eq!(store.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn test_debug_redacts_value() {
        let store = CookieStore::new();
        store.store_response_cookies(&url("https://example.com/"), ["secret=hunter2"]);
        let debug = format!("{:?}", store.export());
        assert!(!debug.contains("hunter2"));
    }
}
