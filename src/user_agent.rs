//! User-Agent strings and default request-identity headers.
//!
//! The tool's own UA identifies the crate and version. Browser presets let a
//! script present itself as a mainstream browser (`set("browser", "chrome")`).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/pagewalk";

/// Default `Accept` header sent when the caller has not set one.
pub(crate) const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Locale value treated as "no real preference" and never sent.
const FALLBACK_LANGUAGE: &str = "en-US";

/// Browser User-Agent presets, by lower-case name.
const PRESETS: &[(&str, &str)] = &[
    (
        "chrome",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36",
    ),
    (
        "firefox",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:131.0) Gecko/20100101 Firefox/131.0",
    ),
    (
        "edge",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36 Edg/129.0.0.0",
    ),
    (
        "safari",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.0 Safari/605.1.15",
    ),
    (
        "ie",
        "Mozilla/5.0 (Windows NT 10.0; WOW64; Trident/7.0; rv:11.0) like Gecko",
    ),
    (
        "iphone",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 18_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.0 Mobile/15E148 Safari/604.1",
    ),
    (
        "android",
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Mobile Safari/537.36",
    ),
    (
        "googlebot",
        "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
    ),
];

/// Default User-Agent (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("pagewalk/{version} (scripted-web-client; +{PROJECT_UA_URL})")
}

/// Looks up a browser preset by name (case-insensitive).
#[must_use]
pub fn preset(name: &str) -> Option<&'static str> {
    let name = name.trim().to_ascii_lowercase();
    PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, ua)| *ua)
}

/// Names of all browser presets.
#[must_use]
pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|(name, _)| *name).collect()
}

/// Reverse lookup: the preset whose UA equals `user_agent`.
#[must_use]
pub fn preset_name_for(user_agent: &str) -> Option<&'static str> {
    PRESETS
        .iter()
        .find(|(_, ua)| *ua == user_agent)
        .map(|(name, _)| *name)
}

/// `Accept-Language` derived from the OS locale environment.
///
/// Reads `LC_ALL`, `LC_MESSAGES`, then `LANG`; strips the encoding and modifier
/// suffixes (`ja_JP.UTF-8@x` → `ja-JP`). Returns `None` for the C/POSIX locale
/// and for the `en-US` fallback.
#[must_use]
pub(crate) fn system_accept_language() -> Option<String> {
    let raw = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())?;
    accept_language_from_locale(&raw)
}

fn accept_language_from_locale(locale: &str) -> Option<String> {
    let tag = locale
        .split(['.', '@'])
        .next()
        .unwrap_or_default()
        .trim()
        .replace('_', "-");
    if tag.is_empty() || tag == "C" || tag == "POSIX" || tag == FALLBACK_LANGUAGE {
        return None;
    }
    Some(tag)
}
