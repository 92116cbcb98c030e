//! Per-client configuration and its validated mutator.
//!
//! Properties are set by name with a JSON value, so scripts can drive the
//! client from loosely typed input. A value outside a property's accepted type
//! set is rejected with a warning and the previous value is kept.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::user_agent;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Recognized configuration properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Request headers (object of strings).
    Headers,
    /// Request timeout in milliseconds; 0 disables it.
    Timeout,
    /// Request compressed transfer.
    Gzip,
    /// Send the previous page as `Referer`.
    Referer,
    /// Follow `<meta http-equiv="refresh">`.
    FollowMetaRefresh,
    /// Response size ceiling in bytes, or null.
    MaxDataSize,
    /// Never parse in XML mode.
    ForceHtml,
    /// Transport options (proxy, TLS).
    AgentOptions,
    /// Per-request logging at info level.
    Debug,
    /// User-Agent preset name.
    Browser,
    /// Codec backend name.
    Iconv,
}

impl Property {
    /// All properties, in documentation order.
    pub const ALL: [Property; 11] = [
        Self::Headers,
        Self::Timeout,
        Self::Gzip,
        Self::Referer,
        Self::FollowMetaRefresh,
        Self::MaxDataSize,
        Self::ForceHtml,
        Self::AgentOptions,
        Self::Debug,
        Self::Browser,
        Self::Iconv,
    ];

    /// The property name as accepted by `set`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Timeout => "timeout",
            Self::Gzip => "gzip",
            Self::Referer => "referer",
            Self::FollowMetaRefresh => "followMetaRefresh",
            Self::MaxDataSize => "maxDataSize",
            Self::ForceHtml => "forceHtml",
            Self::AgentOptions => "agentOptions",
            Self::Debug => "debug",
            Self::Browser => "browser",
            Self::Iconv => "iconv",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Property {
    type Err = String;

    /// Accepts the camelCase name or its snake_case spelling.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s.chars().filter(|c| *c != '_').collect::<String>().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|property| property.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| format!("unknown configuration property: {s}"))
    }
}

/// Ordered header list with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    /// Case-insensitive lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Whether a header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a header, replacing any existing value under a differently cased name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            *slot = (name, value);
        } else {
            self.0.push((name, value));
        }
    }

    /// Removes a header.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Transport options applied when the HTTP client is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentOptions {
    /// Proxy URL for all requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Accept invalid TLS certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Connect timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
}

/// Configuration of one client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Headers sent with every request.
    pub headers: HeaderList,
    /// Request timeout in milliseconds; 0 means none.
    pub timeout_ms: u64,
    /// Request compressed responses.
    pub gzip: bool,
    /// Send the previously fetched URL as `Referer`.
    pub referer: bool,
    /// Follow meta-refresh redirects in HTML responses.
    pub follow_meta_refresh: bool,
    /// Response size ceiling in bytes.
    pub max_data_size: Option<u64>,
    /// Always parse as HTML.
    pub force_html: bool,
    /// Transport options.
    pub agent_options: AgentOptions,
    /// Log each request at info level.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            headers: HeaderList::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            gzip: true,
            referer: true,
            follow_meta_refresh: false,
            max_data_size: None,
            force_html: false,
            agent_options: AgentOptions::default(),
            debug: false,
        }
    }
}

impl ClientConfig {
    /// The timeout as a `Duration`, `None` when disabled.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// The preset name matching the configured User-Agent, if any.
    #[must_use]
    pub fn browser(&self) -> Option<&'static str> {
        self.headers
            .get("user-agent")
            .and_then(user_agent::preset_name_for)
    }

    /// Applies `value` to `property`.
    ///
    /// Returns `false` and leaves the configuration untouched when the value is
    /// outside the property's accepted type set. `Iconv` is not stored here and
    /// is always rejected; the client routes it to its encoding service.
    pub fn apply(&mut self, property: Property, value: &Value, no_merge: bool) -> bool {
        let applied = match property {
            Property::Headers => self.apply_headers(value, no_merge),
            Property::Timeout => value.as_u64().map(|ms| self.timeout_ms = ms).is_some(),
            Property::Gzip => value.as_bool().map(|b| self.gzip = b).is_some(),
            Property::Referer => value.as_bool().map(|b| self.referer = b).is_some(),
            Property::FollowMetaRefresh => value
                .as_bool()
                .map(|b| self.follow_meta_refresh = b)
                .is_some(),
            Property::MaxDataSize => match value {
                Value::Null => {
                    self.max_data_size = None;
                    true
                }
                other => other.as_u64().map(|n| self.max_data_size = Some(n)).is_some(),
            },
            Property::ForceHtml => value.as_bool().map(|b| self.force_html = b).is_some(),
            Property::AgentOptions => self.apply_agent_options(value, no_merge),
            Property::Debug => value.as_bool().map(|b| self.debug = b).is_some(),
            Property::Browser => self.apply_browser(value),
            Property::Iconv => false,
        };
        if applied {
            debug!(property = %property, "configuration updated");
        } else {
            warn!(property = %property, value = %value, "rejected configuration value");
        }
        applied
    }

    /// Current value of a property as JSON.
    #[must_use]
    pub fn get(&self, property: Property) -> Value {
        match property {
            Property::Headers => Value::Object(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                    .collect(),
            ),
            Property::Timeout => Value::from(self.timeout_ms),
            Property::Gzip => Value::Bool(self.gzip),
            Property::Referer => Value::Bool(self.referer),
            Property::FollowMetaRefresh => Value::Bool(self.follow_meta_refresh),
            Property::MaxDataSize => self.max_data_size.map_or(Value::Null, Value::from),
            Property::ForceHtml => Value::Bool(self.force_html),
            Property::AgentOptions => serde_json::to_value(&self.agent_options).unwrap_or(Value::Null),
            Property::Debug => Value::Bool(self.debug),
            Property::Browser => self.browser().map_or(Value::Null, Value::from),
            Property::Iconv => Value::Null,
        }
    }

    fn apply_headers(&mut self, value: &Value, no_merge: bool) -> bool {
        let Value::Object(map) = value else {
            return false;
        };
        // Validate everything before touching the current headers.
        if !map.values().all(|v| v.is_string() || (v.is_null() && !no_merge)) {
            return false;
        }
        if no_merge {
            self.headers = HeaderList::default();
        }
        for (name, value) in map {
            match value.as_str() {
                Some(value) => self.headers.set(name.clone(), value),
                None => self.headers.remove(name),
            }
        }
        true
    }

    fn apply_agent_options(&mut self, value: &Value, no_merge: bool) -> bool {
        let Value::Object(overlay) = value else {
            return false;
        };
        let merged = if no_merge {
            overlay.clone()
        } else {
            let mut base = match serde_json::to_value(&self.agent_options) {
                Ok(Value::Object(base)) => base,
                _ => Map::new(),
            };
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
            base
        };
        match serde_json::from_value::<AgentOptions>(Value::Object(merged)) {
            Ok(options) => {
                self.agent_options = options;
                true
            }
            Err(e) => {
                debug!(error = %e, "agentOptions did not deserialize");
                false
            }
        }
    }

    fn apply_browser(&mut self, value: &Value) -> bool {
        let Some(ua) = value.as_str().and_then(user_agent::preset) else {
            return false;
        };
        self.headers.set("User-Agent", ua);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert!(config.gzip);
        assert!(config.referer);
        assert!(!config.follow_meta_refresh);
        assert!(!config.force_html);
        assert_eq!(config.max_data_size, None);
    }

    #[test]
    fn test_property_names_accept_both_spellings() {
        assert_eq!("followMetaRefresh".parse::<Property>().unwrap(), Property::FollowMetaRefresh);
        assert_eq!("follow_meta_refresh".parse::<Property>().unwrap(), Property::FollowMetaRefresh);
        assert_eq!("MAX_DATA_SIZE".parse::<Property>().unwrap(), Property::MaxDataSize);
        assert!("nonsense".parse::<Property>().is_err());
    }

    #[test]
    fn test_wrong_type_is_rejected_without_mutation() {
        let mut config = ClientConfig::default();
        assert!(!config.apply(Property::Timeout, &json!("fast"), false));
        assert!(!config.apply(Property::Timeout, &json!(-5), false));
        assert!(!config.apply(Property::Gzip, &json!(1), false));
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_max_data_size_accepts_null() {
        let mut config = ClientConfig::default();
        assert!(config.apply(Property::MaxDataSize, &json!(1024), false));
        assert_eq!(config.max_data_size, Some(1024));
        assert!(config.apply(Property::MaxDataSize, &Value::Null, false));
        assert_eq!(config.max_data_size, None);
    }

    #[test]
    fn test_headers_merge_and_replace() {
        let mut config = ClientConfig::default();
        assert!(config.apply(Property::Headers, &json!({"X-A": "1", "X-B": "2"}), false));
        assert!(config.apply(Property::Headers, &json!({"x-a": "3", "X-B": null}), false));
        assert_eq!(config.headers.get("X-A"), Some("3"));
        assert!(!config.headers.contains("x-b"));

        assert!(config.apply(Property::Headers, &json!({"X-C": "4"}), true));
        assert_eq!(config.headers.len(), 1);
    }

    #[test]
    fn test_headers_with_non_string_value_rejected_atomically() {
        let mut config = ClientConfig::default();
        config.headers.set("X-Keep", "yes");
        assert!(!config.apply(Property::Headers, &json!({"X-New": "1", "X-Bad": 5}), false));
        assert_eq!(config.headers.len(), 1);
        assert!(!config.headers.contains("X-New"));
    }

    #[test]
    fn test_agent_options_merge() {
        let mut config = ClientConfig::default();
        assert!(config.apply(Property::AgentOptions, &json!({"proxy": "http://127.0.0.1:3128"}), false));
        assert!(config.apply(Property::AgentOptions, &json!({"acceptInvalidCerts": true}), false));
        assert_eq!(config.agent_options.proxy.as_deref(), Some("http://127.0.0.1:3128"));
        assert!(config.agent_options.accept_invalid_certs);

        assert!(config.apply(Property::AgentOptions, &json!({"connectTimeout": 500}), true));
        assert_eq!(config.agent_options.proxy, None);
        assert_eq!(config.agent_options.connect_timeout, Some(500));
    }

    #[test]
    fn test_agent_options_unknown_key_rejected() {
        let mut config = ClientConfig::default();
        assert!(!config.apply(Property::AgentOptions, &json!({"keepAliveMsecs": 10}), false));
        assert_eq!(config.agent_options, AgentOptions::default());
    }

    #[test]
    fn test_browser_sets_user_agent() {
        let mut config = ClientConfig::default();
        assert!(config.apply(Property::Browser, &json!("firefox"), false));
        assert_eq!(config.browser(), Some("firefox"));
        assert!(config.headers.get("user-agent").unwrap().contains("Firefox"));
        assert!(!config.apply(Property::Browser, &json!("mosaic"), false));
        assert_eq!(config.get(Property::Browser), json!("firefox"));
    }
}
