//! Client instances: configuration, cookie jar, transports and the download
//! queue behind one cheaply clonable handle.
//!
//! A [`Client`] owns its configuration and cookies. [`Client::fork`] produces an
//! independent copy of both; forks keep funnelling downloads into the root
//! client's [`DownloadManager`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{AgentOptions, ClientConfig, Property};
use crate::cookies::{CookieEntry, CookieStore};
use crate::document::navigate::Navigation;
use crate::document::{self, Page};
use crate::download::DownloadManager;
use crate::encoding::EncodingService;
use crate::error::{Error, FetchError};
use crate::params::Params;
use crate::request::{self, Payload, RequestSpec, blocking, transport};

pub(crate) struct ClientInner {
    config: RwLock<ClientConfig>,
    encoding: RwLock<EncodingService>,
    cookies: CookieStore,
    http: RwLock<reqwest::Client>,
    /// Blocking transport, built on first use and tagged with the transport
    /// generation it was built for.
    blocking: Mutex<Option<(u64, reqwest::blocking::Client)>>,
    generation: AtomicU64,
    last_url: Mutex<Option<String>>,
    downloads: Arc<DownloadManager>,
}

/// A scripted web client.
///
/// Cloning the handle shares the instance; use [`fork`](Self::fork) for an
/// isolated copy.
///
/// # Example
///
/// ```no_run
/// use pagewalk_core::Client;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new();
/// let page = client.fetch("https://example.com/").await?;
/// println!("{}", page.select("title")?.text());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config())
            .field("codec", &self.encoding().backend_name())
            .field("cookies", &self.inner.cookies.len())
            .field("last_url", &self.last_url())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Client {
    /// Creates a client with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built with the default
    /// configuration (no TLS backend available). Use
    /// [`try_new`](Self::try_new) to handle that case.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::try_new().expect("failed to build HTTP client with default configuration")
    }

    /// Creates a client with the default configuration.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Transport`](crate::ErrorKind::Transport) when the HTTP
    /// client cannot be built.
    pub fn try_new() -> Result<Self, Error> {
        let config = ClientConfig::default();
        let http = transport::build_client(&config.agent_options).map_err(|e| Error::from_transport(&e))?;
        let inner = Arc::new_cyclic(|weak| ClientInner {
            config: RwLock::new(config),
            encoding: RwLock::new(EncodingService::default()),
            cookies: CookieStore::new(),
            http: RwLock::new(http),
            blocking: Mutex::new(None),
            generation: AtomicU64::new(0),
            last_url: Mutex::new(None),
            downloads: Arc::new(DownloadManager::new(weak.clone())),
        });
        debug!("client created");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Snapshot of the configuration.
    #[must_use]
    pub fn config(&self) -> ClientConfig {
        read(&self.inner.config).clone()
    }

    /// Snapshot of the encoding service.
    #[must_use]
    pub fn encoding(&self) -> EncodingService {
        read(&self.inner.encoding).clone()
    }

    /// Cookies applicable to `url`, by name.
    #[must_use]
    pub fn cookie_snapshot(&self, url: &Url) -> BTreeMap<String, String> {
        self.inner.cookies.snapshot(url)
    }

    /// URL of the last page fetched with `referer` on.
    #[must_use]
    pub fn last_url(&self) -> Option<String> {
        self.inner
            .last_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_referer(&self, url: &Url) {
        *self.inner.last_url.lock().unwrap_or_else(PoisonError::into_inner) = Some(url.to_string());
    }

    /// The download queue shared by this client and its forks.
    #[must_use]
    pub fn download(&self) -> Arc<DownloadManager> {
        Arc::clone(&self.inner.downloads)
    }

    // Navigation

    fn prepare(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        encoding_override: Option<&str>,
    ) -> Result<RequestSpec, Error> {
        let config = self.config();
        let referer = if config.referer { self.last_url() } else { None };
        request::prepare(
            &config,
            &self.encoding(),
            referer.as_deref(),
            method,
            url,
            payload,
            encoding_override,
        )
    }

    async fn run(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        encoding_override: Option<&str>,
    ) -> Result<Page, FetchError> {
        let spec = self.prepare(method, url, payload, encoding_override)?;
        let http = read(&self.inner.http).clone();
        let raw = transport::execute(&http, &self.inner.cookies, &spec).await?;
        document::build(self, raw, &spec)
    }

    fn run_sync(
        &self,
        method: Method,
        url: &str,
        payload: Payload,
        encoding_override: Option<&str>,
    ) -> Result<Page, FetchError> {
        blocking::ensure_blocking_allowed().map_err(|e| e.with_url(url))?;
        let spec = self.prepare(method, url, payload, encoding_override)?;
        let http = self.blocking_client().map_err(|e| spec.annotate(e))?;
        let raw = blocking::execute(&http, &self.inner.cookies, &spec)?;
        document::build(self, raw, &spec)
    }

    /// The blocking transport for the current agent options.
    fn blocking_client(&self) -> Result<reqwest::blocking::Client, Error> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let mut slot = self.inner.blocking.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((built_for, client)) = slot.as_ref()
            && *built_for == generation
        {
            return Ok(client.clone());
        }
        let options = read(&self.inner.config).agent_options.clone();
        let client = blocking::build_client(&options).map_err(|e| Error::from_transport(&e))?;
        debug!(generation, "blocking transport built");
        *slot = Some((generation, client.clone()));
        Ok(client)
    }

    /// Fetches `url` with GET.
    ///
    /// # Errors
    ///
    /// See [`fetch_with`](Self::fetch_with).
    pub async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        self.fetch_with(url, &Params::new(), None).await
    }

    /// Fetches `url` with GET and `params` appended to the query.
    ///
    /// `encoding` forces the response charset and the charset `params` are
    /// escaped in (UTF-8 otherwise).
    ///
    /// # Errors
    ///
    /// Transport failures, `Timeout`, `NoContent`, `DataSizeLimit`,
    /// `RedirectLimit`, `Conversion`, and `ServerStatus` (with the page) for
    /// non-2xx responses.
    #[instrument(skip(self, params), fields(params = params.len()))]
    pub async fn fetch_with(
        &self,
        url: &str,
        params: &Params,
        encoding: Option<&str>,
    ) -> Result<Page, FetchError> {
        self.run(Method::GET, url, Payload::Params(params.clone()), encoding)
            .await
    }

    /// Blocking [`fetch`](Self::fetch).
    ///
    /// # Errors
    ///
    /// As [`fetch_with`](Self::fetch_with), plus
    /// [`ErrorKind::UnsupportedEnvironment`](crate::ErrorKind::UnsupportedEnvironment)
    /// when called inside an async runtime.
    pub fn fetch_sync(&self, url: &str) -> Result<Page, FetchError> {
        self.fetch_sync_with(url, &Params::new(), None)
    }

    /// Blocking [`fetch_with`](Self::fetch_with).
    ///
    /// # Errors
    ///
    /// As [`fetch_sync`](Self::fetch_sync).
    #[instrument(skip(self, params), fields(params = params.len()))]
    pub fn fetch_sync_with(
        &self,
        url: &str,
        params: &Params,
        encoding: Option<&str>,
    ) -> Result<Page, FetchError> {
        self.run_sync(Method::GET, url, Payload::Params(params.clone()), encoding)
    }

    pub(crate) async fn navigate(&self, navigation: Navigation) -> Result<Page, FetchError> {
        self.run(navigation.method, &navigation.url, navigation.payload, None)
            .await
    }

    pub(crate) fn navigate_sync(&self, navigation: Navigation) -> Result<Page, FetchError> {
        self.run_sync(navigation.method, &navigation.url, navigation.payload, None)
    }

    /// Opens `url` for streaming: a non-gzip GET whose body is left unread.
    pub(crate) async fn open_stream(&self, url: &str) -> Result<reqwest::Response, Error> {
        let mut config = self.config();
        config.gzip = false;
        let spec = request::prepare(
            &config,
            &self.encoding(),
            None,
            Method::GET,
            url,
            Payload::default(),
            None,
        )?;
        let http = read(&self.inner.http).clone();
        transport::open(&http, &self.inner.cookies, &spec).await
    }

    // Configuration

    /// Sets a configuration property from a JSON value.
    ///
    /// Objects (`headers`, `agentOptions`) are merged into the current value
    /// unless `no_merge` is set. Unknown names and values of the wrong type
    /// are logged and ignored; the return value says whether anything changed.
    #[instrument(skip(self, value))]
    pub fn set(&self, name: &str, value: &Value, no_merge: bool) -> bool {
        let property = match name.parse::<Property>() {
            Ok(property) => property,
            Err(e) => {
                warn!(error = %e, "ignoring configuration update");
                return false;
            }
        };

        match property {
            Property::Iconv => {
                let Some(backend) = value.as_str() else {
                    warn!(value = %value, "iconv expects a backend name");
                    return false;
                };
                write(&self.inner.encoding).set_backend(backend)
            }
            Property::AgentOptions => {
                let mut config = self.config();
                if !config.apply(property, value, no_merge) {
                    return false;
                }
                if let Err(e) = self.rebuild_transport(&config.agent_options) {
                    warn!(error = %e, "transport rebuild failed; keeping previous agent options");
                    return false;
                }
                *write(&self.inner.config) = config;
                true
            }
            _ => write(&self.inner.config).apply(property, value, no_merge),
        }
    }

    /// Current value of a configuration property, `None` for unknown names.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        let property = name.parse::<Property>().ok()?;
        Some(match property {
            Property::Iconv => Value::from(self.encoding().backend_name()),
            other => read(&self.inner.config).get(other),
        })
    }

    fn rebuild_transport(&self, options: &AgentOptions) -> Result<(), reqwest::Error> {
        let http = transport::build_client(options)?;
        *write(&self.inner.http) = http;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "transport rebuilt");
        Ok(())
    }

    /// Restores the default configuration and empties the cookie jar.
    ///
    /// A pinned codec backend is kept.
    pub fn reset(&self) {
        let defaults = ClientConfig::default();
        if let Err(e) = self.rebuild_transport(&defaults.agent_options) {
            warn!(error = %e, "transport rebuild failed during reset");
        }
        *write(&self.inner.config) = defaults;
        {
            let mut encoding = write(&self.inner.encoding);
            if !encoding.is_pinned() {
                *encoding = EncodingService::default();
            }
        }
        self.inner.cookies.clear();
        *self.inner.last_url.lock().unwrap_or_else(PoisonError::into_inner) = None;
        info!("client reset to defaults");
    }

    /// Pins the codec backend: later `iconv` changes are refused.
    pub fn pin_codec(&self) {
        write(&self.inner.encoding).pin();
    }

    // Cookies

    /// Merges cookie entries into the jar; returns how many were accepted.
    pub fn import_cookies(&self, entries: &[CookieEntry]) -> usize {
        let imported = self.inner.cookies.import(entries);
        debug!(imported, offered = entries.len(), "cookies imported");
        imported
    }

    /// Every live cookie in the jar.
    #[must_use]
    pub fn export_cookies(&self) -> Vec<CookieEntry> {
        self.inner.cookies.export()
    }

    /// An isolated copy of this client.
    ///
    /// Configuration and cookies are copied; later changes on either side stay
    /// on that side. Downloads still go through the root client's queue.
    #[must_use]
    pub fn fork(&self) -> Client {
        let inner = ClientInner {
            config: RwLock::new(self.config()),
            encoding: RwLock::new(self.encoding()),
            cookies: self.inner.cookies.clone(),
            http: RwLock::new(read(&self.inner.http).clone()),
            blocking: Mutex::new(None),
            generation: AtomicU64::new(0),
            last_url: Mutex::new(self.last_url()),
            downloads: Arc::clone(&self.inner.downloads),
        };
        debug!(cookies = inner.cookies.len(), "client forked");
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_set_and_get_round_trip() {
        let client = Client::new();
        assert!(client.set("timeout", &json!(5000), false));
        assert_eq!(client.get("timeout"), Some(json!(5000)));
        assert!(client.set("follow_meta_refresh", &json!(true), false));
        assert_eq!(client.get("followMetaRefresh"), Some(json!(true)));
    }

    #[test]
    fn test_wrong_type_is_ignored() {
        let client = Client::new();
        assert!(!client.set("gzip", &json!("yes"), false));
        assert_eq!(client.get("gzip"), Some(json!(true)));
        assert!(!client.set("nonsense", &json!(1), false));
        assert_eq!(client.get("nonsense"), None);
    }

    #[test]
    fn test_iconv_switches_backend_unless_pinned() {
        let client = Client::new();
        assert_eq!(client.get("iconv"), Some(json!("encoding_rs")));
        client.pin_codec();
        assert!(!client.set("iconv", &json!("utf8"), false));
        assert_eq!(client.get("iconv"), Some(json!("encoding_rs")));
    }

    #[test]
    fn test_invalid_proxy_keeps_previous_agent_options() {
        let client = Client::new();
        assert!(client.set("agentOptions", &json!({"acceptInvalidCerts": true}), false));
        assert!(!client.set("agentOptions", &json!({"proxy": "::not a url::"}), false));
        assert_eq!(client.config().agent_options.proxy, None);
        assert!(client.config().agent_options.accept_invalid_certs);
    }

    #[test]
    fn test_reset_restores_defaults_and_clears_cookies() {
        let client = Client::new();
        client.set("timeout", &json!(1), false);
        client.set("browser", &json!("firefox"), false);
        client.import_cookies(&[CookieEntry {
            name: "sid".to_string(),
            value: "1".to_string(),
            domain: "example.com".to_string(),
            path: "/".to_string(),
            expires: -1.0,
            http_only: false,
            secure: false,
            same_site: crate::cookies::SameSite::None,
        }]);
        client.record_referer(&Url::parse("https://example.com/").unwrap());

        client.reset();
        assert_eq!(client.config(), ClientConfig::default());
        assert!(client.export_cookies().is_empty());
        assert_eq!(client.last_url(), None);
    }

    #[test]
    fn test_fork_is_isolated_but_shares_downloads() {
        let root = Client::new();
        root.set("timeout", &json!(1000), false);
        let child = root.fork();
        child.set("timeout", &json!(2000), false);
        assert_eq!(root.get("timeout"), Some(json!(1000)));
        assert_eq!(child.get("timeout"), Some(json!(2000)));
        assert!(Arc::ptr_eq(&root.download(), &child.download()));
    }

    #[tokio::test]
    async fn test_fetch_sync_refused_inside_runtime() {
        let client = Client::new();
        let err = client.fetch_sync("https://example.com/").unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::ErrorKind::UnsupportedEnvironment { .. }
        ));
    }

    #[test]
    fn test_invalid_url_fails_before_network() {
        let client = Client::new();
        let err = tokio_test::block_on(client.fetch("not a url")).unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::InvalidUrl { .. }));
        assert!(err.page().is_none());
    }
}
