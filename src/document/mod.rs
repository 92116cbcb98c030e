//! Parsed documents and the browser-emulation operations on them.
//!
//! A [`Page`] is the result of one navigation: response metadata, the UTF-8
//! body, and a [`Document`]. The document carries its immutable
//! [`NavigationContext`] (where it came from, which charset it was decoded
//! from) and is queried through [`Selection`], which exposes click, submit,
//! field, tick and download operations.

mod build;
pub(crate) mod form;
pub(crate) mod navigate;
mod selection;
pub(crate) mod state;
pub(crate) mod submit;

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use url::Url;

use crate::client::Client;
use crate::error::{Error, ErrorKind};

pub(crate) use build::build;
pub use form::{FieldSource, OnMissing};
pub use selection::{Selection, UrlFilter};
use state::FormState;

/// Where a document came from and how it was decoded. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationContext {
    /// Final URL after redirects; base for relative URL resolution.
    pub resolved_url: Url,
    /// Charset the body was converted from; `None` means it was read as UTF-8.
    pub detected_encoding: Option<String>,
    /// Whether the body was parsed as XML.
    pub is_xml_mode: bool,
}

/// Response metadata of the final hop.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL.
    pub url: Url,
    /// Cookies applicable to the final URL, frozen at response time.
    pub cookies: BTreeMap<String, String>,
    /// Number of redirects followed.
    pub redirects: u8,
}

/// A parsed document bound to the client that fetched it.
pub struct Document {
    html: Html,
    context: NavigationContext,
    client: Client,
    state: RefCell<FormState>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("context", &self.context)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Document {
    pub(crate) fn new(html: Html, context: NavigationContext, client: Client) -> Self {
        Self {
            html,
            context,
            client,
            state: RefCell::new(FormState::default()),
        }
    }

    /// Runs a CSS selector over the whole document.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidSelector`] when the selector does not parse.
    pub fn select(&self, selector: &str) -> Result<Selection<'_>, Error> {
        let selector = parse_selector(selector)?;
        Ok(Selection::new(self, self.html.select(&selector).collect()))
    }

    /// Selection holding the root element.
    #[must_use]
    pub fn root(&self) -> Selection<'_> {
        Selection::new(self, vec![self.html.root_element()])
    }

    /// The navigation context attached at creation.
    #[must_use]
    pub fn context(&self) -> &NavigationContext {
        &self.context
    }

    /// The underlying parse tree.
    #[must_use]
    pub fn html(&self) -> &Html {
        &self.html
    }

    /// The client that fetched this document; navigations go through it.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolves `href` against the document URL.
    #[must_use]
    pub fn resolve(&self, href: &str) -> Option<Url> {
        self.context.resolved_url.join(href.trim()).ok()
    }

    pub(crate) fn state(&self) -> Ref<'_, FormState> {
        self.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, FormState> {
        self.state.borrow_mut()
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, Error> {
    Selector::parse(selector).map_err(|_| {
        Error::new(ErrorKind::InvalidSelector {
            selector: selector.to_string(),
        })
    })
}

/// Result of a successful (or soft-failed) navigation.
#[derive(Debug)]
pub struct Page {
    /// Response metadata.
    pub response: ResponseMeta,
    /// Body converted to UTF-8.
    pub body: String,
    /// Parsed document.
    pub document: Document,
}

impl Page {
    /// Shorthand for `document.select`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidSelector`] when the selector does not parse.
    pub fn select(&self, selector: &str) -> Result<Selection<'_>, Error> {
        self.document.select(selector)
    }

    /// Final URL of the navigation.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.response.url
    }

    /// HTTP status of the final hop.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.response.status
    }
}
