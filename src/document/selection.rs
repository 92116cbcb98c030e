//! Query results with browser-emulation operations.

use scraper::ElementRef;
use tracing::debug;
use url::Url;

use super::form::{self, ControlKind, FieldSource, OnMissing, control_kind, owning_form};
use super::navigate::{self, Navigation};
use super::state::NodeKey;
use super::{Document, Page, parse_selector, submit};
use crate::error::{Error, ErrorKind, FetchError};
use crate::params::{FieldValue, Params};

/// Which kinds of URL [`Selection::url`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlFilter {
    /// Links written as absolute URLs (including `data:` URIs).
    pub absolute: bool,
    /// Links written as relative URLs, resolved against the document URL.
    pub relative: bool,
    /// Links with a non-HTTP scheme (`javascript:`, `mailto:`, ...), returned verbatim.
    pub invalid: bool,
}

impl Default for UrlFilter {
    fn default() -> Self {
        Self {
            absolute: true,
            relative: true,
            invalid: true,
        }
    }
}

/// Elements matched in a [`Document`], in document order.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    document: &'a Document,
    elements: Vec<ElementRef<'a>>,
}

impl<'a> Selection<'a> {
    pub(crate) fn new(document: &'a Document, elements: Vec<ElementRef<'a>>) -> Self {
        Self { document, elements }
    }

    /// Number of matched elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The matched elements.
    #[must_use]
    pub fn elements(&self) -> &[ElementRef<'a>] {
        &self.elements
    }

    /// Selection of the first element only.
    #[must_use]
    pub fn first(&self) -> Selection<'a> {
        self.eq(0)
    }

    /// Selection of the element at `index` (empty when out of range).
    #[must_use]
    pub fn eq(&self, index: usize) -> Selection<'a> {
        Selection::new(self.document, self.elements.get(index).copied().into_iter().collect())
    }

    /// Descendants of every element matching `selector`, deduplicated.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidSelector`] when the selector does not parse.
    pub fn find(&self, selector: &str) -> Result<Selection<'a>, Error> {
        let selector = parse_selector(selector)?;
        let mut seen = std::collections::HashSet::new();
        let found = self
            .elements
            .iter()
            .flat_map(|element| element.select(&selector))
            .filter(|element| seen.insert(NodeKey::of(element)))
            .collect();
        Ok(Selection::new(self.document, found))
    }

    /// Nearest ancestor-or-self of each element matching `selector`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidSelector`] when the selector does not parse.
    pub fn closest(&self, selector: &str) -> Result<Selection<'a>, Error> {
        let selector = parse_selector(selector)?;
        let mut seen = std::collections::HashSet::new();
        let found = self
            .elements
            .iter()
            .filter_map(|element| {
                std::iter::once(*element)
                    .chain(element.ancestors().filter_map(ElementRef::wrap))
                    .find(|candidate| selector.matches(candidate))
            })
            .filter(|element| seen.insert(NodeKey::of(element)))
            .collect();
        Ok(Selection::new(self.document, found))
    }

    /// Attribute of the first element.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.elements.first().and_then(|element| element.value().attr(name))
    }

    /// Concatenated text of all elements.
    #[must_use]
    pub fn text(&self) -> String {
        self.elements.iter().flat_map(|element| element.text()).collect()
    }

    /// Outer HTML of the first element.
    #[must_use]
    pub fn html(&self) -> Option<String> {
        self.elements.first().map(ElementRef::html)
    }

    /// Current value of the first form control, honoring emulated state.
    ///
    /// Checkboxes and radios report their `value` (default `on`) regardless of
    /// checked state; a multiple select reports a list.
    #[must_use]
    pub fn val(&self) -> Option<FieldValue> {
        let element = *self.elements.first()?;
        let state = self.document.state();
        match control_kind(&element)? {
            ControlKind::Text | ControlKind::Excluded => Some(FieldValue::Single(state.value(&element))),
            ControlKind::Checkbox | ControlKind::Radio => {
                Some(FieldValue::Single(form::checkable_value(&element)))
            }
            ControlKind::Select { multiple: true } => Some(FieldValue::Multiple(form::selected_values(
                &state, element, true,
            ))),
            ControlKind::Select { multiple: false } => form::selected_values(&state, element, false)
                .pop()
                .map(FieldValue::Single),
        }
    }

    /// Checked state of the first element.
    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.elements
            .first()
            .is_some_and(|element| form::is_checkable(element) && self.document.state().is_checked(element))
    }

    fn first_element(&self, operation: &str) -> Result<ElementRef<'a>, Error> {
        self.elements.first().copied().ok_or_else(|| {
            Error::new(ErrorKind::InvalidElement {
                reason: format!("{operation} on an empty selection"),
            })
        })
    }

    fn form(&self, operation: &str) -> Result<ElementRef<'a>, Error> {
        let element = self.first_element(operation)?;
        owning_form(element).ok_or_else(|| {
            Error::new(ErrorKind::InvalidElement {
                reason: format!("{operation} requires a form or an element inside one"),
            })
        })
    }

    // Navigation

    fn click_navigation(&self) -> Result<Navigation, Error> {
        let element = self.elements.first().copied().ok_or_else(|| {
            Error::new(ErrorKind::NotClickable {
                reason: "empty selection".to_string(),
            })
        })?;
        navigate::click(self.document, element)
    }

    /// Clicks the first element: follows a link or submits through a submit
    /// button.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotClickable`] before any network call when the element is
    /// neither; otherwise the navigation's own errors.
    pub async fn click(&self) -> Result<Page, FetchError> {
        let navigation = self.click_navigation()?;
        self.document.client().navigate(navigation).await
    }

    /// Blocking [`click`](Self::click).
    ///
    /// # Errors
    ///
    /// As [`click`](Self::click), plus [`ErrorKind::UnsupportedEnvironment`]
    /// inside an async runtime.
    pub fn click_sync(&self) -> Result<Page, FetchError> {
        let navigation = self.click_navigation()?;
        self.document.client().navigate_sync(navigation)
    }

    fn submit_navigation(&self, overrides: &Params) -> Result<Navigation, Error> {
        let form = self.form("submit")?;
        submit::prepare(self.document, form, overrides)
    }

    /// Submits the form (the first element, or the form containing it) with
    /// `overrides` merged over its current fields.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidElement`] when no form is involved; otherwise the
    /// navigation's own errors.
    pub async fn submit(&self, overrides: &Params) -> Result<Page, FetchError> {
        let navigation = self.submit_navigation(overrides)?;
        self.document.client().navigate(navigation).await
    }

    /// Blocking [`submit`](Self::submit).
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit), plus [`ErrorKind::UnsupportedEnvironment`]
    /// inside an async runtime.
    pub fn submit_sync(&self, overrides: &Params) -> Result<Page, FetchError> {
        let navigation = self.submit_navigation(overrides)?;
        self.document.client().navigate_sync(navigation)
    }

    // Form fields

    /// Parameters the form would submit right now.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidElement`] when no form is involved.
    pub fn fields(&self) -> Result<Params, Error> {
        let form = self.form("fields")?;
        Ok(form::fields(self.document, form))
    }

    /// Sets the field `name` of the form. Chainable.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidElement`] when no form is involved,
    /// [`ErrorKind::FieldNotFound`] with [`OnMissing::Throw`].
    pub fn set_field(
        &self,
        name: &str,
        value: impl Into<FieldSource>,
        on_missing: OnMissing,
    ) -> Result<&Self, Error> {
        let form = self.form("set_field")?;
        form::set_field(self.document, form, name, value.into(), on_missing)?;
        Ok(self)
    }

    /// Sets several fields with the same missing-field policy. Chainable.
    ///
    /// # Errors
    ///
    /// As [`set_field`](Self::set_field); fields before the failing one stay set.
    pub fn set_fields(&self, values: &Params, on_missing: OnMissing) -> Result<&Self, Error> {
        let form = self.form("set_fields")?;
        for (name, value) in values.iter() {
            form::set_field(self.document, form, name, value.clone().into(), on_missing)?;
        }
        Ok(self)
    }

    /// Checks every element.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidElement`] if any element is not a checkbox or radio.
    pub fn tick(&self) -> Result<&Self, Error> {
        navigate::set_checked(self.document, &self.elements, true)?;
        Ok(self)
    }

    /// Unchecks every element.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidElement`] if any element is not a checkbox or radio.
    pub fn untick(&self) -> Result<&Self, Error> {
        navigate::set_checked(self.document, &self.elements, false)?;
        Ok(self)
    }

    // Links and assets

    /// URLs referenced by the elements.
    ///
    /// Anchors, `<link>` and `<area>` use `href`; other elements use the first
    /// present attribute in `attrs` (default `["src"]`). Relative links are
    /// resolved against the document URL.
    #[must_use]
    pub fn url(&self, filter: UrlFilter, attrs: &[&str]) -> Vec<String> {
        let attrs: &[&str] = if attrs.is_empty() { &["src"] } else { attrs };
        self.elements
            .iter()
            .filter_map(|element| {
                let raw = link_attr(element, attrs)?;
                match classify(self.document, raw) {
                    LinkKind::Absolute(url) if filter.absolute => Some(url),
                    LinkKind::Relative(url) if filter.relative => Some(url),
                    LinkKind::Invalid(raw) if filter.invalid => Some(raw),
                    _ => None,
                }
            })
            .collect()
    }

    /// Queues every referenced asset on the client's download manager.
    ///
    /// Returns how many URLs were newly accepted (already-queued URLs are
    /// skipped).
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidParallelism`] or [`ErrorKind::UnsupportedEnvironment`]
    /// from the download manager.
    pub fn download(&self, attrs: &[&str]) -> Result<usize, Error> {
        let urls = self.url(
            UrlFilter {
                absolute: true,
                relative: true,
                invalid: false,
            },
            attrs,
        );
        let manager = self.document.client().download();
        let mut accepted = 0;
        for url in urls {
            if manager.enqueue(&url)? {
                accepted += 1;
            }
        }
        debug!(accepted, "queued downloads");
        Ok(accepted)
    }
}

fn link_attr<'a>(element: &ElementRef<'a>, attrs: &[&str]) -> Option<&'a str> {
    let value = element.value();
    let raw = match value.name() {
        "a" | "link" | "area" => value.attr("href"),
        _ => attrs.iter().find_map(|attr| value.attr(attr)),
    }?;
    let raw = raw.trim();
    (!raw.is_empty()).then_some(raw)
}

enum LinkKind {
    Absolute(String),
    Relative(String),
    Invalid(String),
}

fn classify(document: &Document, raw: &str) -> LinkKind {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https" | "data") => LinkKind::Absolute(url.to_string()),
        Ok(_) => LinkKind::Invalid(raw.to_string()),
        Err(_) => match document.resolve(raw) {
            Some(url) => LinkKind::Relative(url.to_string()),
            None => LinkKind::Invalid(raw.to_string()),
        },
    }
}
