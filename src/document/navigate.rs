//! Click and checkbox/radio emulation.

use std::collections::HashSet;

use reqwest::Method;
use scraper::ElementRef;
use tracing::debug;

use super::Document;
use super::form::{ControlKind, control_kind, input_type, is_checkable, owning_form};
use super::state::NodeKey;
use super::submit;
use crate::error::{Error, ErrorKind};
use crate::params::Params;
use crate::request::Payload;

/// A navigation derived from a click or submit, ready to be executed.
#[derive(Debug)]
pub(crate) struct Navigation {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) payload: Payload,
}

/// Resolves what clicking `element` does.
///
/// # Errors
///
/// [`ErrorKind::NotClickable`] for anything other than a link or a submit
/// button inside a form.
pub(crate) fn click(document: &Document, element: ElementRef<'_>) -> Result<Navigation, Error> {
    let name = element.value().name();
    if name == "a" {
        let href = element.value().attr("href").ok_or_else(|| not_clickable("link has no href"))?;
        let url = document.resolve(href).ok_or_else(|| {
            Error::new(ErrorKind::InvalidUrl {
                url: href.to_string(),
            })
        })?;
        debug!(url = %url, "clicking link");
        return Ok(Navigation {
            method: Method::GET,
            url: url.to_string(),
            payload: Payload::default(),
        });
    }

    let is_image = name == "input" && input_type(&element) == "image";
    let is_submit = match name {
        "input" => matches!(input_type(&element).as_str(), "submit" | "image"),
        "button" => element
            .value()
            .attr("type")
            .is_none_or(|t| t.trim().eq_ignore_ascii_case("submit")),
        _ => false,
    };
    if !is_submit {
        return Err(not_clickable(&format!("<{name}> is neither a link nor a submit button")));
    }
    let form = owning_form(element).ok_or_else(|| not_clickable("submit button is outside any form"))?;

    let mut seed = Params::new();
    if let Some(button_name) = element.value().attr("name").filter(|n| !n.is_empty()) {
        if is_image {
            seed.insert(format!("{button_name}.x"), "0");
            seed.insert(format!("{button_name}.y"), "0");
        } else {
            seed.insert(button_name, element.value().attr("value").unwrap_or_default());
        }
    }
    debug!(button = ?element.value().attr("name"), "clicking submit button");
    submit::prepare(document, form, &seed)
}

fn not_clickable(reason: &str) -> Error {
    Error::new(ErrorKind::NotClickable {
        reason: reason.to_string(),
    })
}

/// Checks every element, then checks or unchecks them.
///
/// Ticking a radio unchecks the rest of its group (same name in the same form).
/// When one call ticks several radios of a group, the first one in selection
/// order wins.
///
/// # Errors
///
/// [`ErrorKind::InvalidElement`] if any element is not a checkbox or radio; no
/// element is changed in that case.
pub(crate) fn set_checked(document: &Document, elements: &[ElementRef<'_>], checked: bool) -> Result<(), Error> {
    if let Some(bad) = elements.iter().find(|element| !is_checkable(element)) {
        return Err(Error::new(ErrorKind::InvalidElement {
            reason: format!(
                "<{}> is not a checkbox or radio input",
                bad.value().name()
            ),
        }));
    }

    let mut ticked_groups: HashSet<(Option<NodeKey>, String)> = HashSet::new();
    let mut state = document.state_mut();
    for element in elements {
        if control_kind(element) != Some(ControlKind::Radio) || !checked {
            state.set_checked(element, checked);
            continue;
        }
        let name = element.value().attr("name").unwrap_or_default().to_string();
        let form = owning_form(*element);
        if !ticked_groups.insert((form.as_ref().map(NodeKey::of), name.clone())) {
            continue;
        }
        for member in radio_group(document, form, &name) {
            state.set_checked(&member, false);
        }
        state.set_checked(element, true);
    }
    Ok(())
}

/// Radios named `name` in `form`, or outside any form when `form` is `None`.
fn radio_group<'a>(document: &'a Document, form: Option<ElementRef<'a>>, name: &str) -> Vec<ElementRef<'a>> {
    let scope = form.unwrap_or_else(|| document.html().root_element());
    scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| control_kind(element) == Some(ControlKind::Radio))
        .filter(|element| element.value().attr("name").unwrap_or_default() == name)
        .filter(|element| form.is_some() || owning_form(*element).is_none())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use scraper::Html;
    use url::Url;

    use super::*;
    use crate::client::Client;
    use crate::document::NavigationContext;
    use crate::document::form::fields;
    use crate::params::FieldValue;

    fn document(html: &str) -> Document {
        Document::new(
            Html::parse_document(html),
            NavigationContext {
                resolved_url: Url::parse("https://example.com/dir/page.html").unwrap(),
                detected_encoding: None,
                is_xml_mode: false,
            },
            Client::new(),
        )
    }

    fn all<'a>(doc: &'a Document, css: &str) -> Vec<ElementRef<'a>> {
        doc.html()
            .select(&scraper::Selector::parse(css).unwrap())
            .collect()
    }

    #[test]
    fn test_click_link_resolves_href() {
        let doc = document(r#"<a href="../next?p=2">next</a>"#);
        let nav = click(&doc, all(&doc, "a")[0]).unwrap();
        assert_eq!(nav.method, Method::GET);
        assert_eq!(nav.url, "https://example.com/next?p=2");
    }

    #[test]
    fn test_click_non_clickable() {
        let doc = document(r#"<p>text</p><form><button type="button">x</button></form><button>lone</button>"#);
        for css in ["p", "button[type=button]"] {
            let err = click(&doc, all(&doc, css)[0]).unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::NotClickable { .. }), "{css}");
        }
        let err = click(&doc, all(&doc, "button")[1]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NotClickable { reason } if reason.contains("outside")));
    }

    #[test]
    fn test_click_submit_seeds_button_value() {
        let doc = document(
            r#"<form action="/post" method="post"><input name="q" value="x">
               <input type="submit" name="op" value="Search"></form>"#,
        );
        let nav = click(&doc, all(&doc, "input[type=submit]")[0]).unwrap();
        assert_eq!(nav.method, Method::POST);
        assert_eq!(nav.url, "https://example.com/post");
        match nav.payload {
            Payload::Encoded { text, .. } => assert_eq!(text, "q=x&op=Search"),
            Payload::Params(_) => panic!("Expected encoded payload"),
        }
    }

    #[test]
    fn test_click_image_seeds_coordinates() {
        let doc = document(r#"<form action="/go"><input type="image" name="map" src="m.png"></form>"#);
        let nav = click(&doc, all(&doc, "input")[0]).unwrap();
        match nav.payload {
            Payload::Encoded { text, .. } => assert_eq!(text, "map.x=0&map.y=0"),
            Payload::Params(_) => panic!("Expected encoded payload"),
        }
    }

    #[test]
    fn test_tick_rejects_mixed_selection_without_mutation() {
        let doc = document(r#"<form><input type="checkbox" name="a"><input name="b"></form>"#);
        let elements = all(&doc, "input");
        let err = set_checked(&doc, &elements, true).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidElement { .. }));
        assert!(!doc.state().is_checked(&elements[0]));
    }

    #[test]
    fn test_tick_checkbox_is_idempotent() {
        let doc = document(r#"<form><input type="checkbox" name="a" value="1"></form>"#);
        let form = all(&doc, "form")[0];
        let boxes = all(&doc, "input");
        set_checked(&doc, &boxes, true).unwrap();
        let once = fields(&doc, form);
        set_checked(&doc, &boxes, true).unwrap();
        assert_eq!(fields(&doc, form), once);
        assert_eq!(once.get("a"), Some(&FieldValue::from("1")));
    }

    #[test]
    fn test_radio_group_exclusivity_first_wins() {
        let doc = document(
            r#"<form><input type="radio" name="r" value="1" checked>
               <input type="radio" name="r" value="2"><input type="radio" name="r" value="3"></form>
               <form><input type="radio" name="r" value="other" checked></form>"#,
        );
        let radios = all(&doc, "input");
        set_checked(&doc, &[radios[2], radios[1]], true).unwrap();
        let state = doc.state();
        let checked: Vec<bool> = radios.iter().map(|r| state.is_checked(r)).collect();
        // The radio in the second form is a different group.
        assert_eq!(checked, vec![false, false, true, true]);
    }

    #[test]
    fn test_untick_radio() {
        let doc = document(r#"<input type="radio" name="r" checked>"#);
        let radios = all(&doc, "input");
        set_checked(&doc, &radios, false).unwrap();
        assert!(!doc.state().is_checked(&radios[0]));
    }
}
