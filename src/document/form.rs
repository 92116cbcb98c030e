//! Form field inspection and mutation.

use std::fmt;

use scraper::ElementRef;
use tracing::debug;

use super::Document;
use super::state::{FormState, NodeKey, SyntheticField, SyntheticKind};
use crate::error::{Error, ErrorKind};
use crate::params::{FieldValue, Params};

/// What `set_field` does when no field has the given name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnMissing {
    /// Do nothing.
    #[default]
    None,
    /// Append a hidden input (scalar) or checked checkboxes (list) to the form.
    Append,
    /// Fail with [`ErrorKind::FieldNotFound`].
    Throw,
}

/// A value for `set_field`, given directly or computed on use.
pub enum FieldSource {
    /// A concrete value.
    Value(FieldValue),
    /// A value computed when the field is set.
    Lazy(Box<dyn FnOnce() -> FieldValue>),
}

impl FieldSource {
    /// Wraps a closure that produces the value when the field is set.
    pub fn lazy(f: impl FnOnce() -> FieldValue + 'static) -> Self {
        Self::Lazy(Box::new(f))
    }

    pub(crate) fn resolve(self) -> FieldValue {
        match self {
            Self::Value(value) => value,
            Self::Lazy(f) => f(),
        }
    }
}

impl fmt::Debug for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<FieldValue> for FieldSource {
    fn from(value: FieldValue) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for FieldSource {
    fn from(value: &str) -> Self {
        Self::Value(value.into())
    }
}

impl From<String> for FieldSource {
    fn from(value: String) -> Self {
        Self::Value(value.into())
    }
}

impl From<Option<&str>> for FieldSource {
    fn from(value: Option<&str>) -> Self {
        Self::Value(value.into())
    }
}

impl From<Vec<String>> for FieldSource {
    fn from(values: Vec<String>) -> Self {
        Self::Value(values.into())
    }
}

impl From<Vec<&str>> for FieldSource {
    fn from(values: Vec<&str>) -> Self {
        Self::Value(values.into())
    }
}

impl<const N: usize> From<[&str; N]> for FieldSource {
    fn from(values: [&str; N]) -> Self {
        Self::Value(values.into())
    }
}

/// How a form control contributes to the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlKind {
    /// Text-like input, hidden input or textarea.
    Text,
    /// `<input type="checkbox">`.
    Checkbox,
    /// `<input type="radio">`.
    Radio,
    /// `<select>`.
    Select { multiple: bool },
    /// Submit and image inputs never contribute implicitly.
    Excluded,
}

/// `type` attribute of an input, lower-cased, defaulting to `text`.
pub(crate) fn input_type(element: &ElementRef<'_>) -> String {
    element
        .value()
        .attr("type")
        .map_or_else(|| "text".to_string(), |t| t.trim().to_ascii_lowercase())
}

pub(crate) fn control_kind(element: &ElementRef<'_>) -> Option<ControlKind> {
    match element.value().name() {
        "input" => Some(match input_type(element).as_str() {
            "checkbox" => ControlKind::Checkbox,
            "radio" => ControlKind::Radio,
            "submit" | "image" | "button" | "reset" => ControlKind::Excluded,
            _ => ControlKind::Text,
        }),
        "textarea" => Some(ControlKind::Text),
        "select" => Some(ControlKind::Select {
            multiple: element.value().attr("multiple").is_some(),
        }),
        _ => None,
    }
}

/// Whether the element is a checkbox or radio input.
pub(crate) fn is_checkable(element: &ElementRef<'_>) -> bool {
    matches!(
        control_kind(element),
        Some(ControlKind::Checkbox | ControlKind::Radio)
    )
}

/// The element itself if it is a form, else its nearest form ancestor.
pub(crate) fn owning_form<'a>(element: ElementRef<'a>) -> Option<ElementRef<'a>> {
    if element.value().name() == "form" {
        return Some(element);
    }
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "form")
}

/// Form controls under `form`, in document order.
pub(crate) fn controls<'a>(form: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    form.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| control_kind(element).is_some())
        .collect()
}

/// Value submitted by a checked checkbox or radio.
pub(crate) fn checkable_value(element: &ElementRef<'_>) -> String {
    element.value().attr("value").unwrap_or("on").to_string()
}

/// `<option>` children of a select, in document order.
pub(crate) fn options<'a>(select: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| element.value().name() == "option")
        .collect()
}

/// Value of an option: its `value` attribute, else its whitespace-collapsed text.
pub(crate) fn option_value(option: &ElementRef<'_>) -> String {
    match option.value().attr("value") {
        Some(value) => value.to_string(),
        None => option
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Values a select currently submits.
///
/// A single select without a selected option submits its first option.
pub(crate) fn selected_values(state: &FormState, select: ElementRef<'_>, multiple: bool) -> Vec<String> {
    let options = options(select);
    let selected: Vec<String> = options
        .iter()
        .filter(|option| state.is_selected(option))
        .map(option_value)
        .collect();
    if multiple {
        return selected;
    }
    match selected.last() {
        Some(value) => vec![value.clone()],
        None => options.first().map(option_value).into_iter().collect(),
    }
}

fn is_disabled(element: &ElementRef<'_>) -> bool {
    element.value().attr("disabled").is_some()
}

/// Computes the parameters a form would submit in its current state.
///
/// Nameless and disabled controls, button-type inputs (submit, image, button,
/// reset) and unchecked checkboxes/radios are skipped. A name seen once
/// (outside a multiple select) yields a scalar; repeated names and multiple
/// selects yield lists.
pub(crate) fn fields(document: &Document, form: ElementRef<'_>) -> Params {
    let state = document.state();
    let mut collected: Vec<(String, Vec<String>, bool)> = Vec::new();
    let mut push = |name: &str, values: Vec<String>, always_list: bool| {
        if let Some(entry) = collected.iter_mut().find(|(key, _, _)| key == name) {
            entry.1.extend(values);
            entry.2 |= always_list;
        } else {
            collected.push((name.to_string(), values, always_list));
        }
    };

    for control in controls(form) {
        let Some(name) = control.value().attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if is_disabled(&control) {
            continue;
        }
        match control_kind(&control) {
            Some(ControlKind::Text) => push(name, vec![state.value(&control)], false),
            Some(ControlKind::Checkbox | ControlKind::Radio) => {
                if state.is_checked(&control) {
                    push(name, vec![checkable_value(&control)], false);
                }
            }
            Some(ControlKind::Select { multiple }) => {
                let values = selected_values(&state, control, multiple);
                if multiple || !values.is_empty() {
                    push(name, values, multiple);
                }
            }
            Some(ControlKind::Excluded) | None => {}
        }
    }
    for field in state.synthetic(&form) {
        push(&field.name, vec![field.value.clone()], false);
    }

    collected
        .into_iter()
        .map(|(name, mut values, always_list)| {
            let value = if always_list || values.len() > 1 {
                FieldValue::Multiple(values)
            } else {
                FieldValue::Single(values.pop().unwrap_or_default())
            };
            (name, value)
        })
        .collect()
}

/// Sets the field(s) named `name` in `form`.
///
/// # Errors
///
/// [`ErrorKind::FieldNotFound`] when nothing is named `name` and `on_missing`
/// is [`OnMissing::Throw`].
pub(crate) fn set_field(
    document: &Document,
    form: ElementRef<'_>,
    name: &str,
    value: FieldSource,
    on_missing: OnMissing,
) -> Result<(), Error> {
    let targets: Vec<ElementRef<'_>> = controls(form)
        .into_iter()
        .filter(|control| control.value().attr("name") == Some(name))
        .filter(|control| control_kind(control) != Some(ControlKind::Excluded))
        .collect();

    let has_synthetic = document.state().synthetic(&form).iter().any(|f| f.name == name);
    if targets.is_empty() && !has_synthetic {
        match on_missing {
            OnMissing::None => {
                debug!(field = %name, "no such field; ignoring");
                return Ok(());
            }
            OnMissing::Throw => {
                return Err(Error::new(ErrorKind::FieldNotFound {
                    name: name.to_string(),
                }));
            }
            OnMissing::Append => {}
        }
    }

    let value = value.resolve();
    let mut state = document.state_mut();
    if targets.is_empty() {
        let kind = match value {
            FieldValue::Single(_) => SyntheticKind::Hidden,
            FieldValue::Multiple(_) => SyntheticKind::Checkbox,
        };
        let synthesized = value
            .values()
            .into_iter()
            .map(|v| SyntheticField {
                name: name.to_string(),
                value: v.to_string(),
                kind,
            })
            .collect();
        state.replace_synthetic(&form, name, synthesized);
        return Ok(());
    }

    let wanted = value.values();
    let radios: Vec<&ElementRef<'_>> = targets
        .iter()
        .filter(|t| control_kind(t) == Some(ControlKind::Radio))
        .collect();
    // A radio group only changes when one of its values was asked for.
    if let Some(chosen) = radios
        .iter()
        .find(|radio| wanted.contains(&checkable_value(radio).as_str()))
    {
        let chosen = NodeKey::of(chosen);
        for radio in &radios {
            state.set_checked(radio, NodeKey::of(radio) == chosen);
        }
    }

    let mut text_index = 0;
    for target in &targets {
        match control_kind(target) {
            Some(ControlKind::Checkbox) => {
                let checked = wanted.contains(&checkable_value(target).as_str());
                state.set_checked(target, checked);
            }
            Some(ControlKind::Select { multiple }) => {
                let mut matched = false;
                for option in options(*target) {
                    let hit = wanted.contains(&option_value(&option).as_str()) && (multiple || !matched);
                    matched |= hit;
                    state.set_selected(&option, hit);
                }
            }
            Some(ControlKind::Text) => {
                let next = match &value {
                    FieldValue::Single(v) => Some(v.clone()),
                    FieldValue::Multiple(values) => values.get(text_index).cloned(),
                };
                text_index += 1;
                if let Some(next) = next {
                    state.set_value(target, next);
                }
            }
            Some(ControlKind::Radio | ControlKind::Excluded) | None => {}
        }
    }
    Ok(())
}
