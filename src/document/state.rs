//! Mutable form state layered over the immutable parse tree.
//!
//! `tick`, `set_field` and friends never touch the tree. They record checked,
//! selected and value overrides per element, plus synthetic inputs appended to
//! a form, and every read consults this overlay before the markup.

use std::collections::HashMap;

use scraper::ElementRef;

/// Identity of an element within one parsed document.
///
/// Derived from the element's address in the tree arena, which is stable
/// because the tree is never mutated after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeKey(usize);

impl NodeKey {
    pub(crate) fn of(element: &ElementRef<'_>) -> Self {
        Self(std::ptr::from_ref(element.value()) as usize)
    }
}

/// Kind of an input synthesized by `set_field` with [`OnMissing::Append`](crate::OnMissing::Append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyntheticKind {
    /// `<input type="hidden">`.
    Hidden,
    /// Checked `<input type="checkbox">`.
    Checkbox,
}

/// An input appended to a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntheticField {
    pub(crate) name: String,
    pub(crate) value: String,
    pub(crate) kind: SyntheticKind,
}

#[derive(Debug, Default)]
pub(crate) struct FormState {
    checked: HashMap<NodeKey, bool>,
    selected: HashMap<NodeKey, bool>,
    values: HashMap<NodeKey, String>,
    synthetic: HashMap<NodeKey, Vec<SyntheticField>>,
}

impl FormState {
    /// Checked state of a checkbox or radio.
    pub(crate) fn is_checked(&self, element: &ElementRef<'_>) -> bool {
        self.checked
            .get(&NodeKey::of(element))
            .copied()
            .unwrap_or_else(|| element.value().attr("checked").is_some())
    }

    pub(crate) fn set_checked(&mut self, element: &ElementRef<'_>, checked: bool) {
        self.checked.insert(NodeKey::of(element), checked);
    }

    /// Selected state of an `<option>`.
    pub(crate) fn is_selected(&self, option: &ElementRef<'_>) -> bool {
        self.selected
            .get(&NodeKey::of(option))
            .copied()
            .unwrap_or_else(|| option.value().attr("selected").is_some())
    }

    pub(crate) fn set_selected(&mut self, option: &ElementRef<'_>, selected: bool) {
        self.selected.insert(NodeKey::of(option), selected);
    }

    /// Current value of a text-like input or textarea.
    pub(crate) fn value(&self, element: &ElementRef<'_>) -> String {
        if let Some(value) = self.values.get(&NodeKey::of(element)) {
            return value.clone();
        }
        if element.value().name() == "textarea" {
            return element.text().collect();
        }
        element.value().attr("value").unwrap_or_default().to_string()
    }

    pub(crate) fn set_value(&mut self, element: &ElementRef<'_>, value: String) {
        self.values.insert(NodeKey::of(element), value);
    }

    /// Inputs appended to `form`, in append order.
    pub(crate) fn synthetic(&self, form: &ElementRef<'_>) -> &[SyntheticField] {
        self.synthetic
            .get(&NodeKey::of(form))
            .map_or(&[], Vec::as_slice)
    }

    /// Replaces every synthetic input named `name` in `form` with `fields`.
    pub(crate) fn replace_synthetic(&mut self, form: &ElementRef<'_>, name: &str, fields: Vec<SyntheticField>) {
        let list = self.synthetic.entry(NodeKey::of(form)).or_default();
        let position = list.iter().position(|field| field.name == name);
        list.retain(|field| field.name != name);
        let at = position.unwrap_or(list.len()).min(list.len());
        list.splice(at..at, fields);
    }
}
