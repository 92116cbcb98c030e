//! Ordered request/form parameters.
//!
//! Form submission order follows document order, so parameters are kept in an
//! insertion-ordered list rather than a hash map. Keys are unique; inserting an
//! existing key replaces its value in place.

use serde::{Deserialize, Serialize};

/// A single parameter value: one string, or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Scalar value.
    Single(String),
    /// Multi-valued field (checkbox groups, `<select multiple>`, same-name inputs).
    Multiple(Vec<String>),
}

impl FieldValue {
    /// Returns the values as a slice-like list (a scalar yields one element).
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) => vec![value.as_str()],
            Self::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// Returns the scalar value, or the first value of a list.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::Multiple(values) => values.first().map(String::as_str),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Option<&str>> for FieldValue {
    /// `None` serializes as an empty value (`name=`).
    fn from(value: Option<&str>) -> Self {
        Self::Single(value.unwrap_or_default().to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multiple(values)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Multiple(values.into_iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldValue {
    fn from(values: [&str; N]) -> Self {
        Self::Multiple(values.iter().map(ToString::to_string).collect())
    }
}

/// Insertion-ordered parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Vec<(String, FieldValue)>);

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a value, keeping the original position of an existing key.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Appends one value under `name`, turning an existing scalar into a list.
    pub fn push(&mut self, name: &str, value: String) {
        let Some((_, slot)) = self.0.iter_mut().find(|(key, _)| key == name) else {
            self.0.push((name.to_string(), FieldValue::Single(value)));
            return;
        };
        match slot {
            FieldValue::Multiple(values) => values.push(value),
            FieldValue::Single(previous) => {
                let previous = std::mem::take(previous);
                *slot = FieldValue::Multiple(vec![previous, value]);
            }
        }
    }

    /// Returns the value stored under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Overlays `other` on top of `self`: keys from `other` win, new keys are appended.
    pub fn merge(&mut self, other: &Params) {
        for (name, value) in &other.0 {
            self.insert(name.clone(), value.clone());
        }
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no keys are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
