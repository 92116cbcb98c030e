//! Conversion backends.
//!
//! A [`Codec`] converts between a named charset and UTF-8. The service keeps one
//! active backend and can swap it at runtime by name.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use encoding_rs::{Encoding, SHIFT_JIS, UTF_8};

/// Labels that mean Shift_JIS and must be handled as its CP932 superset.
const SHIFT_JIS_LABELS: &[&str] = &[
    "shift_jis",
    "shift-jis",
    "sjis",
    "x-sjis",
    "ms_kanji",
    "csshiftjis",
    "windows-31j",
    "cp932",
    "ms932",
];

/// Code points where the JIS X 0208 table and CP932 disagree for the same bytes.
/// Left: what the JIS mapping produces. Right: what CP932 produces.
const CP932_REMAP: &[(char, char)] = &[
    ('\u{301C}', '\u{FF5E}'), // WAVE DASH -> FULLWIDTH TILDE
    ('\u{2016}', '\u{2225}'), // DOUBLE VERTICAL LINE -> PARALLEL TO
];

/// A charset conversion backend.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Backend name, as accepted by the `iconv` configuration property.
    fn name(&self) -> &'static str;

    /// Whether the backend can convert the given charset label.
    fn supports(&self, label: &str) -> bool;

    /// Decodes `bytes` in charset `label` into UTF-8 text.
    ///
    /// Returns `None` when the label is unsupported.
    fn decode(&self, label: &str, bytes: &[u8]) -> Option<String>;

    /// Encodes UTF-8 `text` into charset `label`.
    ///
    /// Returns `None` when the label is unsupported.
    fn encode(&self, label: &str, text: &str) -> Option<Vec<u8>>;
}

/// Normalizes a charset label for comparisons.
pub(crate) fn normalize_label(label: &str) -> String {
    label.trim().to_ascii_lowercase()
}

pub(crate) fn is_utf8_label(label: &str) -> bool {
    matches!(normalize_label(label).as_str(), "utf-8" | "utf8" | "unicode-1-1-utf-8")
}

pub(crate) fn is_shift_jis_label(label: &str) -> bool {
    SHIFT_JIS_LABELS.contains(&normalize_label(label).as_str())
}

/// WHATWG encodings through `encoding_rs`. Default backend.
#[derive(Debug, Default)]
pub struct EncodingRsCodec;

impl EncodingRsCodec {
    fn lookup(label: &str) -> Option<&'static Encoding> {
        if is_shift_jis_label(label) {
            return Some(SHIFT_JIS);
        }
        Encoding::for_label(normalize_label(label).as_bytes())
    }
}

impl Codec for EncodingRsCodec {
    fn name(&self) -> &'static str {
        "encoding_rs"
    }

    fn supports(&self, label: &str) -> bool {
        Self::lookup(label).is_some()
    }

    fn decode(&self, label: &str, bytes: &[u8]) -> Option<String> {
        let encoding = Self::lookup(label)?;
        let (text, _, _) = encoding.decode(bytes);
        if encoding == SHIFT_JIS {
            return Some(remap_cp932_decoded(text));
        }
        Some(text.into_owned())
    }

    fn encode(&self, label: &str, text: &str) -> Option<Vec<u8>> {
        let encoding = Self::lookup(label)?;
        let text = if encoding == SHIFT_JIS {
            Cow::Owned(remap_cp932_for_encode(text))
        } else {
            Cow::Borrowed(text)
        };
        // encoding_rs encodes UTF-16 labels as UTF-8 (WHATWG output rule).
        let (bytes, _, _) = encoding.output_encoding().encode(&text);
        Some(bytes.into_owned())
    }
}

/// Restricted backend that only converts UTF-8 and ASCII.
#[derive(Debug, Default)]
pub struct Utf8OnlyCodec;

impl Codec for Utf8OnlyCodec {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn supports(&self, label: &str) -> bool {
        is_utf8_label(label) || matches!(normalize_label(label).as_str(), "us-ascii" | "ascii")
    }

    fn decode(&self, label: &str, bytes: &[u8]) -> Option<String> {
        if !self.supports(label) {
            return None;
        }
        let (text, _, _) = UTF_8.decode(bytes);
        Some(text.into_owned())
    }

    fn encode(&self, label: &str, text: &str) -> Option<Vec<u8>> {
        self.supports(label).then(|| text.as_bytes().to_vec())
    }
}

/// Names of the built-in backends.
pub const BACKENDS: &[&str] = &["encoding_rs", "utf8"];

/// Looks up a built-in backend by name.
#[must_use]
pub fn backend_by_name(name: &str) -> Option<Arc<dyn Codec>> {
    match normalize_label(name).as_str() {
        "encoding_rs" | "encoding-rs" => Some(Arc::new(EncodingRsCodec)),
        "utf8" | "utf-8" => Some(Arc::new(Utf8OnlyCodec)),
        _ => None,
    }
}

fn remap_cp932_decoded(text: Cow<'_, str>) -> String {
    if !text.chars().any(|c| CP932_REMAP.iter().any(|(jis, _)| *jis == c)) {
        return text.into_owned();
    }
    text.chars()
        .map(|c| {
            CP932_REMAP
                .iter()
                .find(|(jis, _)| *jis == c)
                .map_or(c, |(_, cp932)| *cp932)
        })
        .collect()
}

fn remap_cp932_for_encode(text: &str) -> String {
    text.chars()
        .map(|c| {
            CP932_REMAP
                .iter()
                .find(|(_, cp932)| *cp932 == c)
                .map_or(c, |(jis, _)| *jis)
        })
        .collect()
}
