//! Charset detection for raw response bodies.
//!
//! Detection order:
//! 1. Byte order mark
//! 2. Statistical guess (`chardetng`), accepted only at confidence ≥ 0.99
//! 3. `charset=` hint inside the document's `<head>` block

use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use regex::bytes::Regex;
use tracing::debug;

/// Minimum confidence for a statistical guess to be accepted.
pub const MIN_CONFIDENCE: f32 = 0.99;

static HEAD_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<head[\s>].*?</head>").ok());

static CHARSET_HINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)charset\s*=\s*["']?\s*([\w.:\-]+)"#).ok());

/// A statistical guess and how much to trust it.
#[derive(Debug, Clone, PartialEq)]
pub struct Guess {
    /// Lower-cased encoding name.
    pub encoding: String,
    /// Confidence between 0.0 and 1.0.
    pub confidence: f32,
}

/// Detects the charset of `bytes`, returning a lower-cased name.
///
/// Returns `None` when neither the statistical guess nor a `<head>` hint is
/// usable; callers then treat the body as UTF-8.
#[must_use]
pub fn detect(bytes: &[u8]) -> Option<String> {
    if let Some(guess) = guess(bytes)
        && guess.confidence >= MIN_CONFIDENCE
    {
        debug!(encoding = %guess.encoding, confidence = guess.confidence, "statistical charset guess accepted");
        return Some(guess.encoding);
    }
    let hint = head_charset_hint(bytes);
    if let Some(hint) = &hint {
        debug!(encoding = %hint, "charset taken from <head> hint");
    }
    hint
}

/// Runs the statistical detector.
///
/// Confidence is derived from two facts: the guessed encoding must decode the
/// input without a single malformed sequence, and each non-ASCII character
/// halves the remaining doubt. Pure ASCII input carries no evidence at all.
#[must_use]
pub fn guess(bytes: &[u8]) -> Option<Guess> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some(Guess {
            encoding: encoding.name().to_ascii_lowercase(),
            confidence: 1.0,
        });
    }
    if bytes.is_ascii() {
        return None;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    let decoded = encoding.decode_without_bom_handling_and_without_replacement(bytes)?;
    let evidence = decoded.chars().filter(|c| !c.is_ascii()).count();
    let evidence = i32::try_from(evidence).unwrap_or(i32::MAX);
    Some(Guess {
        encoding: encoding.name().to_ascii_lowercase(),
        confidence: 1.0 - 0.5_f32.powi(evidence),
    })
}

/// Scans the `<head>` block for a `charset=` declaration.
#[must_use]
pub fn head_charset_hint(bytes: &[u8]) -> Option<String> {
    let head_re = HEAD_BLOCK.as_ref()?;
    let charset_re = CHARSET_HINT.as_ref()?;
    let head = head_re.find(bytes)?;
    let caps = charset_re.captures(head.as_bytes())?;
    let name = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    Some(name.to_ascii_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_utf8_japanese() {
        let html = "<html><head><title>夏目漱石「私の個人主義」</title></head><body>本文です。</body></html>";
        assert_eq!(detect(html.as_bytes()).as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_detect_ascii_without_hint_is_none() {
        assert_eq!(detect(b"<html><body>plain</body></html>"), None);
    }

    #[test]
    fn test_detect_falls_back_to_meta_charset() {
        let html = br#"<html><head><meta charset="EUC-JP"><title>x</title></head></html>"#;
        assert_eq!(detect(html).as_deref(), Some("euc-jp"));
    }

    #[test]
    fn test_http_equiv_content_type_hint() {
        let html = br#"<HEAD><META HTTP-EQUIV="Content-Type" CONTENT="text/html; charset=Shift_JIS"></HEAD>"#;
        assert_eq!(head_charset_hint(html).as_deref(), Some("shift_jis"));
    }

    #[test]
    fn test_hint_outside_head_is_ignored() {
        let html = br#"<html><head><title>t</title></head><body>charset=euc-jp</body></html>"#;
        assert_eq!(head_charset_hint(html), None);
    }

    #[test]
    fn test_bom_is_certain() {
        let bytes = [0xEF, 0xBB, 0xBF, b'a'];
        let guess = guess(&bytes).unwrap();
        assert_eq!(guess.encoding, "utf-8");
        assert!((guess.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_single_non_ascii_char_is_not_confident() {
        let guess = guess("caf\u{e9}".as_bytes()).unwrap();
        assert!(guess.confidence < MIN_CONFIDENCE);
    }

    #[test]
    fn test_shift_jis_body_is_detected() {
        let text = "<html><head><title>吾輩は猫である</title></head><body>\
            吾輩は猫である。名前はまだ無い。どこで生れたかとんと見当がつかぬ。\
            何でも薄暗いじめじめした所でニャーニャー泣いていた事だけは記憶している。\
            </body></html>";
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(text);
        assert_eq!(detect(&bytes).as_deref(), Some("shift_jis"));
    }
}
