//! Text canonicalization shared by fingerprinting and comparisons.
//!
//! Characters are decomposed (NFD) and combining marks are dropped, so
//! `'Ê'`, `'ê'`, `'é'` and `'ë'` all collapse to `'e'`. Case folding is left
//! to the caller.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Strip accents from `text`, returning its unaccented canonical form.
pub fn unaccent(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Canonicalize an optional text value. Absent input becomes the empty string.
pub fn canonicalize(text: Option<&str>) -> String {
    text.map(unaccent).unwrap_or_default()
}
