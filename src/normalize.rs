//! Text canonicalization used to build lookup keys.
//!
//! Canned overrides and the translation cache are both keyed by the
//! normalized source text, so incidental whitespace differences between
//! survey exports never cause a miss.

use regex::Regex;
use std::sync::OnceLock;

static IMAGE_ONLY_REGEX: OnceLock<Regex> = OnceLock::new();

/// Collapse every run of whitespace to a single space and trim both ends.
///
/// Case and punctuation are left untouched so proper nouns stay distinct keys.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the cell holds a single `<img ...>` tag and no visible text.
///
/// Such cells have nothing to translate and are never sent to the model.
pub fn is_image_only(text: &str) -> bool {
    let regex = IMAGE_ONLY_REGEX
        .get_or_init(|| Regex::new(r"(?is)^\s*<img\b[^>]*>\s*$").unwrap());
    regex.is_match(text)
}
