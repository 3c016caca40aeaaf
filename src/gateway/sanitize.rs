//! Best-effort cleanup of raw model output before JSON parsing.
//!
//! Models asked for a JSON object still occasionally wrap it in Markdown
//! fences, add a sentence before it, use typographic quotes, or put literal
//! `"` characters inside translated values. These passes fix the common cases.
//!
//! The quote-escaping pass is a heuristic and is lossy: a value that itself
//! contains `", "` will be split at that point. Anything still unparseable
//! after cleaning goes through the gateway's one-shot repair request.

use regex::{Captures, Regex};
use std::sync::OnceLock;

static FENCE_REGEX: OnceLock<Regex> = OnceLock::new();
static STRING_VALUE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Run every cleaning pass in order.
pub fn clean_model_output(raw: &str) -> String {
    let payload = extract_json_payload(raw);
    let single_line = payload.replace("\r\n", " ").replace(['\n', '\r'], " ");
    escape_unescaped_quotes(&single_line)
}

/// Strip code fences, keep the text between the first `{` and the last `}`,
/// and straighten curly quotes.
pub fn extract_json_payload(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        let fence = FENCE_REGEX
            .get_or_init(|| Regex::new(r"(?s)\A```(?i:json)?\s*(.*?)\s*```").unwrap());
        if let Some(inner) = fence.captures(text).and_then(|c| c.get(1)) {
            text = inner.as_str().trim();
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            text = &text[start..=end];
        }
    }

    text.replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

/// Escape bare `"` characters that sit inside JSON string values.
///
/// A value is taken to run from `: "` up to the first `"` that is followed by
/// `, "` or `}`; quotes in between that are not already escaped get a backslash.
pub fn escape_unescaped_quotes(text: &str) -> String {
    let regex = STRING_VALUE_REGEX.get_or_init(|| {
        Regex::new(r#"(?s)(:\s*")(.*?)("\s*(?:,\s*"|\}))"#).unwrap()
    });

    regex
        .replace_all(text, |caps: &Captures| {
            format!("{}{}{}", &caps[1], escape_inner(&caps[2]), &caps[3])
        })
        .into_owned()
}

fn escape_inner(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut escaped = false;
    for c in value.chars() {
        if c == '"' && !escaped {
            out.push('\\');
        }
        out.push(c);
        escaped = c == '\\' && !escaped;
    }
    out
}
