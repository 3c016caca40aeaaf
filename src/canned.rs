//! Canned (human-approved) translations.
//!
//! The file is a two-level JSON object:
//!
//! ```json
//! {
//!     "Strongly agree": { "it": "Fortemente d'accordo", "de": "Stimme voll zu" }
//! }
//! ```
//!
//! Canned entries are authoritative: they are loaded once, never modified,
//! and always win over cached or model output.

use crate::normalize::normalize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CannedError {
    #[error("failed to read canned translations from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed canned translations: {0}")]
    MalformedOverrideData(String),

    #[error("malformed canned entry for '{source_text}': {reason}")]
    MalformedOverrideEntry { source_text: String, reason: String },
}

/// Read-only `normalized source -> {language -> translation}` table.
#[derive(Debug, Clone, Default)]
pub struct CannedTable {
    entries: HashMap<String, HashMap<String, String>>,
}

impl CannedTable {
    /// An empty table (no overrides).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load canned translations from disk. A missing file yields an empty table.
    pub fn load(path: &Path) -> Result<Self, CannedError> {
        if !path.exists() {
            debug!("No canned translations at {}, using empty table", path.display());
            return Ok(Self::empty());
        }

        let content = std::fs::read_to_string(path).map_err(|source| CannedError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let table = Self::from_json_str(&content)?;
        debug!(
            "Loaded {} canned source strings from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse and validate a canned translation document.
    pub fn from_json_str(content: &str) -> Result<Self, CannedError> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|e| CannedError::MalformedOverrideData(format!("invalid JSON: {}", e)))?;

        let Value::Object(top) = raw else {
            return Err(CannedError::MalformedOverrideData(
                "top level must be a JSON object".to_string(),
            ));
        };

        let mut entries: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (source_text, bundle) in top {
            let bundle = match bundle {
                Value::Object(map) => map,
                other => {
                    return Err(CannedError::MalformedOverrideEntry {
                        reason: format!("expected an object, got {}", json_kind(&other)),
                        source_text,
                    });
                }
            };

            let mut by_lang = HashMap::with_capacity(bundle.len());
            for (lang, translation) in bundle {
                match translation {
                    Value::String(text) => {
                        by_lang.insert(lang, text);
                    }
                    other => {
                        return Err(CannedError::MalformedOverrideEntry {
                            reason: format!(
                                "translation for '{}' must be a string, got {}",
                                lang,
                                json_kind(&other)
                            ),
                            source_text,
                        });
                    }
                }
            }

            entries
                .entry(normalize(&source_text))
                .or_default()
                .extend(by_lang);
        }

        Ok(Self { entries })
    }

    /// Canned translation for `source_text` in `language`, if one exists.
    ///
    /// Empty translations count as absent.
    pub fn lookup(&self, source_text: &str, language: &str) -> Option<&str> {
        self.entries
            .get(&normalize(source_text))
            .and_then(|by_lang| by_lang.get(language))
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Number of distinct (normalized) source strings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
