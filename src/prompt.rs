//! Prompt template for one translation batch.
//!
//! Templates use three placeholders: `{language}`, `{skeleton}` and
//! `{payload_lines}`. A literal brace is written doubled (`{{` / `}}`).

use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_TEMPLATE: &str = r#"You are a professional translator working on survey questionnaires.

Translate every English item below into the language with code "{language}".

Rules:
- Keep the meaning, tone and register of the original. Survey answers should read naturally to a respondent.
- Preserve HTML tags, placeholders such as ${{e://Field/name}}, numbers and punctuation exactly.
- Do not translate the item IDs.
- Return ONLY a JSON object with exactly these keys, each filled with the translation of the matching item:
{skeleton}

Items (one per line, formatted as ID || English text):
{payload_lines}
"#;

const REQUIRED_PLACEHOLDERS: [&str; 2] = ["skeleton", "payload_lines"];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompt template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("prompt template is missing the {{{0}}} placeholder")]
    MissingPlaceholder(&'static str),
}

/// A prompt ready to send, plus the key set the reply must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub text: String,
    /// Cell ids in batch order
    pub skeleton: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn parse(template: impl Into<String>) -> Result<Self, PromptError> {
        let template = template.into();
        for name in REQUIRED_PLACEHOLDERS {
            if !has_placeholder(&template, name) {
                return Err(PromptError::MissingPlaceholder(name));
            }
        }
        Ok(Self { template })
    }

    pub fn load(path: &Path) -> Result<Self, PromptError> {
        let text = std::fs::read_to_string(path).map_err(|source| PromptError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(text)
    }

    /// Fill the template for `items` (`(cell_id, source text)` pairs).
    ///
    /// The skeleton is a JSON object mapping every id to `""`, in batch order.
    pub fn render(&self, language: &str, items: &[(String, String)]) -> RenderedPrompt {
        let skeleton: Vec<String> = items.iter().map(|(id, _)| id.clone()).collect();
        let skeleton_json = skeleton_json(&skeleton);
        let payload_lines = items
            .iter()
            .map(|(id, text)| format!("{} || {}", id, text))
            .collect::<Vec<_>>()
            .join("\n");

        let text = substitute(&self.template, |name| match name {
            "language" => Some(language),
            "skeleton" => Some(skeleton_json.as_str()),
            "payload_lines" => Some(payload_lines.as_str()),
            _ => None,
        });

        RenderedPrompt { text, skeleton }
    }
}

fn skeleton_json(ids: &[String]) -> String {
    let fields: Vec<String> = ids
        .iter()
        .map(|id| {
            let key = serde_json::Value::String(id.clone()).to_string();
            format!("{}: \"\"", key)
        })
        .collect();
    format!("{{{}}}", fields.join(", "))
}

fn has_placeholder(template: &str, name: &str) -> bool {
    let mut found = false;
    substitute(template, |n| {
        if n == name {
            found = true;
        }
        None
    });
    found
}

/// Single pass over the template: `{{`/`}}` become literal braces and
/// `{name}` is replaced when `lookup` knows the name. Anything else is kept.
fn substitute<'a>(template: &str, mut lookup: impl FnMut(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }

        if tail.starts_with('{') {
            if let Some(end) = tail.find('}') {
                let name = &tail[1..end];
                let is_name = !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if is_name {
                    if let Some(value) = lookup(name) {
                        out.push_str(value);
                        rest = &tail[end + 1..];
                        continue;
                    }
                }
            }
        }

        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    out
}
