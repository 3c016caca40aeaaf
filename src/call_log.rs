//! Append-only JSONL log of every model call.
//!
//! One file per UTC day (`model_calls_YYYY-MM-DD.jsonl`). The log is
//! write-only from the pipeline's point of view; it exists for cost and
//! latency accounting.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Maximum length of the raw model output kept on failure lines.
const EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    InvalidJson,
    RepairedJson,
    FatalError,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallLogEntry {
    pub timestamp: String,
    pub status: CallStatus,
    pub prompt_hash: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub language: String,
    pub attempt: u32,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output_excerpt: Option<String>,
}

impl CallLogEntry {
    pub fn new(status: CallStatus, prompt: &str, model: &str, language: &str) -> Self {
        Self {
            timestamp: timestamp(),
            status,
            prompt_hash: fingerprint(prompt),
            model: model.to_string(),
            temperature: None,
            language: language.to_string(),
            attempt: 1,
            latency_ms: 0,
            input_tokens: None,
            output_tokens: None,
            error: None,
            raw_output_excerpt: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_tokens(mut self, input: Option<u64>, output: Option<u64>) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn with_excerpt(mut self, raw: &str) -> Self {
        self.raw_output_excerpt = Some(excerpt(raw));
        self
    }
}

/// Writer for the daily call log files in `dir`.
#[derive(Debug, Clone)]
pub struct CallLog {
    dir: PathBuf,
}

impl CallLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of today's log file.
    pub fn current_file(&self) -> PathBuf {
        self.dir
            .join(format!("model_calls_{}.jsonl", Utc::now().format("%Y-%m-%d")))
    }

    /// Append one entry as a single JSON line.
    pub fn append(&self, entry: &CallLogEntry) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_file())?;
        file.write_all(&line)
    }
}

/// Short SHA-256 digest (8 hex chars) used to correlate calls for the same prompt.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// UTC ISO-8601 timestamp with millisecond precision, e.g. `2024-01-15T10:30:00.123Z`.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn excerpt(raw: &str) -> String {
    if raw.chars().count() <= EXCERPT_CHARS {
        return raw.to_string();
    }
    let mut cut: String = raw.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_is_short_and_deterministic() {
        let a = fingerprint("Translate these items");
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, fingerprint("Translate these items"));
        assert_ne!(a, fingerprint("Translate those items"));
    }

    #[test]
    fn test_fingerprint_known_value() {
        // sha256("abc") = ba7816bf...
        assert_eq!(fingerprint("abc"), "ba7816bf");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-15T10:30:00.123Z".len());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&CallStatus::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&CallStatus::InvalidJson).unwrap(),
            "\"invalid_json\""
        );
        assert_eq!(
            serde_json::to_string(&CallStatus::RepairedJson).unwrap(),
            "\"repaired_json\""
        );
        assert_eq!(
            serde_json::to_string(&CallStatus::FatalError).unwrap(),
            "\"fatal_error\""
        );
    }

    #[test]
    fn test_append_writes_one_line_per_entry() {
        let dir = TempDir::new().unwrap();
        let log = CallLog::new(dir.path().join("logs"));

        let mut ok = CallLogEntry::new(CallStatus::Ok, "prompt", "gpt-4o", "it");
        ok.input_tokens = Some(10);
        log.append(&ok).unwrap();
        log.append(
            &CallLogEntry::new(CallStatus::FatalError, "prompt", "gpt-4o", "it")
                .with_error("boom"),
        )
        .unwrap();

        let content = std::fs::read_to_string(log.current_file()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "ok");
        assert_eq!(lines[0]["input_tokens"], 10);
        assert!(lines[0].get("error").is_none());
        assert_eq!(lines[1]["status"], "fatal_error");
        assert_eq!(lines[1]["error"], "boom");
        assert_eq!(lines[1]["prompt_hash"], fingerprint("prompt"));
    }

    #[test]
    fn test_excerpt_truncates_long_output() {
        let long = "x".repeat(EXCERPT_CHARS + 10);
        let entry = CallLogEntry::new(CallStatus::InvalidJson, "p", "m", "it").with_excerpt(&long);
        let cut = entry.raw_output_excerpt.unwrap();
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
