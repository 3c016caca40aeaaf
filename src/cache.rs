//! Disk-backed translation memory.
//!
//! The cache is a JSON Lines file where every line is an independent record:
//!
//! ```json
//! {"en": "I would buy this even second-hand", "lang": "it", "translation": "Lo comprerei anche di seconda mano"}
//! ```
//!
//! Loading replays the whole file in order, so the last record for a given
//! (source, language) pair wins. Records are only ever appended; appends take
//! an exclusive advisory lock on the file so concurrent pipeline runs never
//! interleave partial lines.

use crate::normalize::normalize;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Default similarity cut-off for [`TranslationCache::find_similar`].
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.92;

/// Default maximum number of matches returned by [`TranslationCache::find_similar`].
pub const DEFAULT_SIMILARITY_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize cache record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One line of the cache log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Normalized source text
    pub en: String,
    /// Target language code
    pub lang: String,
    pub translation: String,
}

/// In-memory view of the cache log plus the path new records are appended to.
#[derive(Debug)]
pub struct TranslationCache {
    path: PathBuf,
    memory: HashMap<String, HashMap<String, String>>,
    skipped_lines: usize,
}

impl TranslationCache {
    /// Replay the cache log at `path`.
    ///
    /// A missing file is an empty cache. Lines that are not valid records
    /// (typically the tail of an interrupted write) are skipped.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let mut cache = Self {
            path: path.to_path_buf(),
            memory: HashMap::new(),
            skipped_lines: 0,
        };

        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
            }
            debug!("No cache at {}, starting empty", path.display());
            return Ok(cache);
        }

        let file = std::fs::File::open(path).map_err(|source| io_error(path, source))?;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    // Invalid UTF-8 from a torn write; the rest of the file is still usable
                    debug!("Skipping unreadable cache line {}: {}", index + 1, e);
                    cache.skipped_lines += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<CacheRecord>(&line) {
                Ok(record) => {
                    cache
                        .memory
                        .entry(normalize(&record.en))
                        .or_default()
                        .insert(record.lang, record.translation);
                }
                Err(e) => {
                    debug!("Skipping corrupt cache line {}: {}", index + 1, e);
                    cache.skipped_lines += 1;
                }
            }
        }

        info!(
            "Loaded translation cache from {} ({} records, {} corrupt lines skipped)",
            path.display(),
            cache.record_count(),
            cache.skipped_lines
        );
        Ok(cache)
    }

    /// Cached translation for `source_text` in `language`. Empty values count as absent.
    pub fn lookup(&self, source_text: &str, language: &str) -> Option<&str> {
        self.memory
            .get(&normalize(source_text))
            .and_then(|by_lang| by_lang.get(language))
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Merge `entries` (`source text -> translation`) for `language` into memory
    /// and append them to the log under an exclusive file lock.
    pub fn update<'a, I>(&mut self, entries: I, language: &str) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut buffer = Vec::new();
        let mut staged = Vec::new();
        for (source_text, translation) in entries {
            let record = CacheRecord {
                en: normalize(source_text),
                lang: language.to_string(),
                translation: translation.to_string(),
            };
            serde_json::to_writer(&mut buffer, &record)?;
            buffer.push(b'\n');
            staged.push(record);
        }

        if staged.is_empty() {
            return Ok(());
        }

        self.append(&buffer)?;

        let count = staged.len();
        for record in staged {
            self.memory
                .entry(record.en)
                .or_default()
                .insert(record.lang, record.translation);
        }
        debug!("Appended {} {} records to {}", count, language, self.path.display());
        Ok(())
    }

    fn append(&self, buffer: &[u8]) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| io_error(&self.path, source))?;

        file.lock_exclusive()
            .map_err(|source| io_error(&self.path, source))?;

        let written = ends_mid_line(&mut file).and_then(|torn| {
            // A torn tail from an interrupted write must not swallow the first new record
            if torn {
                file.write_all(b"\n")?;
            }
            file.write_all(buffer)?;
            file.flush()
        });
        let released = FileExt::unlock(&file);

        written.map_err(|source| io_error(&self.path, source))?;
        released.map_err(|source| io_error(&self.path, source))
    }

    /// Cached source keys similar to `text`, most similar first.
    ///
    /// Similarity is the normalized Levenshtein ratio in `[0, 1]`; keys scoring
    /// below `threshold` are dropped and at most `limit` keys are returned.
    pub fn find_similar(&self, text: &str, threshold: f64, limit: usize) -> Vec<String> {
        let query = normalize(text);
        let mut scored: Vec<(f64, &String)> = self
            .memory
            .keys()
            .map(|key| (strsim::normalized_levenshtein(&query, key), key))
            .filter(|(score, _)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct source strings.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Number of (source, language) pairs.
    pub fn record_count(&self) -> usize {
        self.memory.values().map(HashMap::len).sum()
    }

    /// Lines dropped during the last load because they did not parse.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

/// True when the file is non-empty and its last byte is not a newline.
fn ends_mid_line(file: &mut std::fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}
