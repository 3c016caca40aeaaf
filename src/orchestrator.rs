//! Batch resolver: fills one language column at a time.
//!
//! Each batch goes through three tiers in order: canned overrides, the
//! translation cache, and finally a single model call for whatever is left.
//! Model results are validated against the batch skeleton before anything
//! from the batch touches the table or the cache.

use crate::cache::{CacheError, TranslationCache};
use crate::canned::CannedTable;
use crate::gateway::{CallOptions, GatewayError, ModelGateway};
use crate::normalize::{is_image_only, normalize};
use crate::prompt::PromptTemplate;
use crate::table::SourceTable;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("BatchKeyMismatch: model reply keys differ from the batch (missing: {missing:?}, extra: {extra:?})")]
    KeyMismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("failed to append to translation cache: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("language '{language}', batch {batch}: {source}")]
    Batch {
        language: String,
        /// 1-based batch number within the language
        batch: usize,
        #[source]
        source: BatchError,
    },
}

/// Per-run knobs that do not change between languages.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub batch_size: usize,
    pub call: CallOptions,
    /// Resolve canned and cached items only; no model calls, no cache writes
    pub dry_run: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            call: CallOptions::default(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageReport {
    pub language: String,
    /// Rows whose cell was empty when the language started
    pub pending: usize,
    pub batches: usize,
    pub canned_hits: usize,
    pub cache_hits: usize,
    pub model_translated: usize,
    pub model_calls: usize,
    pub image_only_skipped: usize,
    pub blank_source_skipped: usize,
    /// Items that would have gone to the model in a dry run
    pub dry_run_deferred: usize,
}

impl LanguageReport {
    fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    /// Cells filled during this run
    pub fn resolved(&self) -> usize {
        self.canned_hits + self.cache_hits + self.model_translated
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub languages: Vec<LanguageReport>,
}

impl RunReport {
    pub fn model_calls(&self) -> usize {
        self.languages.iter().map(|l| l.model_calls).sum()
    }

    pub fn resolved(&self) -> usize {
        self.languages.iter().map(LanguageReport::resolved).sum()
    }

    pub fn language(&self, code: &str) -> Option<&LanguageReport> {
        self.languages.iter().find(|l| l.language == code)
    }
}

pub struct Orchestrator {
    canned: CannedTable,
    cache: TranslationCache,
    gateway: ModelGateway,
    template: PromptTemplate,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        canned: CannedTable,
        cache: TranslationCache,
        gateway: ModelGateway,
        template: PromptTemplate,
        settings: RunSettings,
    ) -> Self {
        Self {
            canned,
            cache,
            gateway,
            template,
            settings,
        }
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Translate every language in order. Stops at the first failed batch;
    /// batches finished before it stay merged and cached.
    pub async fn run(
        &mut self,
        table: &mut SourceTable,
        languages: &[String],
    ) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        for language in languages {
            let language_report = self.translate_language(table, language).await?;
            report.languages.push(language_report);
        }

        info!(
            "Run finished: {} language(s), {} cell(s) filled, {} model call(s)",
            report.languages.len(),
            report.resolved(),
            report.model_calls()
        );
        Ok(report)
    }

    pub async fn translate_language(
        &mut self,
        table: &mut SourceTable,
        language: &str,
    ) -> Result<LanguageReport, RunError> {
        let mut report = LanguageReport::new(language);
        let column = table.ensure_column(language);
        let pending = table.pending_rows(column);
        report.pending = pending.len();

        if pending.is_empty() {
            info!("All items already translated for {}, skipping", language);
            return Ok(report);
        }

        let batch_size = self.settings.batch_size.max(1);
        info!(
            "=== Processing language: {} ({} pending, batch size {}) ===",
            language,
            pending.len(),
            batch_size
        );

        for (i, rows) in pending.chunks(batch_size).enumerate() {
            report.batches += 1;
            self.resolve_batch(table, column, language, rows, &mut report)
                .await
                .map_err(|source| RunError::Batch {
                    language: language.to_string(),
                    batch: i + 1,
                    source,
                })?;
        }

        info!(
            "{}: {} canned, {} cached, {} from model in {} call(s), {} image-only skipped",
            language,
            report.canned_hits,
            report.cache_hits,
            report.model_translated,
            report.model_calls,
            report.image_only_skipped
        );
        if report.dry_run_deferred > 0 {
            info!(
                "{}: dry run left {} item(s) for the model",
                language, report.dry_run_deferred
            );
        }
        Ok(report)
    }

    async fn resolve_batch(
        &mut self,
        table: &mut SourceTable,
        column: usize,
        language: &str,
        rows: &[usize],
        report: &mut LanguageReport,
    ) -> Result<(), BatchError> {
        let mut resolved: Vec<(usize, String)> = Vec::with_capacity(rows.len());
        let mut model_items: Vec<(String, String)> = Vec::new();
        let mut model_rows: HashMap<String, usize> = HashMap::new();

        for &row in rows {
            let source = table.source(row);

            if let Some(text) = self.canned.lookup(source, language) {
                resolved.push((row, text.to_string()));
                report.canned_hits += 1;
            } else if let Some(text) = self.cache.lookup(source, language) {
                resolved.push((row, text.to_string()));
                report.cache_hits += 1;
            } else if is_image_only(source) {
                debug!("{}: skipping image-only item {}", language, table.cell_id(row));
                report.image_only_skipped += 1;
            } else if source.trim().is_empty() {
                report.blank_source_skipped += 1;
            } else {
                let cell_id = table.cell_id(row).to_string();
                model_rows.insert(cell_id.clone(), row);
                model_items.push((cell_id, source.to_string()));
            }
        }

        let mut fresh: Vec<(String, String)> = Vec::new();

        if !model_items.is_empty() {
            if self.settings.dry_run {
                report.dry_run_deferred += model_items.len();
            } else {
                let prompt = self.template.render(language, &model_items);
                debug!(
                    "{}: sending {} item(s) to {}",
                    language,
                    model_items.len(),
                    self.settings.call.model
                );
                report.model_calls += 1;
                let reply = self
                    .gateway
                    .call(&prompt.text, language, &self.settings.call)
                    .await?;

                check_keys(&prompt.skeleton, &reply)?;

                for (cell_id, source) in &model_items {
                    let translation = normalize(&reply[cell_id]);
                    if translation.is_empty() {
                        warn!("{}: model returned an empty translation for {}", language, cell_id);
                        continue;
                    }
                    resolved.push((model_rows[cell_id], translation.clone()));
                    fresh.push((source.clone(), translation));
                }
                report.model_translated += fresh.len();
            }
        }

        for (row, text) in resolved {
            table.set(row, column, text);
        }

        if !fresh.is_empty() {
            self.cache.update(
                fresh.iter().map(|(source, text)| (source.as_str(), text.as_str())),
                language,
            )?;
        }

        Ok(())
    }
}

/// The reply must carry exactly the skeleton's ids.
fn check_keys(skeleton: &[String], reply: &HashMap<String, String>) -> Result<(), BatchError> {
    let expected: BTreeSet<&str> = skeleton.iter().map(String::as_str).collect();
    let actual: BTreeSet<&str> = reply.keys().map(String::as_str).collect();

    if expected == actual {
        return Ok(());
    }

    Err(BatchError::KeyMismatch {
        missing: expected.difference(&actual).map(|s| s.to_string()).collect(),
        extra: actual.difference(&expected).map(|s| s.to_string()).collect(),
    })
}
