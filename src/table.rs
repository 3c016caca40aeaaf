//! The survey table: one row per item, one column per language.
//!
//! Loaded from and written back to CSV. Every row has a stable `cell_id`;
//! tables exported without one get `ROW_<index>` ids on load.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const CELL_ID_COLUMN: &str = "cell_id";

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("source column '{0}' not found in table header")]
    MissingSourceColumn(String),

    #[error("duplicate cell_id '{cell_id}' on rows {first} and {second}")]
    DuplicateCellId {
        cell_id: String,
        first: usize,
        second: usize,
    },

    #[error("row {row} has {fields} fields but the header has {expected}")]
    RaggedRow {
        row: usize,
        fields: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SourceTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    id_column: usize,
    source_column: usize,
}

impl SourceTable {
    pub fn load(path: &Path, source_column: &str) -> Result<Self, TableError> {
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::parse(&text, source_column)?;
        debug!(
            "Loaded {} rows and {} columns from {}",
            table.len(),
            table.headers.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse CSV text with a header row. A leading BOM is ignored.
    pub fn parse(text: &str, source_column: &str) -> Result<Self, TableError> {
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > headers.len() {
                return Err(TableError::RaggedRow {
                    row: i,
                    fields: record.len(),
                    expected: headers.len(),
                });
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        let id_column = match headers.iter().position(|h| h == CELL_ID_COLUMN) {
            Some(idx) => idx,
            None => {
                headers.insert(0, CELL_ID_COLUMN.to_string());
                for (i, row) in rows.iter_mut().enumerate() {
                    row.insert(0, format!("ROW_{}", i));
                }
                0
            }
        };

        let source_column = headers
            .iter()
            .position(|h| h == source_column)
            .ok_or_else(|| TableError::MissingSourceColumn(source_column.to_string()))?;

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if let Some(first) = seen.insert(row[id_column].as_str(), i) {
                return Err(TableError::DuplicateCellId {
                    cell_id: row[id_column].clone(),
                    first,
                    second: i,
                });
            }
        }

        Ok(Self {
            headers,
            rows,
            id_column,
            source_column,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of column `name`, appending an empty column if it does not exist.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    pub fn cell_id(&self, row: usize) -> &str {
        &self.rows[row][self.id_column]
    }

    pub fn source(&self, row: usize) -> &str {
        &self.rows[row][self.source_column]
    }

    pub fn get(&self, row: usize, column: usize) -> &str {
        &self.rows[row][column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: impl Into<String>) {
        self.rows[row][column] = value.into();
    }

    /// Rows whose cell in `column` is empty after trimming, in table order.
    pub fn pending_rows(&self, column: usize) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row[column].trim().is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// All values of one column, in row order.
    pub fn column(&self, column: usize) -> Vec<&str> {
        self.rows.iter().map(|row| row[column].as_str()).collect()
    }

    /// Serialize as CSV with a leading UTF-8 BOM.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, TableError> {
        let mut writer = csv::Writer::from_writer(UTF8_BOM.as_bytes().to_vec());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| TableError::Csv(csv::Error::from(e.into_error())))
    }

    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        let io_err = |source| TableError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = self.to_csv_bytes()?;
        std::fs::write(path, bytes).map_err(io_err)
    }
}

/// `<output_dir>/<input stem>_filled.csv`
pub fn filled_output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "translations".to_string());
    output_dir.join(format!("{}_filled.csv", stem))
}
