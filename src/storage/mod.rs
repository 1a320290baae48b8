// src/storage/mod.rs
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::evaluation::DocumentResult;
use crate::utils::error::StorageError;

/// Writes per-document results for the export collaborator, plus debug copies
/// of the reconstructed text.
pub struct StorageManager {
    base_dir: PathBuf,
    claimed: HashSet<String>, // File stems handed out during this run
}

/// File-name stem for a document name.
fn file_stem(document: &str) -> String {
    document
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

impl StorageManager {
    /// Creates a new StorageManager with the specified base directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        // Create the base directory if it doesn't exist
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        Ok(Self {
            base_dir: base_path,
            claimed: HashSet::new(),
        })
    }

    /// Reserves a document name whose output files no earlier document of this
    /// run uses. A taken name gets a numeric suffix (`report`, `report_2`, ...).
    pub fn claim_document_name(&mut self, document: &str) -> String {
        let mut name = document.to_string();
        let mut n = 1;
        while !self.claimed.insert(file_stem(&name)) {
            n += 1;
            name = format!("{}_{}", document, n);
        }
        if n > 1 {
            tracing::warn!("Document name '{}' already used in this run, writing as '{}'", document, name);
        }
        name
    }

    fn debug_dir(&self) -> Result<PathBuf, StorageError> {
        let dir = self.base_dir.join("debug");
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(StorageError::IoError)?;
        }
        Ok(dir)
    }

    /// Saves the document result as JSON, with an extraction timestamp.
    pub fn save_result(&self, result: &DocumentResult) -> Result<PathBuf, StorageError> {
        let file_path = self
            .base_dir
            .join(format!("{}_result.json", file_stem(&result.document)));

        let payload = serde_json::json!({
            "document": result.document,
            "evaluated_at": chrono::Utc::now().to_rfc3339(),
            "result": result,
        });

        let payload_str = serde_json::to_string_pretty(&payload)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        fs::write(&file_path, payload_str).map_err(StorageError::IoError)?;

        tracing::info!("Saved result to {}", file_path.display());
        Ok(file_path)
    }

    /// Saves the reconstructed text exactly as it was segmented.
    pub fn save_stream_text(&self, document: &str, text: &str) -> Result<PathBuf, StorageError> {
        let file_path = self.debug_dir()?.join(format!("{}_stream.txt", file_stem(document)));
        fs::write(&file_path, text).map_err(StorageError::IoError)?;
        tracing::debug!("Saved reconstructed text to {}", file_path.display());
        Ok(file_path)
    }

    /// Path for the annotated section copy of a document.
    pub fn sections_debug_path(&self, document: &str) -> Result<PathBuf, StorageError> {
        Ok(self.debug_dir()?.join(format!("{}_sections.txt", file_stem(document))))
    }
}
