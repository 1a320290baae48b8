// src/utils/error.rs
use std::time::Duration;
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error {status}: {body}")]
    Http { status: reqwest::StatusCode, body: String },

    #[error("Text generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse generation service response: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No tables extracted for document {0}")]
    NoTables(String),

    #[error("Reconstructed text is empty for document {0}")]
    EmptyContent(String),

    #[error("No recognized section titles in document {0}")]
    NoSections(String),
}

#[derive(Error, Debug)]
pub enum RubricError {
    #[error("I/O error reading rubric: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rubric parse error: {0}")]
    Parse(String),

    #[error("Invalid rubric: {0}")]
    Structure(String),

    #[error("Invalid rubric section '{section}': {reason}")]
    Section { section: String, reason: String },

    #[error("Invalid criterion #{index} in section '{section}': {reason}")]
    Criterion {
        section: String,
        index: usize,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("No data for section: {0}")]
    NoDataForSection(String),

    #[error("Section not in rubric: {0}")]
    UnknownSection(String),

    #[error("Criterion '{criterion}' not in rubric section '{section}'")]
    UnknownCriterion { section: String, criterion: String },
}

#[derive(Error, Debug)]
pub enum ReplyError {
    #[error("No JSON object found in reply")]
    NoObject,

    #[error("Invalid JSON: {0}")]
    Invalid(String),

    #[error("Reply has no '{0}' object")]
    MissingSection(String),

    #[error("Corrective request failed: {0}")]
    Correction(#[from] GenerationError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Rubric load failed: {0}")]
    Rubric(#[from] RubricError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("Text generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
