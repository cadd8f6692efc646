//! Error types for the invoice worklist pipeline.
//!
//! Business ambiguity (conflicting POs, unknown POs, thin value history) is
//! never an error here: those are classification values in
//! `pipeline::types`. Only infrastructure failures and unreadable input
//! documents are represented below.

use std::path::PathBuf;

/// Top-level error for a batch run.
///
/// Store failures arrive as `PipelineError::StoreUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Master data error: {0}")]
    MasterData(#[from] MasterDataError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the inbox feed adapter.
///
/// These abort a run: a feed that cannot be read means the scan itself is
/// unknown. A single attachment that cannot be read is not an `IngestError`;
/// it becomes a document with an unreadable payload.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Inbox feed not found: {}", .0.display())]
    FeedNotFound(PathBuf),

    #[error("Attachments directory not found: {}", .0.display())]
    AttachmentsDirNotFound(PathBuf),

    #[error("Invalid inbox feed: {0}")]
    InvalidFeed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors loading the PO master snapshot.
#[derive(Debug, thiserror::Error)]
pub enum MasterDataError {
    #[error("PO master CSV not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("PO master CSV missing required columns {missing:?} (found {found:?})")]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("PO master CSV row {line}: invalid {field} '{value}'")]
    InvalidField {
        line: u64,
        field: String,
        value: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal pipeline errors. Any of these aborts the run before rows are committed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("PO master dataset unavailable: {0}")]
    MasterDatasetUnavailable(String),

    #[error("Worklist store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),
}

/// Errors writing the snapshot export.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-document errors. Isolated to the document; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("Unreadable document {source_ref}: {reason}")]
    UnreadableDocument { source_ref: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
