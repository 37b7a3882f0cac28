use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TcgaError {
    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("invalid annotation category: {0}")]
    InvalidCategory(String),

    #[error("invalid filetype: {0}")]
    InvalidFiletype(String),

    #[error("missing config file tcga-annot.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("GDC request failed: {0}")]
    GdcHttp(String),

    #[error("GDC returned status {status}: {message}")]
    GdcStatus { status: u16, message: String },

    #[error("metadata source unavailable for {project}: {reason}")]
    SourceUnavailable { project: String, reason: String },

    #[error("record {record_id} could not be flattened: {reason}")]
    MalformedRecord { record_id: String, reason: String },

    #[error("sample {sample_id} is mapped to both case {first_case} and case {second_case}")]
    GroupingConflict {
        sample_id: String,
        first_case: String,
        second_case: String,
    },

    #[error("download failed for file {file_id}: {reason}")]
    FetchFailure { file_id: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("table write failed: {0}")]
    TableWrite(String),
}
