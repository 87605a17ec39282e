use std::path::PathBuf;

use thiserror::Error;

use super::case::SequenceType;

/// Top level error type, tagging every failure with the subsystem it
/// originated from so callers can branch on the kind instead of parsing
/// message strings.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failures while reading image files or assembling cases from them.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("No files were provided to load")]
    EmptyFileList,
    #[error("None of the provided files could be processed")]
    NoFilesParsed,
    #[error("No case is currently open")]
    NoCurrentCase,
    #[error("No backend could read {path}: {details}")]
    AllBackendsFailed { path: PathBuf, details: String },
    #[error("{backend} failed to read {path}: {message}")]
    Backend {
        backend: &'static str,
        path: PathBuf,
        message: String,
    },
}

/// Failures while locating or loading the segmentation model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),
    #[error("Model architecture mismatch: expected {expected} input channels, checkpoint has {found}")]
    ArchitectureMismatch { expected: usize, found: usize },
    #[error("Model checkpoint has no usable input or output tensors")]
    MalformedGraph,
    #[error("A prediction is already in progress")]
    Busy,
    #[error("Failed to load model session: {0}")]
    Session(#[from] ort::Error),
}

/// Failures while preparing inputs or running inference.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Case is missing a {0} sequence, which is required for prediction")]
    MissingSequence(SequenceType),
    #[error("The {0} sequence has no voxel data loaded")]
    MissingVoxelData(SequenceType),
    #[error(
        "T2W and ADC dimensions differ by more than {tolerance} voxels: {t2w:?} vs {adc:?}"
    )]
    ShapeMismatch {
        t2w: [usize; 3],
        adc: [usize; 3],
        tolerance: usize,
    },
    #[error("Input volume is empty")]
    EmptyVolume,
    #[error("Inference run failed: {0}")]
    Runtime(#[from] ort::Error),
    #[error("Model produced an unexpected output shape: {0:?}")]
    BadOutputShape(Vec<usize>),
}

/// Failures while persisting cases, results, or reports.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not a valid case file: {path}: {message}")]
    InvalidCaseFile { path: PathBuf, message: String },
    #[error("Report rendering failed: {0}")]
    Report(String),
}
