//! Error types for the hexagon indexing engine.

use crate::polygon::PolygonId;
use thiserror::Error;

/// Indexing engine errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Polygon failed validity checks. Recovered per polygon by the pipeline.
    #[error("malformed geometry in polygon {polygon_id}: {reason}")]
    MalformedGeometry { polygon_id: PolygonId, reason: String },

    /// Source or mask prepared at a different resolution than the run.
    #[error("resolution mismatch in {origin}: expected {expected}, found {found}")]
    ResolutionMismatch {
        expected: u8,
        found: u8,
        origin: String,
    },

    /// A batch could not be committed within the allowed attempts.
    #[error("batch {batch} failed after {attempts} attempt(s): {source}")]
    WriterBatchFailure {
        batch: usize,
        attempts: u32,
        #[source]
        source: WriteError,
    },

    /// Writer refused the polygon registry.
    #[error("polygon registry rejected: {0}")]
    PolygonRegistry(#[source] WriteError),

    /// Invalid run configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Domain mask exists but cannot be used.
    #[error("domain mask error: {0}")]
    Mask(String),

    /// Geometry source failed to produce polygons.
    #[error("geometry source error: {0}")]
    Source(String),

    /// Run was cancelled before any output was committed.
    #[error("run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by an [`IndexWriter`](crate::IndexWriter).
///
/// A failed call must leave the writer exactly as it was before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The batch violates a constraint of the store and will never succeed.
    #[error("batch rejected: {0}")]
    Rejected(String),

    /// The store could not take the batch right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for indexing operations.
pub type Result<T> = std::result::Result<T, IndexError>;
