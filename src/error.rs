//! Error types for the Rhythm simulation engine.

use thiserror::Error;

/// Rhythm error types, one variant per error-taxonomy class.
#[derive(Debug, Error)]
pub enum RhythmError {
    /// Missing or ill-formed architecture configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing trace file, unsupported call, or malformed trace row.
    #[error("trace ingest error: {0}")]
    TraceIngest(String),

    /// An invariant of the simulation was violated; indicates an engine bug.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// The deadlock breaker found no live safety-net entry to replay.
    #[error("fatal deadlock: {0}")]
    Deadlock(String),

    /// JSON (de)serialization failure, typically while reading the config.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O failure (reading config/trace files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Rhythm operations.
pub type Result<T> = std::result::Result<T, RhythmError>;
