//! Custom error types for the recorder.
//!
//! `RecorderError` is the single error type used across the crate. Most of its
//! variants never escape the pipeline: a failed capture, spool write, spool read,
//! encode or finalize is logged where it happens and turned into a counted drop,
//! and the owning loop carries on.
//!
//! ## Error Hierarchy
//!
//! - **`CaptureDropped`**: the raw queue was full when a frame was sampled.
//! - **`SpoolIo`**: a disk read or write against a spool chunk failed.
//! - **`FinalizeIo`**: writing an encoded frame to its output file failed.
//! - **`DirectoryCreate`**: the session directory could not be created. The
//!   session still runs, degraded, and every frame that needs the disk drops.
//! - **`Configuration`** / **`Allocation`**: the only errors that fail
//!   [`start_recording`](crate::recorder::FrameRecorder::start_recording).
//!   They indicate a programming or configuration mistake rather than a runtime
//!   condition.
//! - **`Encode`**, **`Surface`**, **`CorruptRecord`**: per-frame failures in the
//!   encoder, the render surface, or the spool record decoder.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the recorder error type.
pub type RecorderResult<T> = std::result::Result<T, RecorderError>;

/// Errors produced by the recording pipeline.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Frame {index} dropped: raw queue full")]
    CaptureDropped { index: i32 },

    #[error("Spool I/O error on {}: {source}", chunk.display())]
    SpoolIo {
        chunk: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output file {}: {source}", path.display())]
    FinalizeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create session directory {}: {source}", path.display())]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Render surface error: {0}")]
    Surface(String),

    #[error("Corrupt spool record: {0}")]
    CorruptRecord(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for RecorderError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
