//! Frame records and output naming.
//!
//! A frame index encodes where a frame sits in the session:
//!
//! - negative: pre-roll (countdown) frame, `-1` is the first one captured
//! - zero: first recorded frame, used by the UI as a start cue
//! - positive: every later recorded frame, strictly increasing
//!
//! Indices are never reused within a session, so finalized files can be named
//! from the index alone regardless of the order they reach the disk.

use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Prefix of finalized pre-roll frames.
pub const PREROLL_PREFIX: &str = "preroll_";

/// Prefix of finalized recorded frames.
pub const FRAME_PREFIX: &str = "frame_";

/// One frame travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Session-unique frame index.
    pub index: i32,
    /// Raw RGBA pixels before encoding, image bytes after.
    pub payload: Bytes,
}

impl FrameRecord {
    /// Create a record.
    pub fn new(index: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    /// Which part of the session this frame belongs to.
    pub fn kind(&self) -> FrameKind {
        FrameKind::of(self.index)
    }
}

/// Session phase a frame index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Captured during the countdown.
    Preroll,
    /// Captured after the countdown.
    Recorded,
}

impl FrameKind {
    /// Classify an index by sign.
    pub fn of(index: i32) -> Self {
        if index < 0 {
            Self::Preroll
        } else {
            Self::Recorded
        }
    }
}

/// File name for a finalized frame, e.g. `frame_000042.png` or `preroll_000003.png`.
pub fn output_file_name(index: i32, extension: &str) -> String {
    match FrameKind::of(index) {
        FrameKind::Recorded => format!("{FRAME_PREFIX}{index:06}.{extension}"),
        FrameKind::Preroll => format!("{PREROLL_PREFIX}{:06}.{extension}", index.unsigned_abs()),
    }
}

/// Full path of a finalized frame inside the session directory.
pub fn output_path(dir: &Path, index: i32, extension: &str) -> PathBuf {
    dir.join(output_file_name(index, extension))
}
