//! Real-time frame recorder.
//!
//! Captures frames from a render surface at a fixed rate, keeps memory flat by
//! spooling raw frames to disk while recording, and encodes and writes them as
//! numbered image files once recording stops. [`FrameRecorder`] is the entry
//! point; everything else is the machinery behind it.

pub mod capture;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod recorder;

pub use capture::{LayerMask, RenderSurface, SyntheticSurface};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OutputQuality, RecorderConfig};
pub use error::{RecorderError, RecorderResult};
pub use recorder::{FrameRecorder, FrameStats, RecorderState};
