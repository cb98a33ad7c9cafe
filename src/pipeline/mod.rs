//! Background stages of the recording pipeline and the bookkeeping they share.
//!
//! ```text
//! surface --tick--> raw queue --spool-save--> chunk-N ... chunk-1
//!                                                 |
//!           encoded queue <--encode-- raw queue <--spool-load
//!                 |
//!            finalize --> frame_000000.png ...
//! ```

pub mod counters;
pub mod finalize_worker;
pub mod pacing;
pub mod spool_worker;
pub mod worker;

pub use counters::{DropStage, FrameCounters, PipelineEvent};
pub use pacing::FramePacer;
pub use worker::{CancelToken, WorkerHandle};
