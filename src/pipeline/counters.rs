//! Frame accounting.
//!
//! Counters are owned by the capture driver and only ever mutated on the
//! foreground path. Background workers report what happened to a frame as a
//! [`PipelineEvent`] over a channel, which the driver drains every tick.
//!
//! Every expected frame ends in exactly one of two buckets: finalized
//! (`frames_actual`) or dropped (`frames_dropped`). Until then it is in flight.

use crate::data::frame::FrameKind;
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Pipeline stage at which a frame was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropStage {
    /// Raw queue full or surface unreadable at capture time.
    Capture,
    /// Spool chunk write or read failed.
    Spool,
    /// Encoding failed or the encoded queue stayed full.
    Encode,
    /// Output file write failed.
    Finalize,
}

impl fmt::Display for DropStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Capture => "capture",
            Self::Spool => "spool",
            Self::Encode => "encode",
            Self::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Outcome reported by a background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Frame written to its output file.
    Finalized {
        /// Index of the finalized frame.
        index: i32,
    },
    /// A single frame was lost.
    Dropped {
        /// Index of the lost frame.
        index: i32,
        /// Where it was lost.
        stage: DropStage,
    },
    /// Unread records of an unreadable spool chunk.
    ChunkLost {
        /// Indices of the frames that went down with the chunk.
        indices: Vec<i32>,
    },
}

/// Sending half handed to workers.
pub type EventSender = mpsc::UnboundedSender<PipelineEvent>;

/// Receiving half kept by the driver.
pub type EventReceiver = mpsc::UnboundedReceiver<PipelineEvent>;

/// Create a worker event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Per-session frame counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    /// Capture attempts, successful or not.
    pub frames_expect: u64,
    /// Frames finalized to disk.
    pub frames_actual: u64,
    /// Frames lost anywhere in the pipeline.
    pub frames_dropped: u64,
    /// Finalized pre-roll frames.
    pub frames_countdown: u64,
    /// Finalized recorded frames.
    pub frames_succeeded: u64,
}

impl FrameCounters {
    /// Count a capture attempt.
    pub fn expect_one(&mut self) {
        self.frames_expect += 1;
    }

    /// Count a finalized frame.
    pub fn finalized(&mut self, index: i32) {
        self.frames_actual += 1;
        match FrameKind::of(index) {
            FrameKind::Preroll => self.frames_countdown += 1,
            FrameKind::Recorded => self.frames_succeeded += 1,
        }
    }

    /// Count `n` lost frames.
    pub fn dropped(&mut self, n: u64) {
        self.frames_dropped += n;
    }

    /// Frames with a final outcome.
    pub fn resolved(&self) -> u64 {
        self.frames_actual + self.frames_dropped
    }

    /// Frames still in flight.
    pub fn in_flight(&self) -> u64 {
        self.frames_expect.saturating_sub(self.resolved())
    }

    /// True once every expected frame has an outcome.
    pub fn is_complete(&self) -> bool {
        self.resolved() >= self.frames_expect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalized_splits_by_sign() {
        let mut counters = FrameCounters::default();
        for _ in 0..4 {
            counters.expect_one();
        }
        counters.finalized(-2);
        counters.finalized(-1);
        counters.finalized(0);
        assert_eq!(counters.frames_countdown, 2);
        assert_eq!(counters.frames_succeeded, 1);
        assert_eq!(counters.frames_actual, 3);
        assert_eq!(counters.in_flight(), 1);
        assert!(!counters.is_complete());

        counters.dropped(1);
        assert!(counters.is_complete());
    }

    #[test]
    fn test_channel_delivers_without_runtime() {
        let (tx, mut rx) = event_channel();
        std::thread::spawn(move || {
            tx.send(PipelineEvent::Finalized { index: 3 }).unwrap();
        })
        .join()
        .unwrap();
        assert_eq!(rx.try_recv().unwrap(), PipelineEvent::Finalized { index: 3 });
    }

    #[test]
    fn test_drop_stage_display() {
        assert_eq!(DropStage::Spool.to_string(), "spool");
    }
}
