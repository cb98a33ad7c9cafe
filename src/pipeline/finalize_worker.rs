//! Finalize worker: writes encoded frames to their output files.

use super::counters::{DropStage, EventSender, PipelineEvent};
use super::worker::{CancelToken, WorkerHandle};
use crate::data::frame::{output_path, FrameRecord};
use crate::data::queue::BoundedQueue;
use crate::error::{RecorderError, RecorderResult};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Everything the finalize worker needs, moved into its thread.
#[derive(Debug, Clone)]
pub struct FinalizeContext {
    /// Encoded frame queue shared with the encode path.
    pub encoded: Arc<BoundedQueue<FrameRecord>>,
    /// Session output directory.
    pub dir: PathBuf,
    /// Extension of the encoded format.
    pub extension: &'static str,
    /// Outcome channel to the driver.
    pub events: EventSender,
    /// Wake-up interval while waiting on the queue.
    pub poll: Duration,
}

/// Start the finalize worker.
pub fn spawn(ctx: FinalizeContext) -> RecorderResult<WorkerHandle> {
    let encoded = Arc::clone(&ctx.encoded);
    WorkerHandle::spawn("finalize", move || encoded.wake_all(), move |cancel| {
        run(&ctx, &cancel)
    })
}

fn run(ctx: &FinalizeContext, cancel: &CancelToken) {
    let mut written = 0u64;
    while !cancel.is_cancelled() {
        let Some(record) = ctx.encoded.pop_timeout(ctx.poll) else {
            continue;
        };
        let event = match finalize(ctx, &record) {
            Ok(()) => {
                written += 1;
                PipelineEvent::Finalized {
                    index: record.index,
                }
            }
            Err(e) => {
                warn!(index = record.index, error = %e, "Failed to finalize frame");
                PipelineEvent::Dropped {
                    index: record.index,
                    stage: DropStage::Finalize,
                }
            }
        };
        let _ = ctx.events.send(event);
    }
    info!(frames = written, "Finalize worker stopped");
}

fn finalize(ctx: &FinalizeContext, record: &FrameRecord) -> RecorderResult<()> {
    let path = output_path(&ctx.dir, record.index, ctx.extension);
    fs::write(&path, &record.payload).map_err(|source| RecorderError::FinalizeIo {
        path: path.clone(),
        source,
    })?;
    trace!(path = %path.display(), "Frame finalized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::counters::event_channel;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_writes_named_files_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = event_channel();
        let ctx = FinalizeContext {
            encoded: Arc::new(BoundedQueue::new(4).unwrap()),
            dir: dir.path().to_path_buf(),
            extension: "png",
            events,
            poll: Duration::from_millis(2),
        };
        let mut worker = spawn(ctx.clone()).unwrap();
        ctx.encoded.try_push(FrameRecord::new(-2, b"pre".to_vec())).unwrap();
        ctx.encoded.try_push(FrameRecord::new(0, b"cue".to_vec())).unwrap();

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while got.len() < 2 {
            assert!(Instant::now() < deadline, "timed out");
            match rx.try_recv() {
                Ok(event) => got.push(event),
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
        worker.stop();

        assert_eq!(
            got,
            vec![
                PipelineEvent::Finalized { index: -2 },
                PipelineEvent::Finalized { index: 0 },
            ]
        );
        assert_eq!(fs::read(dir.path().join("preroll_000002.png")).unwrap(), b"pre");
        assert_eq!(fs::read(dir.path().join("frame_000000.png")).unwrap(), b"cue");
    }

    #[test]
    fn test_write_failure_is_a_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = event_channel();
        let ctx = FinalizeContext {
            encoded: Arc::new(BoundedQueue::new(4).unwrap()),
            dir: dir.path().join("missing"),
            extension: "png",
            events,
            poll: Duration::from_millis(2),
        };
        let mut worker = spawn(ctx.clone()).unwrap();
        ctx.encoded.try_push(FrameRecord::new(7, b"x".to_vec())).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let event = loop {
            assert!(Instant::now() < deadline, "timed out");
            if let Ok(event) = rx.try_recv() {
                break event;
            }
            thread::sleep(Duration::from_millis(1));
        };
        worker.stop();
        assert_eq!(
            event,
            PipelineEvent::Dropped {
                index: 7,
                stage: DropStage::Finalize
            }
        );
    }
}
