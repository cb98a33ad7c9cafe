//! Spool worker: moves raw frames between the raw queue and disk.
//!
//! # Save mode
//!
//! Drains the raw queue into the top spool chunk, pushing a new chunk once the
//! top one grows past the byte limit. A failed append drops that frame and
//! rolls over to a fresh chunk, so a half-written record never sits in front of
//! good ones. Runs until cancelled; frames still queued at that point stay in
//! the raw queue for the processing phase.
//!
//! # Load mode
//!
//! Reads chunks back top-first, feeding each record into the raw queue and
//! waiting for room when it is full. A fully consumed chunk is deleted and
//! popped. If a chunk cannot be read, the records it still held are reported
//! as lost. Returns when the stack is empty or on cancellation.

use super::counters::{DropStage, EventSender, PipelineEvent};
use super::worker::{CancelToken, WorkerHandle};
use crate::data::frame::FrameRecord;
use crate::data::queue::BoundedQueue;
use crate::data::spool::{ChunkReader, ChunkWriter, SharedSpool};
use crate::error::RecorderResult;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a spool worker needs, cloned into its thread.
#[derive(Debug, Clone)]
pub struct SpoolContext {
    /// Raw frame queue shared with the capture driver.
    pub raw: Arc<BoundedQueue<FrameRecord>>,
    /// Session chunk stack.
    pub spool: SharedSpool,
    /// Outcome channel to the driver.
    pub events: EventSender,
    /// Chunk rollover threshold in bytes.
    pub chunk_byte_limit: u64,
    /// Largest payload accepted when reading back.
    pub max_payload: usize,
    /// Wake-up interval while waiting on the queue.
    pub poll: Duration,
}

/// Start the worker in save mode.
pub fn spawn_save(ctx: SpoolContext) -> RecorderResult<WorkerHandle> {
    let raw = Arc::clone(&ctx.raw);
    WorkerHandle::spawn("spool-save", move || raw.wake_all(), move |cancel| {
        run_save(&ctx, &cancel)
    })
}

/// Start the worker in load mode.
pub fn spawn_load(ctx: SpoolContext) -> RecorderResult<WorkerHandle> {
    let raw = Arc::clone(&ctx.raw);
    WorkerHandle::spawn("spool-load", move || raw.wake_all(), move |cancel| {
        run_load(&ctx, &cancel)
    })
}

fn run_save(ctx: &SpoolContext, cancel: &CancelToken) {
    let mut writer: Option<ChunkWriter> = None;
    let mut spooled = 0u64;

    while !cancel.is_cancelled() {
        let Some(record) = ctx.raw.pop_timeout(ctx.poll) else {
            continue;
        };

        if writer.is_none() {
            writer = open_top_chunk(ctx);
        }
        let Some(active) = writer.as_mut() else {
            drop_frame(ctx, record.index);
            continue;
        };

        match active.append(&record) {
            Ok(bytes) => {
                spooled += 1;
                let full = {
                    let mut spool = ctx.spool.lock();
                    spool.record_appended(record.index, bytes);
                    spool
                        .top()
                        .is_some_and(|top| top.bytes > ctx.chunk_byte_limit)
                };
                if full {
                    close_writer(writer.take());
                    let next = ctx.spool.lock().push_chunk();
                    debug!(next = %next.display(), "Spool chunk full, rolling over");
                }
            }
            Err(e) => {
                warn!(index = record.index, error = %e, "Failed to spool frame");
                let _ = ctx.events.send(PipelineEvent::Dropped {
                    index: record.index,
                    stage: DropStage::Spool,
                });
                // Abandon the chunk tail; later frames go to a fresh chunk.
                writer = None;
                ctx.spool.lock().push_chunk();
            }
        }
    }

    close_writer(writer);
    info!(frames = spooled, "Spool save stopped");
}

fn open_top_chunk(ctx: &SpoolContext) -> Option<ChunkWriter> {
    let path = {
        let mut spool = ctx.spool.lock();
        match spool.top() {
            Some(top) => top.path.clone(),
            None => spool.push_chunk(),
        }
    };
    match ChunkWriter::open(&path) {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!(error = %e, "Failed to open spool chunk");
            None
        }
    }
}

fn close_writer(writer: Option<ChunkWriter>) {
    if let Some(writer) = writer {
        let path = writer.path().to_path_buf();
        if let Err(e) = writer.finish() {
            warn!(chunk = %path.display(), error = %e, "Failed to flush spool chunk");
        }
    }
}

fn drop_frame(ctx: &SpoolContext, index: i32) {
    let _ = ctx.events.send(PipelineEvent::Dropped {
        index,
        stage: DropStage::Spool,
    });
}

fn run_load(ctx: &SpoolContext, cancel: &CancelToken) {
    let mut loaded = 0u64;

    while !cancel.is_cancelled() {
        let Some(chunk) = ctx.spool.lock().top().cloned() else {
            break;
        };

        let mut consumed = 0usize;
        match ChunkReader::open(&chunk.path, ctx.max_payload) {
            Ok(mut reader) => {
                while consumed < chunk.records() {
                    match reader.next_record() {
                        Ok(Some(record)) => {
                            consumed += 1;
                            if !offer_until_accepted(ctx, record, cancel) {
                                return;
                            }
                            loaded += 1;
                        }
                        Ok(None) => {
                            warn!(
                                chunk = %chunk.path.display(),
                                read = consumed,
                                expected = chunk.records(),
                                "Spool chunk ended early"
                            );
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to read spooled frame");
                            break;
                        }
                    }
                }
            }
            Err(e) if chunk.indices.is_empty() => {
                debug!(error = %e, "Skipping empty spool chunk");
            }
            Err(e) => warn!(error = %e, "Failed to open spool chunk for reading"),
        }

        let lost = &chunk.indices[consumed..];
        if !lost.is_empty() {
            let _ = ctx.events.send(PipelineEvent::ChunkLost {
                indices: lost.to_vec(),
            });
        }

        match fs::remove_file(&chunk.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(chunk = %chunk.path.display(), error = %e, "Failed to delete spool chunk"),
        }
        ctx.spool.lock().pop_chunk();
        debug!(chunk = %chunk.path.display(), records = consumed, "Spool chunk consumed");
    }

    info!(frames = loaded, "Spool load finished");
}

/// Keep offering `record` until the raw queue takes it. Returns false if
/// cancelled first.
fn offer_until_accepted(ctx: &SpoolContext, record: FrameRecord, cancel: &CancelToken) -> bool {
    let mut pending = record;
    loop {
        match ctx.raw.push_timeout(pending, ctx.poll) {
            Ok(()) => return true,
            Err(back) => {
                if cancel.is_cancelled() {
                    return false;
                }
                pending = back;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spool::SpoolStore;
    use crate::pipeline::counters::event_channel;
    use std::collections::BTreeSet;
    use std::thread;
    use std::time::Instant;

    fn context(dir: &std::path::Path, limit: u64) -> (SpoolContext, crate::pipeline::counters::EventReceiver) {
        let (events, rx) = event_channel();
        let mut store = SpoolStore::new(dir);
        store.push_chunk();
        let ctx = SpoolContext {
            raw: Arc::new(BoundedQueue::new(4).unwrap()),
            spool: store.shared(),
            events,
            chunk_byte_limit: limit,
            max_payload: 64,
            poll: Duration::from_millis(2),
        };
        (ctx, rx)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_save_rolls_over_and_load_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        // each record is 8 + 40 bytes; limit forces a rollover every 3 records
        let (ctx, mut rx) = context(dir.path(), 100);

        let mut saver = spawn_save(ctx.clone()).unwrap();
        for i in 0..10 {
            let mut record = FrameRecord::new(i, vec![i as u8; 40]);
            loop {
                match ctx.raw.try_push(record) {
                    Ok(()) => break,
                    Err(back) => {
                        record = back;
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        }
        wait_until(|| ctx.raw.is_empty() && ctx.spool.lock().pending_records() == 10);
        saver.stop();

        let chunks = ctx.spool.lock().len();
        assert!(chunks >= 3, "expected rollover, got {chunks} chunks");

        let mut loader = spawn_load(ctx.clone()).unwrap();
        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        while seen.len() < 10 {
            if let Some(record) = ctx.raw.pop_timeout(Duration::from_secs(5)) {
                assert_eq!(&record.payload[..], &[record.index as u8; 40][..]);
                order.push(record.index);
                seen.insert(record.index);
            } else {
                panic!("loader stalled after {:?}", order);
            }
        }
        wait_until(|| loader.is_finished());
        loader.stop();

        assert_eq!(seen, (0..10).collect());
        // most recent chunk first
        assert_eq!(order[0], 9);
        assert!(ctx.spool.lock().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_corrupt_chunk_reports_lost_records() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut rx) = context(dir.path(), 1 << 20);

        let path = ctx.spool.lock().top().unwrap().path.clone();
        let mut writer = ChunkWriter::open(&path).unwrap();
        for i in 0..3 {
            let bytes = writer.append(&FrameRecord::new(i, vec![1u8; 16])).unwrap();
            ctx.spool.lock().record_appended(i, bytes);
        }
        writer.finish().unwrap();
        // chop the last record in half
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 10)
            .unwrap();

        let mut loader = spawn_load(ctx.clone()).unwrap();
        wait_until(|| loader.is_finished());
        loader.stop();

        assert_eq!(ctx.raw.len(), 2);
        assert_eq!(rx.try_recv().unwrap(), PipelineEvent::ChunkLost { indices: vec![2] });
        assert!(!path.exists());
    }

    #[test]
    fn test_save_without_directory_drops_frames() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let (ctx, mut rx) = context(&missing, 1 << 20);

        let mut saver = spawn_save(ctx.clone()).unwrap();
        ctx.raw.try_push(FrameRecord::new(-1, vec![0u8; 4])).unwrap();
        let event = loop {
            if let Ok(event) = rx.try_recv() {
                break event;
            }
            thread::sleep(Duration::from_millis(1));
        };
        saver.stop();
        assert_eq!(
            event,
            PipelineEvent::Dropped {
                index: -1,
                stage: DropStage::Spool
            }
        );
    }
}
