//! Recording state controller and capture/encode driver.
//!
//! [`FrameRecorder`] is driven from the render loop: the host calls
//! [`FrameRecorder::tick`] once per rendered frame and the UI calls the
//! start/stop operations. The lifecycle is
//!
//! ```text
//! Idle --start--> Countdown --deadline--> Recording --stop--> Processing --done--> Idle
//!                     |                                            |
//!                     +-------------------stop---------------------+--stop_processing
//! ```
//!
//! Any call that does not match the current state is a no-op.
//!
//! # Threads
//!
//! The tick runs on the caller's thread and never waits unboundedly: a full raw
//! queue is a counted drop, and a full encoded queue is waited on for at most
//! `encode_offer_timeout_ms` before the frame is dropped. Alongside it run at
//! most two worker threads: the spool worker (save mode while capturing, load
//! mode while processing) and, during processing, the finalize worker.
//!
//! All counters are updated here. Workers report outcomes through a channel
//! that is drained at the start of every tick and once more at teardown, so
//! counters read between ticks may trail the workers by one tick.

use crate::capture::{LayerMask, RenderSurface};
use crate::clock::Clock;
use crate::config::{sanitize_countdown, RecorderConfig};
use crate::data::encode::{FrameEncoder, ImageEncoder};
use crate::data::frame::FrameRecord;
use crate::data::queue::BoundedQueue;
use crate::data::spool::{SharedSpool, SpoolStore};
use crate::error::{RecorderError, RecorderResult};
use crate::pipeline::counters::{
    event_channel, DropStage, EventReceiver, EventSender, FrameCounters, PipelineEvent,
};
use crate::pipeline::finalize_worker::{self, FinalizeContext};
use crate::pipeline::pacing::FramePacer;
use crate::pipeline::spool_worker::{self, SpoolContext};
use crate::pipeline::worker::WorkerHandle;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    /// No session.
    Idle,
    /// Capturing pre-roll frames.
    Countdown,
    /// Capturing recorded frames.
    Recording,
    /// Encoding and finalizing captured frames.
    Processing,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Countdown => "countdown",
            Self::Recording => "recording",
            Self::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of the recorder for display or logging.
#[derive(Debug, Clone, Serialize)]
pub struct FrameStats {
    /// Current lifecycle state.
    pub state: RecorderState,
    /// Frame counters.
    #[serde(flatten)]
    pub counters: FrameCounters,
    /// Recorded time, excluding the countdown.
    pub duration_secs: f64,
    /// Countdown time left.
    pub countdown_remaining_secs: f64,
    /// Index the next capture will get.
    pub curr_frame_index: i32,
    /// Frames waiting in the raw queue.
    pub raw_queued: usize,
    /// Frames waiting in the encoded queue.
    pub encoded_queued: usize,
    /// Frames sitting in spool chunks.
    pub spooled: u64,
    /// Session directory.
    pub directory: Option<PathBuf>,
}

/// Resources that live exactly as long as one recording session.
struct Session {
    dir: PathBuf,
    raw: Arc<BoundedQueue<FrameRecord>>,
    encoded: Arc<BoundedQueue<FrameRecord>>,
    spool: SharedSpool,
    spool_worker: Option<WorkerHandle>,
    finalize_worker: Option<WorkerHandle>,
    events_tx: EventSender,
    events: EventReceiver,
    capture_buf: Vec<u8>,
    pacer: FramePacer,
    countdown_deadline: Duration,
    recording_start: Duration,
    dropped_indices: Vec<i32>,
}

impl Session {
    fn spool_context(&self, config: &RecorderConfig, frame_bytes: usize) -> SpoolContext {
        SpoolContext {
            raw: Arc::clone(&self.raw),
            spool: Arc::clone(&self.spool),
            events: self.events_tx.clone(),
            chunk_byte_limit: config.chunk_byte_limit,
            max_payload: frame_bytes,
            poll: config.worker_poll(),
        }
    }

    fn stop_workers(&mut self) {
        if let Some(mut worker) = self.spool_worker.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.finalize_worker.take() {
            worker.stop();
        }
    }

    fn drain_events(&mut self, counters: &mut FrameCounters) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                PipelineEvent::Finalized { index } => counters.finalized(index),
                PipelineEvent::Dropped { index, stage } => {
                    debug!(index, %stage, "Frame dropped by worker");
                    counters.dropped(1);
                    self.dropped_indices.push(index);
                }
                PipelineEvent::ChunkLost { indices } => {
                    debug!(frames = indices.len(), "Spooled frames lost");
                    counters.dropped(indices.len() as u64);
                    self.dropped_indices.extend(indices);
                }
            }
        }
    }
}

/// Paced frame recorder with disk spooling and background finalization.
pub struct FrameRecorder {
    config: RecorderConfig,
    clock: Arc<dyn Clock>,
    encoder: Box<dyn FrameEncoder>,
    state: RecorderState,
    counters: FrameCounters,
    ignored: LayerMask,
    frame_index: i32,
    duration: Duration,
    countdown_remaining: Duration,
    directory: Option<PathBuf>,
    session: Option<Session>,
}

impl fmt::Debug for FrameRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRecorder")
            .field("state", &self.state)
            .field("counters", &self.counters)
            .field("frame_index", &self.frame_index)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl FrameRecorder {
    /// Create an idle recorder that encodes with [`ImageEncoder`].
    pub fn new(config: RecorderConfig, clock: Arc<dyn Clock>) -> Self {
        let config = config.sanitized();
        let encoder = ImageEncoder::new(config.quality);
        Self::with_encoder(config, clock, Box::new(encoder))
    }

    /// Create an idle recorder with a custom encoder.
    pub fn with_encoder(
        config: RecorderConfig,
        clock: Arc<dyn Clock>,
        encoder: Box<dyn FrameEncoder>,
    ) -> Self {
        Self {
            config: config.sanitized(),
            clock,
            encoder,
            state: RecorderState::Idle,
            counters: FrameCounters::default(),
            ignored: LayerMask::NONE,
            frame_index: 0,
            duration: Duration::ZERO,
            countdown_remaining: Duration::ZERO,
            directory: None,
            session: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Begin a session: Idle → Countdown.
    ///
    /// Resets the counters, creates the session directory and the first spool
    /// chunk name, and starts the spool worker in save mode. A directory that
    /// cannot be created is logged and the session runs degraded. Returns an
    /// error only if the queues, capture buffer or worker cannot be set up.
    pub fn start_recording(&mut self) -> RecorderResult<()> {
        if self.state != RecorderState::Idle {
            debug!(state = %self.state, "start_recording ignored");
            return Ok(());
        }

        self.config.validate()?;
        let frame_bytes = self.config.frame_bytes()?;
        let capacity = self.config.queue_capacity;
        let raw = BoundedQueue::new(capacity).ok_or_else(|| {
            RecorderError::Allocation(format!("raw queue of {capacity} slots"))
        })?;
        let encoded = BoundedQueue::new(capacity).ok_or_else(|| {
            RecorderError::Allocation(format!("encoded queue of {capacity} slots"))
        })?;
        let mut capture_buf = Vec::new();
        capture_buf
            .try_reserve_exact(frame_bytes)
            .map_err(|e| RecorderError::Allocation(format!("capture buffer: {e}")))?;
        capture_buf.resize(frame_bytes, 0);

        let dir = self.config.output_dir.join(session_dir_name());
        if let Err(source) = fs::create_dir_all(&dir) {
            let err = RecorderError::DirectoryCreate {
                path: dir.clone(),
                source,
            };
            error!(error = %err, "Continuing without a session directory; frames will drop");
        }

        let mut store = SpoolStore::new(&dir);
        store.push_chunk();
        let (events_tx, events) = event_channel();
        let now = self.clock.now();

        let mut session = Session {
            dir: dir.clone(),
            raw: Arc::new(raw),
            encoded: Arc::new(encoded),
            spool: store.shared(),
            spool_worker: None,
            finalize_worker: None,
            events_tx,
            events,
            capture_buf,
            pacer: FramePacer::new(self.config.frame_interval(), now),
            countdown_deadline: now
                .checked_add(self.config.countdown())
                .unwrap_or(Duration::MAX),
            recording_start: now,
            dropped_indices: Vec::new(),
        };
        match spool_worker::spawn_save(session.spool_context(&self.config, frame_bytes)) {
            Ok(worker) => session.spool_worker = Some(worker),
            Err(e) => {
                remove_dir_if_empty(&dir);
                return Err(e);
            }
        }

        self.counters = FrameCounters::default();
        self.frame_index = -1;
        self.duration = Duration::ZERO;
        self.countdown_remaining = self.config.countdown();
        self.directory = Some(dir.clone());
        self.session = Some(session);
        self.state = RecorderState::Countdown;
        info!(
            directory = %dir.display(),
            fps = self.config.frame_rate,
            countdown_secs = self.config.countdown_secs,
            "Recording session started"
        );
        Ok(())
    }

    /// Recording → Processing, or abort Countdown → Idle.
    pub fn stop_recording(&mut self) {
        match self.state {
            RecorderState::Recording => self.begin_processing(),
            RecorderState::Countdown => {
                info!("Countdown aborted, discarding session");
                self.enter_idle();
            }
            _ => debug!(state = %self.state, "stop_recording ignored"),
        }
    }

    /// Processing → Idle without waiting for the remaining frames.
    ///
    /// The finalize worker is joined after its current write, but frames still
    /// queued or spooled are discarded.
    pub fn stop_processing(&mut self) {
        if self.state == RecorderState::Processing {
            info!(
                in_flight = self.counters.in_flight(),
                "Processing stopped early"
            );
            self.enter_idle();
        } else {
            debug!(state = %self.state, "stop_processing ignored");
        }
    }

    /// Set the pre-roll duration used by the next session.
    pub fn set_countdown(&mut self, secs: f64) {
        self.config.countdown_secs = sanitize_countdown(secs);
    }

    fn begin_recording(&mut self, now: Duration) {
        if let Some(session) = self.session.as_mut() {
            session.recording_start = now;
            session.pacer.restart(now);
        }
        self.frame_index = 0;
        self.duration = Duration::ZERO;
        self.countdown_remaining = Duration::ZERO;
        self.state = RecorderState::Recording;
        info!(
            preroll_frames = self.counters.frames_expect,
            "Countdown finished, recording"
        );
    }

    fn begin_processing(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        self.duration = self.clock.now().saturating_sub(session.recording_start);

        if let Some(mut saver) = session.spool_worker.take() {
            saver.stop();
        }
        let frame_bytes = session.capture_buf.len();
        let spool_ctx = session.spool_context(&self.config, frame_bytes);
        let finalize_ctx = FinalizeContext {
            encoded: Arc::clone(&session.encoded),
            dir: session.dir.clone(),
            extension: self.encoder.extension(),
            events: session.events_tx.clone(),
            poll: self.config.worker_poll(),
        };

        let started = spool_worker::spawn_load(spool_ctx).and_then(|loader| {
            session.spool_worker = Some(loader);
            finalize_worker::spawn(finalize_ctx)
        });
        match started {
            Ok(finalizer) => {
                session.finalize_worker = Some(finalizer);
                self.state = RecorderState::Processing;
                info!(
                    frames_expect = self.counters.frames_expect,
                    duration_secs = self.duration.as_secs_f64(),
                    "Recording stopped, processing"
                );
            }
            Err(e) => {
                error!(error = %e, "Failed to start processing workers, discarding session");
                self.enter_idle();
            }
        }
    }

    /// Tear the session down and return to Idle. Safe to call repeatedly.
    fn enter_idle(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop_workers();
            session.drain_events(&mut self.counters);

            let chunks = session.spool.lock().purge();
            let raw = session.raw.clear();
            let encoded = session.encoded.clear();
            session.dropped_indices.clear();
            remove_dir_if_empty(&session.dir);

            info!(
                frames_expect = self.counters.frames_expect,
                frames_actual = self.counters.frames_actual,
                frames_dropped = self.counters.frames_dropped,
                discarded_chunks = chunks,
                discarded_queued = raw + encoded,
                "Recording session ended"
            );
        }
        self.state = RecorderState::Idle;
        self.countdown_remaining = Duration::ZERO;
    }

    // =========================================================================
    // Per-frame driver
    // =========================================================================

    /// Per-rendered-frame callback.
    pub fn tick(&mut self, surface: &mut dyn RenderSurface) {
        if let Some(session) = self.session.as_mut() {
            session.drain_events(&mut self.counters);
        }
        let now = self.clock.now();

        match self.state {
            RecorderState::Idle => {}
            RecorderState::Countdown => {
                let deadline = self
                    .session
                    .as_ref()
                    .map_or(now, |s| s.countdown_deadline);
                if now >= deadline {
                    self.begin_recording(now);
                } else {
                    self.countdown_remaining = deadline - now;
                }
                self.capture_if_due(now, surface);
            }
            RecorderState::Recording => {
                if let Some(session) = self.session.as_ref() {
                    self.duration = now.saturating_sub(session.recording_start);
                }
                self.capture_if_due(now, surface);
            }
            RecorderState::Processing => {
                self.encode_next();
                if let Some(session) = self.session.as_mut() {
                    session.drain_events(&mut self.counters);
                }
                if self.counters.is_complete() {
                    info!(
                        frames_actual = self.counters.frames_actual,
                        frames_dropped = self.counters.frames_dropped,
                        "All frames processed"
                    );
                    self.enter_idle();
                }
            }
        }
    }

    fn capture_if_due(&mut self, now: Duration, surface: &mut dyn RenderSurface) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.pacer.poll(now) {
            return;
        }

        let index = self.frame_index;
        self.frame_index = match self.state {
            RecorderState::Countdown => index - 1,
            _ => index + 1,
        };
        self.counters.expect_one();

        if let Err(e) = capture_frame(session, &self.config, self.ignored, index, surface) {
            warn!(index, stage = %DropStage::Capture, error = %e, "Frame dropped");
            self.counters.dropped(1);
            session.dropped_indices.push(index);
        }
    }

    fn encode_next(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(raw) = session.raw.try_pop() else {
            return;
        };
        let index = raw.index;
        let timeout = self.config.encode_offer_timeout();

        let result = self
            .encoder
            .encode(self.config.width, self.config.height, &raw.payload)
            .and_then(|bytes| {
                session
                    .encoded
                    .push_timeout(FrameRecord::new(index, bytes), timeout)
                    .map_err(|_| {
                        RecorderError::Encode(format!(
                            "encoded queue still full after {}ms",
                            timeout.as_millis()
                        ))
                    })
            });
        if let Err(e) = result {
            warn!(index, stage = %DropStage::Encode, error = %e, "Frame dropped");
            self.counters.dropped(1);
            session.dropped_indices.push(index);
        }
    }

    // =========================================================================
    // Render-surface filtering
    // =========================================================================

    /// Exclude a layer from captured frames.
    pub fn add_layer_to_ignore(&mut self, layer: u8) {
        self.ignored.insert(layer);
    }

    /// Include a previously ignored layer again.
    pub fn remove_layer_to_ignore(&mut self, layer: u8) {
        self.ignored.remove(layer);
    }

    /// Capture every layer.
    pub fn reset_layer_to_ignore(&mut self) {
        self.ignored = LayerMask::NONE;
    }

    /// Layers currently excluded.
    pub fn ignored_layers(&self) -> LayerMask {
        self.ignored
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current lifecycle state.
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// True in Idle.
    pub fn is_idling(&self) -> bool {
        self.state == RecorderState::Idle
    }

    /// True in Countdown.
    pub fn is_counting_down(&self) -> bool {
        self.state == RecorderState::Countdown
    }

    /// True in Recording.
    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    /// True in Processing.
    pub fn is_processing(&self) -> bool {
        self.state == RecorderState::Processing
    }

    /// Capture attempts this session.
    pub fn frames_expect(&self) -> u64 {
        self.counters.frames_expect
    }

    /// Frames finalized this session.
    pub fn frames_actual(&self) -> u64 {
        self.counters.frames_actual
    }

    /// Frames lost this session.
    pub fn frames_dropped(&self) -> u64 {
        self.counters.frames_dropped
    }

    /// Pre-roll frames finalized this session.
    pub fn frames_countdown(&self) -> u64 {
        self.counters.frames_countdown
    }

    /// Recorded frames finalized this session.
    pub fn frames_succeeded(&self) -> u64 {
        self.counters.frames_succeeded
    }

    /// All counters.
    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    /// Time recorded since the countdown ended.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Countdown time left.
    pub fn countdown_remaining(&self) -> Duration {
        self.countdown_remaining
    }

    /// Index the next capture will get.
    pub fn curr_frame_index(&self) -> i32 {
        self.frame_index
    }

    /// Directory of the current (or last) session.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Indices of frames dropped in the current session, including frames lost
    /// with an unreadable spool chunk. Cleared when the session ends.
    pub fn dropped_indices(&self) -> &[i32] {
        self.session
            .as_ref()
            .map(|s| s.dropped_indices.as_slice())
            .unwrap_or(&[])
    }

    /// Frames waiting in the raw queue.
    pub fn raw_queued(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.raw.len())
    }

    /// Snapshot for display or logging.
    pub fn stats(&self) -> FrameStats {
        let (raw_queued, encoded_queued, spooled) =
            self.session.as_ref().map_or((0, 0, 0), |s| {
                (s.raw.len(), s.encoded.len(), s.spool.lock().pending_records())
            });
        FrameStats {
            state: self.state,
            counters: self.counters.clone(),
            duration_secs: self.duration.as_secs_f64(),
            countdown_remaining_secs: self.countdown_remaining.as_secs_f64(),
            curr_frame_index: self.frame_index,
            raw_queued,
            encoded_queued,
            spooled,
            directory: self.directory.clone(),
        }
    }
}

impl Drop for FrameRecorder {
    fn drop(&mut self) {
        self.enter_idle();
    }
}

/// Sample the surface and offer the frame to the raw queue.
fn capture_frame(
    session: &mut Session,
    config: &RecorderConfig,
    ignored: LayerMask,
    index: i32,
    surface: &mut dyn RenderSurface,
) -> RecorderResult<()> {
    if surface.width() != config.width || surface.height() != config.height {
        return Err(RecorderError::Surface(format!(
            "surface is {}x{}, recording {}x{}",
            surface.width(),
            surface.height(),
            config.width,
            config.height
        )));
    }
    surface.read_pixels(ignored, &mut session.capture_buf)?;
    let record = FrameRecord::new(index, Bytes::copy_from_slice(&session.capture_buf));
    session
        .raw
        .try_push(record)
        .map_err(|_| RecorderError::CaptureDropped { index })
}

fn session_dir_name() -> String {
    format!(
        "session_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S_%3f")
    )
}

fn remove_dir_if_empty(dir: &Path) {
    let empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => return,
    };
    if !empty {
        debug!(directory = %dir.display(), "Keeping session directory");
        return;
    }
    match fs::remove_dir(dir) {
        Ok(()) => debug!(directory = %dir.display(), "Removed empty session directory"),
        Err(e) => warn!(directory = %dir.display(), error = %e, "Failed to remove session directory"),
    }
}
