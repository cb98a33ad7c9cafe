//! Recorder configuration using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults ([`RecorderConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `FRAMEREC_`
//!
//! ```text
//! FRAMEREC_FRAME_RATE=60
//! FRAMEREC_COUNTDOWN_SECS=1.5
//! FRAMEREC_OUTPUT_DIR=/data/captures
//! ```
//!
//! Values that have an obvious safe fallback (frame rate, countdown, chunk
//! limit, JPEG quality) are clamped by [`RecorderConfig::sanitized`]. Values
//! without one (resolution, queue capacity) are rejected by
//! [`RecorderConfig::validate`] when a session starts.

use crate::error::{RecorderError, RecorderResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Frame rate used when the configured one is not a positive number.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Spool chunk size limit used when the configured one is zero.
pub const DEFAULT_CHUNK_BYTE_LIMIT: u64 = 64 * 1024 * 1024;

/// Raw/encoded queue capacity in the reference sizing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Longest accepted countdown, in seconds.
pub const MAX_COUNTDOWN_SECS: f64 = 24.0 * 60.0 * 60.0;

const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Output image quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputQuality {
    /// PNG output.
    Lossless,
    /// JPEG output at the given quality (1-100).
    Lossy {
        /// JPEG quality factor.
        quality: u8,
    },
}

impl Default for OutputQuality {
    fn default() -> Self {
        Self::Lossless
    }
}

impl OutputQuality {
    /// File extension of finalized frames.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Lossless => "png",
            Self::Lossy { .. } => "jpg",
        }
    }
}

/// Settings fixed for the lifetime of one recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Target capture rate in frames per second.
    pub frame_rate: f64,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Output format selection.
    pub quality: OutputQuality,
    /// Pre-roll duration before recording proper starts.
    pub countdown_secs: f64,
    /// Spool chunk rollover threshold in bytes.
    pub chunk_byte_limit: u64,
    /// Slots in each of the raw and encoded queues.
    pub queue_capacity: usize,
    /// Root directory; each session gets its own subdirectory.
    pub output_dir: PathBuf,
    /// How long the encode path may wait for room in the encoded queue.
    pub encode_offer_timeout_ms: u64,
    /// Wake-up interval for background workers waiting on a queue.
    pub worker_poll_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            width: 1280,
            height: 720,
            quality: OutputQuality::Lossless,
            countdown_secs: 3.0,
            chunk_byte_limit: DEFAULT_CHUNK_BYTE_LIMIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            output_dir: PathBuf::from("recordings"),
            encode_offer_timeout_ms: 100,
            worker_poll_ms: 5,
        }
    }
}

impl RecorderConfig {
    /// Load defaults, then `path` (if given), then `FRAMEREC_*` environment overrides.
    pub fn load(path: Option<&Path>) -> RecorderResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment.merge(Env::prefixed("FRAMEREC_")).extract()?;
        Ok(config.sanitized())
    }

    /// Return a copy with soft limits clamped to usable values.
    pub fn sanitized(mut self) -> Self {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            self.frame_rate = DEFAULT_FRAME_RATE;
        }
        self.countdown_secs = sanitize_countdown(self.countdown_secs);
        if self.chunk_byte_limit == 0 {
            self.chunk_byte_limit = DEFAULT_CHUNK_BYTE_LIMIT;
        }
        if let OutputQuality::Lossy { quality } = &mut self.quality {
            *quality = if *quality == 0 {
                DEFAULT_JPEG_QUALITY
            } else {
                (*quality).min(100)
            };
        }
        self
    }

    /// Reject settings that make a session impossible.
    pub fn validate(&self) -> RecorderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RecorderError::Configuration(format!(
                "capture resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.queue_capacity == 0 {
            return Err(RecorderError::Allocation(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        self.frame_bytes().map(|_| ())
    }

    /// Size of one raw RGBA frame.
    pub fn frame_bytes(&self) -> RecorderResult<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|px| px.checked_mul(4))
            .ok_or_else(|| {
                RecorderError::Allocation(format!(
                    "frame of {}x{} does not fit in memory",
                    self.width, self.height
                ))
            })
    }

    /// Time between two captures.
    pub fn frame_interval(&self) -> Duration {
        let rate = if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            self.frame_rate
        } else {
            DEFAULT_FRAME_RATE
        };
        Duration::from_nanos((1e9 / rate).round() as u64)
    }

    /// Pre-roll duration.
    pub fn countdown(&self) -> Duration {
        Duration::from_secs_f64(sanitize_countdown(self.countdown_secs))
    }

    /// Encoded-queue offer window.
    pub fn encode_offer_timeout(&self) -> Duration {
        Duration::from_millis(self.encode_offer_timeout_ms)
    }

    /// Background worker wake-up interval.
    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms.max(1))
    }
}

/// Clamp a countdown to `0..=MAX_COUNTDOWN_SECS` seconds. NaN becomes 0.
pub fn sanitize_countdown(secs: f64) -> f64 {
    if secs.is_nan() || secs <= 0.0 {
        0.0
    } else {
        secs.min(MAX_COUNTDOWN_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sanitize_clamps_soft_limits() {
        let cfg = RecorderConfig {
            frame_rate: -5.0,
            countdown_secs: -1.0,
            chunk_byte_limit: 0,
            quality: OutputQuality::Lossy { quality: 250 },
            ..Default::default()
        }
        .sanitized();

        assert_eq!(cfg.frame_rate, DEFAULT_FRAME_RATE);
        assert_eq!(cfg.countdown_secs, 0.0);
        assert_eq!(cfg.chunk_byte_limit, DEFAULT_CHUNK_BYTE_LIMIT);
        assert_eq!(cfg.quality, OutputQuality::Lossy { quality: 100 });
    }

    #[test]
    fn test_countdown_is_bounded() {
        assert_eq!(sanitize_countdown(f64::NAN), 0.0);
        assert_eq!(sanitize_countdown(f64::NEG_INFINITY), 0.0);
        assert_eq!(sanitize_countdown(1.5), 1.5);
        assert_eq!(sanitize_countdown(1e20), MAX_COUNTDOWN_SECS);
        assert_eq!(sanitize_countdown(f64::INFINITY), MAX_COUNTDOWN_SECS);

        let cfg = RecorderConfig {
            countdown_secs: 1e300,
            ..Default::default()
        };
        assert_eq!(cfg.countdown(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_nan_frame_rate_falls_back() {
        let cfg = RecorderConfig {
            frame_rate: f64::NAN,
            ..Default::default()
        };
        assert_eq!(cfg.frame_interval(), Duration::from_nanos(33_333_333));
    }

    #[test]
    fn test_frame_interval_is_exact_for_round_rates() {
        let cfg = RecorderConfig {
            frame_rate: 10.0,
            ..Default::default()
        };
        assert_eq!(cfg.frame_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let cfg = RecorderConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(RecorderError::Allocation(_))));
    }

    #[test]
    fn test_validate_rejects_zero_resolution() {
        let cfg = RecorderConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framerec.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
frame_rate = 12.0
width = 64
height = 48
countdown_secs = 0.5
output_dir = "/tmp/captures"

[quality]
lossy = {{ quality = 70 }}
"#
        )
        .unwrap();

        let cfg = RecorderConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.frame_rate, 12.0);
        assert_eq!((cfg.width, cfg.height), (64, 48));
        assert_eq!(cfg.quality, OutputQuality::Lossy { quality: 70 });
        assert_eq!(cfg.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/captures"));
    }

    #[test]
    fn test_quality_extension() {
        assert_eq!(OutputQuality::Lossless.extension(), "png");
        assert_eq!(OutputQuality::Lossy { quality: 80 }.extension(), "jpg");
    }
}
