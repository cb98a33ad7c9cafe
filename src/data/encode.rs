//! Raw frame to image encoding.
//!
//! The pipeline treats encoding as an opaque `raw RGBA -> image bytes` step
//! behind [`FrameEncoder`]. [`ImageEncoder`] is the stock implementation:
//! PNG for lossless output, JPEG (alpha discarded) for lossy output.

use crate::config::OutputQuality;
use crate::error::{RecorderError, RecorderResult};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder as _};

/// Converts one raw RGBA frame into encoded image bytes.
pub trait FrameEncoder: Send {
    /// Encode `rgba` (`width * height * 4` bytes).
    fn encode(&mut self, width: u32, height: u32, rgba: &[u8]) -> RecorderResult<Vec<u8>>;

    /// File extension matching the produced bytes.
    fn extension(&self) -> &'static str;
}

/// PNG/JPEG encoder selected by [`OutputQuality`].
#[derive(Debug)]
pub struct ImageEncoder {
    quality: OutputQuality,
    /// Scratch buffer for RGBA -> RGB conversion, reused across frames.
    rgb: Vec<u8>,
}

impl ImageEncoder {
    /// Create an encoder for the given quality mode.
    pub fn new(quality: OutputQuality) -> Self {
        Self {
            quality,
            rgb: Vec::new(),
        }
    }
}

impl FrameEncoder for ImageEncoder {
    fn encode(&mut self, width: u32, height: u32, rgba: &[u8]) -> RecorderResult<Vec<u8>> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(RecorderError::Encode(format!(
                "expected {expected} bytes for {width}x{height} RGBA, got {}",
                rgba.len()
            )));
        }

        let mut out = Vec::new();
        match self.quality {
            OutputQuality::Lossless => PngEncoder::new(&mut out)
                .write_image(rgba, width, height, ExtendedColorType::Rgba8)
                .map_err(|e| RecorderError::Encode(e.to_string()))?,
            OutputQuality::Lossy { quality } => {
                self.rgb.clear();
                self.rgb.reserve(width as usize * height as usize * 3);
                for px in rgba.chunks_exact(4) {
                    self.rgb.extend_from_slice(&px[..3]);
                }
                JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
                    .write_image(&self.rgb, width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| RecorderError::Encode(e.to_string()))?
            }
        }
        Ok(out)
    }

    fn extension(&self) -> &'static str {
        self.quality.extension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                buf.extend_from_slice(&[(x * 16) as u8, (y * 16) as u8, 128, 255]);
            }
        }
        buf
    }

    #[test]
    fn test_png_round_trip() {
        let rgba = gradient(8, 4);
        let mut encoder = ImageEncoder::new(OutputQuality::Lossless);
        let png = encoder.encode(8, 4, &rgba).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert_eq!(decoded.into_raw(), rgba);
    }

    #[test]
    fn test_jpeg_output() {
        let rgba = gradient(16, 16);
        let mut encoder = ImageEncoder::new(OutputQuality::Lossy { quality: 80 });
        let jpg = encoder.encode(16, 16, &rgba).unwrap();
        assert_eq!(&jpg[..2], &[0xFF, 0xD8]);
        assert_eq!(encoder.extension(), "jpg");
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let mut encoder = ImageEncoder::new(OutputQuality::Lossless);
        assert!(matches!(
            encoder.encode(4, 4, &[0u8; 10]),
            Err(RecorderError::Encode(_))
        ));
    }
}
