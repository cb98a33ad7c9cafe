//! Render surface interface.
//!
//! The recorder does not own the rendering surface. Once per rendered frame
//! the host calls [`FrameRecorder::tick`](crate::recorder::FrameRecorder::tick)
//! with something implementing [`RenderSurface`], and the recorder samples it
//! into its capture buffer when a capture is due.

use crate::error::{RecorderError, RecorderResult};

/// Set of render layers excluded from capture (layers 0-31).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LayerMask(u32);

impl LayerMask {
    /// No layer ignored.
    pub const NONE: Self = Self(0);

    /// Mask from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Add a layer. Out-of-range layers are ignored.
    pub fn insert(&mut self, layer: u8) {
        if layer < 32 {
            self.0 |= 1 << layer;
        }
    }

    /// Remove a layer.
    pub fn remove(&mut self, layer: u8) {
        if layer < 32 {
            self.0 &= !(1 << layer);
        }
    }

    /// True if `layer` is ignored.
    pub fn contains(&self, layer: u8) -> bool {
        layer < 32 && self.0 & (1 << layer) != 0
    }

    /// True if no layer is ignored.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A readable pixel source of fixed size.
pub trait RenderSurface {
    /// Width in pixels.
    fn width(&self) -> u32;

    /// Height in pixels.
    fn height(&self) -> u32;

    /// Copy the current frame as RGBA8 into `dst` (`width * height * 4` bytes),
    /// leaving out the layers in `ignored`.
    fn read_pixels(&mut self, ignored: LayerMask, dst: &mut [u8]) -> RecorderResult<()>;
}

/// Procedural test pattern: a moving gradient with one band per layer.
///
/// Layer `n` paints a horizontal band; ignored layers leave their band black.
#[derive(Debug, Clone)]
pub struct SyntheticSurface {
    width: u32,
    height: u32,
    frame: u32,
}

impl SyntheticSurface {
    /// Create a surface of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
        }
    }

    /// Frames rendered so far.
    pub fn frames_rendered(&self) -> u32 {
        self.frame
    }
}

impl RenderSurface for SyntheticSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_pixels(&mut self, ignored: LayerMask, dst: &mut [u8]) -> RecorderResult<()> {
        let expected = self.width as usize * self.height as usize * 4;
        if dst.len() != expected {
            return Err(RecorderError::Surface(format!(
                "destination holds {} bytes, frame needs {expected}",
                dst.len()
            )));
        }
        let band = (self.height / 32).max(1);
        let shift = self.frame;
        for (i, px) in dst.chunks_exact_mut(4).enumerate() {
            let x = (i as u32) % self.width;
            let y = (i as u32) / self.width;
            let layer = (y / band).min(31) as u8;
            if ignored.contains(layer) {
                px.copy_from_slice(&[0, 0, 0, 255]);
            } else {
                px.copy_from_slice(&[
                    x.wrapping_add(shift) as u8,
                    y as u8,
                    shift as u8,
                    255,
                ]);
            }
        }
        self.frame = self.frame.wrapping_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_mask_ops() {
        let mut mask = LayerMask::NONE;
        mask.insert(3);
        mask.insert(31);
        mask.insert(40);
        assert!(mask.contains(3));
        assert!(mask.contains(31));
        assert!(!mask.contains(40));
        mask.remove(3);
        assert_eq!(mask.bits(), 1 << 31);
        assert!(!mask.is_empty());
    }

    #[test]
    fn test_ignored_layer_is_blanked() {
        let mut surface = SyntheticSurface::new(4, 64);
        let mut buf = vec![0u8; 4 * 64 * 4];
        let mut mask = LayerMask::NONE;
        mask.insert(0);
        surface.read_pixels(mask, &mut buf).unwrap();
        // band height is 2 rows; layer 0 covers the first 8 pixels
        assert!(buf[..8 * 4].chunks(4).all(|px| px == [0, 0, 0, 255]));
        assert_eq!(&buf[8 * 4..8 * 4 + 2], &[0, 2]);
        assert_eq!(surface.frames_rendered(), 1);
    }

    #[test]
    fn test_wrong_buffer_size() {
        let mut surface = SyntheticSurface::new(2, 2);
        let mut buf = vec![0u8; 3];
        assert!(surface.read_pixels(LayerMask::NONE, &mut buf).is_err());
    }
}
