//! RGBA frame buffer shared between the decode worker and readers

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::errors::EngineError;
use crate::options::GifOptions;

/// Pixel buffer the current frame is rendered into.
///
/// A buffer may be larger than the canvas it holds (when it is reused from
/// a bigger animation), frames always occupy its top-left corner.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    image: RgbaImage,
    canvas: (u32, u32),
}

impl FrameBuffer {
    /// Transparent buffer of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            canvas: (width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.image.width() >= width && self.image.height() >= height
    }

    pub fn byte_count(&self) -> u64 {
        self.image.as_raw().len() as u64
    }

    /// Reuses this buffer for a canvas of the given size, clearing it.
    pub(crate) fn reuse_for(mut self, width: u32, height: u32) -> Result<Self, EngineError> {
        if !self.fits(width, height) {
            return Err(EngineError::InvalidArgument(format!(
                "buffer {}x{} is smaller than canvas {}x{}",
                self.width(),
                self.height(),
                width,
                height
            )));
        }
        self.canvas = (width, height);
        self.clear();
        Ok(self)
    }

    pub fn clear(&mut self) {
        self.image.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
    }

    /// Draws a fully composited frame, scaling it down to the canvas.
    pub fn draw(&mut self, frame: &RgbaImage, options: &GifOptions) {
        let (width, height) = self.canvas;
        let scaled;
        let source = if frame.width() != width || frame.height() != height {
            scaled = imageops::resize(frame, width, height, FilterType::Nearest);
            &scaled
        } else {
            frame
        };

        imageops::replace(&mut self.image, source, 0, 0);

        if options.opaque {
            for y in 0..height.min(self.image.height()) {
                for x in 0..width.min(self.image.width()) {
                    self.image.get_pixel_mut(x, y)[3] = 255;
                }
            }
        }
    }

    /// Pixel at `(x, y)` of the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> Result<Rgba<u8>, EngineError> {
        let (width, height) = self.canvas;
        if x >= width {
            return Err(EngineError::InvalidArgument(format!("x must be < width ({width}), got {x}")));
        }
        if y >= height {
            return Err(EngineError::InvalidArgument(format!("y must be < height ({height}), got {y}")));
        }
        Ok(*self.image.get_pixel(x, y))
    }

    /// Copy of the canvas region.
    pub fn snapshot(&self) -> RgbaImage {
        let (width, height) = self.canvas;
        imageops::crop_imm(&self.image, 0, 0, width, height).to_image()
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(rgba))
    }

    #[test]
    fn test_draw_same_size() {
        let mut buffer = FrameBuffer::new(3, 2);
        buffer.draw(&solid(3, 2, [1, 2, 3, 255]), &GifOptions::default());
        assert_eq!(buffer.pixel(2, 1).unwrap(), Rgba([1, 2, 3, 255]));
        assert_eq!(buffer.byte_count(), 3 * 2 * 4);
    }

    #[test]
    fn test_draw_subsampled() {
        let mut buffer = FrameBuffer::new(2, 2);
        buffer.draw(&solid(4, 4, [9, 9, 9, 255]), &GifOptions::new().with_sample_size(2));
        assert_eq!(buffer.snapshot().dimensions(), (2, 2));
        assert_eq!(buffer.pixel(1, 1).unwrap(), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn test_opaque_forces_alpha() {
        let mut buffer = FrameBuffer::new(2, 2);
        buffer.draw(&solid(2, 2, [5, 5, 5, 0]), &GifOptions::new().with_opaque(true));
        assert_eq!(buffer.pixel(0, 0).unwrap()[3], 255);
    }

    #[test]
    fn test_reused_buffer_keeps_frame_in_corner() {
        let mut buffer = FrameBuffer::new(8, 8).reuse_for(2, 2).unwrap();
        buffer.draw(&solid(2, 2, [7, 0, 0, 255]), &GifOptions::default());

        assert_eq!(buffer.width(), 8);
        assert_eq!(buffer.snapshot().dimensions(), (2, 2));
        assert_eq!(buffer.as_image().get_pixel(3, 3), &Rgba([0, 0, 0, 0]));
        assert!(buffer.pixel(2, 0).is_err());
    }

    #[test]
    fn test_reuse_too_small_fails() {
        assert!(FrameBuffer::new(2, 2).reuse_for(3, 3).is_err());
    }
}
