//! [`ManagedPixelBuffer`] owns its pixels in a plain `Vec<u8>`, row-major
//! with stride always equal to width - the buffer a decoder writes into
//! when nothing more specialized (a platform surface, say) is available.

use crate::{MutablePixelBuffer, PixelBuffer, PixelFormat};
use anyhow::{anyhow, Result};
use rfb_common::{Point, Rect};

/// Owns its pixel data contiguously: pixel `(x, y)` starts at byte offset
/// `(y * width + x) * bytes_per_pixel`, since stride always equals width here.
#[derive(Debug, Clone)]
pub struct ManagedPixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    stride: usize,
}

impl ManagedPixelBuffer {
    /// Allocates a zeroed buffer of `width x height` pixels in `format`.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize;
        let bytes_per_pixel = format.bytes_per_pixel() as usize;
        let data = vec![0u8; stride * height as usize * bytes_per_pixel];

        Self {
            width,
            height,
            format,
            data,
            stride,
        }
    }

    /// Reallocates to `width x height`, zeroed; existing pixel data is lost.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.stride = width as usize;
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        self.data
            .resize(self.stride * height as usize * bytes_per_pixel, 0);
    }

    /// Stride in pixels; always equals width for this implementation.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw pixel data, row-major with no padding between rows.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the buffer width in pixels.
    pub fn width(&self) -> usize {
        self.width as usize
    }

    /// Returns the buffer height in pixels.
    pub fn height(&self) -> usize {
        self.height as usize
    }

    /// Returns a reference to the pixel format.
    pub fn format(&self) -> &PixelFormat {
        &self.format
    }

    /// Validates that a rectangle is within buffer bounds.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the rectangle is valid
    /// - `Err` if the rectangle is out of bounds
    fn validate_rect(&self, rect: Rect) -> Result<()> {
        if rect.x as u32 + rect.width > self.width || rect.y as u32 + rect.height > self.height {
            return Err(anyhow!(
                "Rectangle out of bounds: {:?} (buffer size: {}x{})",
                rect,
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

impl PixelBuffer for ManagedPixelBuffer {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn pixel_format(&self) -> &PixelFormat {
        &self.format
    }

    fn get_buffer(&self, rect: Rect, stride: &mut usize) -> Option<&[u8]> {
        if self.validate_rect(rect).is_err() {
            return None;
        }

        *stride = self.stride;
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let start = (rect.y as usize * self.stride + rect.x as usize) * bytes_per_pixel;
        let len = rect.height as usize * self.stride * bytes_per_pixel;

        Some(&self.data[start..start + len])
    }
}

impl MutablePixelBuffer for ManagedPixelBuffer {
    fn get_buffer_rw(&mut self, rect: Rect, stride: &mut usize) -> Option<&mut [u8]> {
        if self.validate_rect(rect).is_err() {
            return None;
        }

        *stride = self.stride;
        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let start = (rect.y as usize * self.stride + rect.x as usize) * bytes_per_pixel;
        let len = rect.height as usize * self.stride * bytes_per_pixel;

        Some(&mut self.data[start..start + len])
    }

    fn commit_buffer(&mut self, _rect: Rect) {
        // No-op for ManagedPixelBuffer as we directly modify the underlying data
    }

    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()> {
        self.validate_rect(rect)?;

        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        if pixel.len() != bytes_per_pixel {
            return Err(anyhow!(
                "Invalid pixel size: got {} bytes, expected {}",
                pixel.len(),
                bytes_per_pixel
            ));
        }

        for y in 0..rect.height as usize {
            let row_offset =
                ((rect.y as usize + y) * self.stride + rect.x as usize) * bytes_per_pixel;

            for x in 0..rect.width as usize {
                let offset = row_offset + x * bytes_per_pixel;
                self.data[offset..offset + bytes_per_pixel].copy_from_slice(pixel);
            }
        }

        Ok(())
    }

    fn copy_rect(&mut self, dest: Rect, src_offset: Point) -> Result<()> {
        self.validate_rect(dest)?;

        // src_offset is measured from dest to source.
        let src_x = dest.x + src_offset.x;
        let src_y = dest.y + src_offset.y;
        let src_rect = Rect::new(src_x, src_y, dest.width, dest.height);
        self.validate_rect(src_rect)?;

        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let rect_width_bytes = dest.width as usize * bytes_per_pixel;

        // Copy away from the overlap direction so source rows aren't clobbered
        // before they're read.
        if src_offset.y < 0 || (src_offset.y == 0 && src_offset.x < 0) {
            for y in (0..dest.height as usize).rev() {
                let src_offset_calc = ((src_rect.y as usize + y) * self.stride
                    + src_rect.x as usize)
                    * bytes_per_pixel;
                let dst_offset_calc =
                    ((dest.y as usize + y) * self.stride + dest.x as usize) * bytes_per_pixel;

                self.data.copy_within(
                    src_offset_calc..src_offset_calc + rect_width_bytes,
                    dst_offset_calc,
                );
            }
        } else {
            for y in 0..dest.height as usize {
                let src_offset_calc = ((src_rect.y as usize + y) * self.stride
                    + src_rect.x as usize)
                    * bytes_per_pixel;
                let dst_offset_calc =
                    ((dest.y as usize + y) * self.stride + dest.x as usize) * bytes_per_pixel;

                self.data.copy_within(
                    src_offset_calc..src_offset_calc + rect_width_bytes,
                    dst_offset_calc,
                );
            }
        }

        Ok(())
    }

    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()> {
        self.validate_rect(dest)?;

        let bytes_per_pixel = self.format.bytes_per_pixel() as usize;
        let rect_width_bytes = dest.width as usize * bytes_per_pixel;

        let actual_src_stride = if stride == 0 {
            dest.width as usize
        } else {
            stride
        };
        let actual_src_stride_bytes = actual_src_stride * bytes_per_pixel;

        let required_src_bytes =
            actual_src_stride_bytes * (dest.height as usize - 1) + rect_width_bytes;
        if pixels.len() < required_src_bytes {
            return Err(anyhow!(
                "Insufficient source data: got {} bytes, need at least {}",
                pixels.len(),
                required_src_bytes
            ));
        }

        for y in 0..dest.height as usize {
            let dst_offset =
                ((dest.y as usize + y) * self.stride + dest.x as usize) * bytes_per_pixel;
            let src_offset = y * actual_src_stride_bytes;

            self.data[dst_offset..dst_offset + rect_width_bytes]
                .copy_from_slice(&pixels[src_offset..src_offset + rect_width_bytes]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_buffer() {
        let buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        assert_eq!(buffer.dimensions(), (100, 100));
        assert_eq!(buffer.stride(), 100);
        assert_eq!(buffer.data().len(), 100 * 100 * 4);
    }

    #[test]
    fn test_resize() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        buffer.resize(200, 150);
        assert_eq!(buffer.dimensions(), (200, 150));
        assert_eq!(buffer.stride(), 200);
        assert_eq!(buffer.data().len(), 200 * 150 * 4);
    }

    #[test]
    fn test_fill_rect() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let format = buffer.pixel_format().clone();
        let red = format.from_rgb888([255, 0, 0, 255]);

        let rect = Rect::new(10, 10, 20, 20);
        buffer.fill_rect(rect, &red).unwrap();

        // Verify a pixel in the filled region
        let mut stride = 0;
        if let Some(pixels) = buffer.get_buffer(Rect::new(15, 15, 1, 1), &mut stride) {
            let pixel = &pixels[0..4];
            assert_eq!(pixel, &red[..]);
        } else {
            panic!("Failed to get buffer");
        }
    }

    #[test]
    fn test_copy_rect_non_overlapping() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let format = buffer.pixel_format().clone();

        // Fill source region with red
        let red = format.from_rgb888([255, 0, 0, 255]);
        buffer.fill_rect(Rect::new(10, 10, 20, 20), &red).unwrap();

        // Copy to non-overlapping destination
        // Source at (10, 10), destination at (50, 50)
        // src_offset = source - dest = (10-50, 10-50) = (-40, -40)
        let dest = Rect::new(50, 50, 20, 20);
        let src_offset = Point::new(-40, -40);
        buffer.copy_rect(dest, src_offset).unwrap();

        // Verify destination has red pixels
        let mut stride = 0;
        if let Some(pixels) = buffer.get_buffer(Rect::new(55, 55, 1, 1), &mut stride) {
            let pixel = &pixels[0..4];
            assert_eq!(pixel, &red[..]);
        } else {
            panic!("Failed to get buffer");
        }
    }

    #[test]
    fn test_copy_rect_overlapping_down() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let format = buffer.pixel_format().clone();

        // Fill source region
        let blue = format.from_rgb888([0, 0, 255, 255]);
        buffer.fill_rect(Rect::new(20, 20, 30, 30), &blue).unwrap();

        // Copy down (overlapping)
        // Source at (20, 20), destination at (20, 30)
        // src_offset = source - dest = (20-20, 20-30) = (0, -10)
        let dest = Rect::new(20, 30, 30, 30);
        let src_offset = Point::new(0, -10);
        buffer.copy_rect(dest, src_offset).unwrap();

        // Verify the copy worked
        let mut stride = 0;
        if let Some(pixels) = buffer.get_buffer(Rect::new(25, 35, 1, 1), &mut stride) {
            let pixel = &pixels[0..4];
            assert_eq!(pixel, &blue[..]);
        } else {
            panic!("Failed to get buffer");
        }
    }

    #[test]
    fn test_image_rect_tightly_packed() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let format = buffer.pixel_format().clone();

        // Create 10x10 green image (tightly packed)
        let green = format.from_rgb888([0, 255, 0, 255]);
        let mut image_data = Vec::new();
        for _ in 0..100 {
            image_data.extend_from_slice(&green);
        }

        // Copy to buffer
        let dest = Rect::new(30, 30, 10, 10);
        buffer.image_rect(dest, &image_data, 0).unwrap(); // stride=0 means tightly packed

        // Verify
        let mut stride = 0;
        if let Some(pixels) = buffer.get_buffer(Rect::new(35, 35, 1, 1), &mut stride) {
            let pixel = &pixels[0..4];
            assert_eq!(pixel, &green[..]);
        } else {
            panic!("Failed to get buffer");
        }
    }

    #[test]
    fn test_image_rect_with_stride() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let format = buffer.pixel_format().clone();

        // Create 10x10 image with stride of 20 pixels
        let yellow = format.from_rgb888([255, 255, 0, 255]);
        let mut image_data = Vec::new();
        for _ in 0..10 {
            // 10 rows
            for _ in 0..10 {
                // 10 pixels of data
                image_data.extend_from_slice(&yellow);
            }
            for _ in 0..10 {
                // 10 pixels of padding
                image_data.extend_from_slice(&[0, 0, 0, 0]);
            }
        }

        // Copy to buffer with stride=20
        let dest = Rect::new(40, 40, 10, 10);
        buffer.image_rect(dest, &image_data, 20).unwrap();

        // Verify
        let mut stride = 0;
        if let Some(pixels) = buffer.get_buffer(Rect::new(45, 45, 1, 1), &mut stride) {
            let pixel = &pixels[0..4];
            assert_eq!(pixel, &yellow[..]);
        } else {
            panic!("Failed to get buffer");
        }
    }

    #[test]
    fn test_validate_rect_out_of_bounds() {
        let buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());

        // Too wide
        let rect = Rect::new(90, 50, 20, 10);
        assert!(buffer.validate_rect(rect).is_err());

        // Too tall
        let rect = Rect::new(50, 90, 10, 20);
        assert!(buffer.validate_rect(rect).is_err());

        // Valid rectangle
        let rect = Rect::new(50, 50, 40, 40);
        assert!(buffer.validate_rect(rect).is_ok());
    }

    #[test]
    fn test_get_buffer() {
        let buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let rect = Rect::new(10, 10, 50, 50);
        let mut stride = 0;

        let slice = buffer.get_buffer(rect, &mut stride);
        assert!(slice.is_some());
        assert_eq!(stride, 100); // Stride equals width
    }

    #[test]
    fn test_get_buffer_rw() {
        let mut buffer = ManagedPixelBuffer::new(100, 100, PixelFormat::rgb888());
        let rect = Rect::new(10, 10, 50, 50);
        let mut stride = 0;

        let slice = buffer.get_buffer_rw(rect, &mut stride);
        assert!(slice.is_some());
        assert_eq!(stride, 100);

        // Commit should not panic
        buffer.commit_buffer(rect);
    }
}
