//! Raw (type 0) - uncompressed pixels, server pixel format, row-major order.
//!
//! No framing beyond the rectangle header: the body is exactly
//! `width * height * bytes_per_pixel` bytes. Slowest on the wire, cheapest to
//! decode; servers fall back to it when nothing smarter is negotiated.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_RAW};
use anyhow::{Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Decoder for Raw (type 0).
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_RAW
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        let width = rect.width as usize;
        let height = rect.height as usize;

        if width == 0 || height == 0 {
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let total_bytes = width * height * bytes_per_pixel;

        // Read all pixel data from the stream
        let mut pixel_data = vec![0u8; total_bytes];
        stream
            .read_bytes(&mut pixel_data)
            .await
            .context("Failed to read raw pixel data from stream")?;

        // Get the destination rectangle in the buffer
        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );

        // Write pixel data to buffer using image_rect
        // Stride equals width since we have tightly packed data
        buffer
            .image_rect(dest_rect, &pixel_data, width)
            .context("Failed to write raw pixel data to buffer")?;

        Ok(())
    }
}
