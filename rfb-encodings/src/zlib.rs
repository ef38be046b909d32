//! Zlib encoding decoder - raw pixel data carried inside a continuous zlib stream.
//!
//! Zlib (type 6) is Raw encoding with the pixel bytes passed through zlib deflate.
//! Each rectangle is preceded by a 4-byte big-endian length, followed by that many
//! bytes of zlib-compressed data. Decompressing yields exactly
//! `width * height * bytes_per_pixel` bytes of raw pixel data in row-major order -
//! the same payload [`crate::RawDecoder`] would have read uncompressed.
//!
//! Like ZRLE, the deflate stream is continuous across every rectangle encoded with
//! this type for the lifetime of the connection; only the very first chunk carries
//! the zlib header. The decompressor therefore needs to persist across calls, which
//! is why [`ZlibDecoder`] keeps its inflater behind a [`Mutex`] rather than treating
//! decode as a pure function of its arguments.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_ZLIB};
use anyhow::{bail, Context, Result};
use flate2::{Decompress, FlushDecompress};
use rfb_common::Rect;
use std::sync::Mutex;
use tokio::io::AsyncRead;

/// Decoder for Zlib encoding (Raw pixels wrapped in a persistent deflate stream).
pub struct ZlibDecoder {
    inflater: Mutex<Decompress>,
}

impl Default for ZlibDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibDecoder {
    /// Create a new Zlib decoder with a fresh zlib inflater.
    pub fn new() -> Self {
        Self {
            inflater: Mutex::new(Decompress::new(true)),
        }
    }

    /// Reset the zlib inflater, starting a fresh stream with its own header.
    pub fn reset(&self) {
        self.inflater.lock().unwrap().reset(true);
    }

    fn decompress(&self, compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut decompressed = Vec::with_capacity(expected_len);
        let mut inflater = self.inflater.lock().unwrap();

        let mut in_pos = 0;
        let mut out_buf = vec![0u8; 64 * 1024];

        while decompressed.len() < expected_len {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();

            let status = inflater
                .decompress(&compressed[in_pos..], &mut out_buf, FlushDecompress::Sync)
                .context("Zlib: decompression failed")?;

            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;

            in_pos += consumed;
            decompressed.extend_from_slice(&out_buf[..produced]);

            if in_pos >= compressed.len() && produced == 0 {
                break;
            }

            match status {
                flate2::Status::Ok | flate2::Status::BufError => continue,
                flate2::Status::StreamEnd => break,
            }
        }

        if decompressed.len() != expected_len {
            bail!(
                "Zlib: expected {} decompressed bytes, got {}",
                expected_len,
                decompressed.len()
            );
        }

        Ok(decompressed)
    }
}

impl Decoder for ZlibDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZLIB
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }

        let bytes_per_pixel = pixel_format.bytes_per_pixel() as usize;
        let expected_len = rect.width as usize * rect.height as usize * bytes_per_pixel;

        let compressed_len = stream
            .read_u32()
            .await
            .context("Zlib: failed to read compressed data length")?;
        let mut compressed = vec![0u8; compressed_len as usize];
        stream
            .read_bytes(&mut compressed)
            .await
            .context("Zlib: failed to read compressed data")?;

        let pixel_data = self
            .decompress(&compressed, expected_len)
            .context("Zlib: failed to decompress rectangle")?;

        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        buffer
            .image_rect(dest_rect, &pixel_data, rect.width as usize)
            .context("Zlib: failed to write pixel data to buffer")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer};
    use std::io::{Cursor, Write};

    fn test_pixel_format() -> PixelFormat {
        PixelFormat {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    #[tokio::test]
    async fn decodes_compressed_raw_rectangle() {
        let pf = test_pixel_format();
        let pixels: Vec<u8> = (0..(4 * 4 * 4)).map(|i| i as u8).collect();

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&pixels).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        data.extend_from_slice(&compressed);

        let mut stream = RfbInStream::new(Cursor::new(data));
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
            encoding: ENCODING_ZLIB,
        };
        let mut buffer = ManagedPixelBuffer::new(4, 4, pf.clone());
        let decoder = ZlibDecoder::new();
        decoder
            .decode(&mut stream, &rect, &pf, &mut buffer)
            .await
            .unwrap();

        let mut stride = 0;
        let out = buffer.get_buffer(Rect::new(0, 0, 4, 4), &mut stride).unwrap();
        assert_eq!(&out[..16], &pixels[..16]);
    }
}
