//! ZlibHex encoding decoder - Hextile tiles optionally wrapped in zlib.
//!
//! ZlibHex (type 8) divides the rectangle into 16x16 tiles exactly like Hextile, but
//! prefixes each tile with a 1-byte mode selector instead of sending the Hextile tile
//! straight on the wire:
//!
//! ```text
//! +------------+
//! | mode       |  1 byte: 0 = raw Hextile tile follows uncompressed
//! +------------+      1 = Hextile tile follows, zlib-compressed on stream 0
//!                     2 = Hextile tile follows, zlib-compressed on stream 1
//! | [u16 len]  |  present only when mode != 0: length of the compressed tile
//! +------------+
//! | tile data  |  a single Hextile tile (tile-type byte + body), either taken
//! +------------+  verbatim from the wire (mode 0) or produced by inflating
//!                 'len' bytes through the selected stream (mode 1/2)
//! ```
//!
//! The two zlib streams are independent and persist across tiles and rectangles for
//! the life of the connection, mirroring how Zlib and ZRLE keep their inflater alive
//! between calls. Using two streams lets a server interleave differently-compressible
//! tile content (e.g. raster content vs. text) without either stream's compression
//! ratio degrading from the other's data.
//!
//! Each decompressed tile is parsed with the same tile-body logic as plain Hextile,
//! including background/foreground persistence across tiles within one rectangle.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_ZLIBHEX};
use anyhow::{anyhow, bail, Context, Result};
use flate2::{Decompress, FlushDecompress};
use rfb_common::Rect;
use std::io::Cursor;
use std::sync::Mutex;
use tokio::io::AsyncRead;

const TILE_SIZE: u16 = 16;

const TILE_RAW: u8 = 0x01;
const TILE_BACKGROUND_SPECIFIED: u8 = 0x02;
const TILE_FOREGROUND_SPECIFIED: u8 = 0x04;
const TILE_ANY_SUBRECTS: u8 = 0x08;
const TILE_SUBRECTS_COLOURED: u8 = 0x10;

/// Decoder for ZlibHex (Hextile with optional per-tile zlib compression).
pub struct ZlibHexDecoder {
    streams: [Mutex<Decompress>; 2],
}

impl Default for ZlibHexDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibHexDecoder {
    /// Create a new decoder with two fresh zlib inflaters.
    pub fn new() -> Self {
        Self {
            streams: [
                Mutex::new(Decompress::new(true)),
                Mutex::new(Decompress::new(true)),
            ],
        }
    }

    /// Reset both zlib streams, as done when a fresh connection begins.
    pub fn reset(&self) {
        for stream in &self.streams {
            stream.lock().unwrap().reset(true);
        }
    }

    fn inflate(&self, stream_index: usize, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        let mut inflater = self.streams[stream_index].lock().unwrap();

        let mut in_pos = 0;
        let mut out_buf = vec![0u8; 16 * 1024];

        loop {
            let before_in = inflater.total_in();
            let before_out = inflater.total_out();

            let status = inflater
                .decompress(&compressed[in_pos..], &mut out_buf, FlushDecompress::Sync)
                .context("ZlibHex: zlib decompression failed")?;

            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;
            in_pos += consumed;
            decompressed.extend_from_slice(&out_buf[..produced]);

            if in_pos >= compressed.len() {
                break;
            }
            match status {
                flate2::Status::Ok | flate2::Status::BufError => continue,
                flate2::Status::StreamEnd => break,
            }
        }

        Ok(decompressed)
    }
}

impl Decoder for ZlibHexDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_ZLIBHEX
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

        let bytes_per_pixel = pixel_format.bits_per_pixel / 8;
        if bytes_per_pixel == 0 || bytes_per_pixel > 4 {
            return Err(anyhow!(
                "Invalid bytes_per_pixel: {} (must be 1-4)",
                bytes_per_pixel
            ));
        }

        let mut background: Option<Vec<u8>> = None;
        let mut foreground: Option<Vec<u8>> = None;

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = std::cmp::min(TILE_SIZE, rect.height - ty);

            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = std::cmp::min(TILE_SIZE, rect.width - tx);

                let abs_x = rect
                    .x
                    .checked_add(tx)
                    .ok_or_else(|| anyhow!("ZlibHex tile absolute x overflows"))?;
                let abs_y = rect
                    .y
                    .checked_add(ty)
                    .ok_or_else(|| anyhow!("ZlibHex tile absolute y overflows"))?;

                let mode = stream
                    .read_u8()
                    .await
                    .context("Failed to read ZlibHex tile mode byte")?;

                match mode {
                    0 => {
                        decode_tile_body(
                            stream,
                            (abs_x, abs_y),
                            (tile_w, tile_h),
                            buffer,
                            bytes_per_pixel,
                            &mut background,
                            &mut foreground,
                        )
                        .await?;
                    }
                    1 | 2 => {
                        let stream_index = (mode - 1) as usize;
                        let len = stream
                            .read_u16()
                            .await
                            .context("Failed to read ZlibHex compressed tile length")?;
                        let mut compressed = vec![0u8; len as usize];
                        stream
                            .read_bytes(&mut compressed)
                            .await
                            .context("Failed to read ZlibHex compressed tile data")?;

                        let decompressed = self
                            .inflate(stream_index, &compressed)
                            .with_context(|| format!("ZlibHex: stream {stream_index} inflate failed"))?;
                        let mut tile_stream = RfbInStream::new(Cursor::new(decompressed));
                        decode_tile_body(
                            &mut tile_stream,
                            (abs_x, abs_y),
                            (tile_w, tile_h),
                            buffer,
                            bytes_per_pixel,
                            &mut background,
                            &mut foreground,
                        )
                        .await?;
                    }
                    other => bail!("ZlibHex: invalid tile mode byte {other}"),
                }

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        Ok(())
    }
}

/// Decode one Hextile-format tile body (tile-type byte plus payload) from `stream`,
/// writing pixels for a tile located at `abs_pos` of size `tile_size`. `background`
/// and `foreground` carry state across tiles within one rectangle, exactly as in
/// plain Hextile decoding.
#[allow(clippy::too_many_arguments)]
async fn decode_tile_body<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    abs_pos: (u16, u16),
    tile_size: (u16, u16),
    buffer: &mut dyn MutablePixelBuffer,
    bytes_per_pixel: u8,
    background: &mut Option<Vec<u8>>,
    foreground: &mut Option<Vec<u8>>,
) -> Result<()> {
    let (abs_x, abs_y) = abs_pos;
    let (tile_w, tile_h) = tile_size;

    let tile_type = stream
        .read_u8()
        .await
        .context("Failed to read ZlibHex tile-type byte")?;

    if (tile_type & TILE_RAW) != 0 {
        let row_bytes = (tile_w as usize)
            .checked_mul(bytes_per_pixel as usize)
            .ok_or_else(|| anyhow!("ZlibHex RAW tile row bytes overflow"))?;
        let total_bytes = row_bytes
            .checked_mul(tile_h as usize)
            .ok_or_else(|| anyhow!("ZlibHex RAW tile total bytes overflow"))?;
        let mut raw_data = vec![0u8; total_bytes];
        stream
            .read_bytes(&mut raw_data)
            .await
            .context("Failed to read ZlibHex RAW tile data")?;

        let tile_rect = Rect::new(abs_x as i32, abs_y as i32, tile_w as u32, tile_h as u32);
        buffer
            .image_rect(tile_rect, &raw_data, tile_w as usize)
            .context("Failed to write ZlibHex RAW tile data")?;
        return Ok(());
    }

    if (tile_type & TILE_BACKGROUND_SPECIFIED) != 0 {
        let mut bg = vec![0u8; bytes_per_pixel as usize];
        stream
            .read_bytes(&mut bg)
            .await
            .context("Failed to read ZlibHex tile background")?;
        *background = Some(bg);
    }

    let bg = background
        .as_ref()
        .ok_or_else(|| anyhow!("ZlibHex tile requires a background but none was specified"))?;
    let tile_rect = Rect::new(abs_x as i32, abs_y as i32, tile_w as u32, tile_h as u32);
    buffer
        .fill_rect(tile_rect, bg)
        .context("Failed to fill ZlibHex tile background")?;

    if (tile_type & TILE_FOREGROUND_SPECIFIED) != 0 {
        let mut fg = vec![0u8; bytes_per_pixel as usize];
        stream
            .read_bytes(&mut fg)
            .await
            .context("Failed to read ZlibHex tile foreground")?;
        *foreground = Some(fg);
    }

    if (tile_type & TILE_ANY_SUBRECTS) != 0 {
        let num_subrects = stream
            .read_u8()
            .await
            .context("Failed to read ZlibHex subrect count")?;
        let subrects_coloured = (tile_type & TILE_SUBRECTS_COLOURED) != 0;

        if num_subrects > 0 && !subrects_coloured && foreground.is_none() {
            bail!("ZlibHex tile has monochrome subrects but no foreground color");
        }

        for i in 0..num_subrects {
            let color = if subrects_coloured {
                let mut col = vec![0u8; bytes_per_pixel as usize];
                stream
                    .read_bytes(&mut col)
                    .await
                    .with_context(|| format!("Failed to read color for ZlibHex subrect {i}"))?;
                col
            } else {
                foreground.as_ref().unwrap().clone()
            };

            let xy = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read XY for ZlibHex subrect {i}"))?;
            let x_off = (xy >> 4) & 0x0F;
            let y_off = xy & 0x0F;

            let wh = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read WH for ZlibHex subrect {i}"))?;
            let w = ((wh >> 4) & 0x0F) + 1;
            let h = (wh & 0x0F) + 1;

            let right = x_off
                .checked_add(w)
                .ok_or_else(|| anyhow!("ZlibHex subrect {i} x+width overflows"))?;
            let bottom = y_off
                .checked_add(h)
                .ok_or_else(|| anyhow!("ZlibHex subrect {i} y+height overflows"))?;

            if right as u16 > tile_w {
                bail!("ZlibHex subrect {i} extends beyond tile width");
            }
            if bottom as u16 > tile_h {
                bail!("ZlibHex subrect {i} extends beyond tile height");
            }

            let sr_abs_x = abs_x
                .checked_add(x_off as u16)
                .ok_or_else(|| anyhow!("ZlibHex subrect absolute x overflows"))?;
            let sr_abs_y = abs_y
                .checked_add(y_off as u16)
                .ok_or_else(|| anyhow!("ZlibHex subrect absolute y overflows"))?;
            let subrect = Rect::new(sr_abs_x as i32, sr_abs_y as i32, w as u32, h as u32);
            buffer
                .fill_rect(subrect, &color)
                .with_context(|| format!("Failed to fill ZlibHex subrect {i}"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer};
    use std::io::Write;

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

    fn get_pixel(buffer: &ManagedPixelBuffer, x: i32, y: i32) -> [u8; 4] {
        let rect = Rect::new(x, y, 1, 1);
        let mut stride = 0;
        let pixels = buffer.get_buffer(rect, &mut stride).unwrap();
        [pixels[0], pixels[1], pixels[2], pixels[3]]
    }

    #[tokio::test]
    async fn decodes_raw_mode_tile() {
        let pf = test_pixel_format();
        let mut data = vec![0u8]; // mode 0: raw tile follows uncompressed
        data.push(TILE_BACKGROUND_SPECIFIED);
        data.extend_from_slice(&[7, 7, 7, 0]);

        let mut stream = RfbInStream::new(Cursor::new(data));
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 16,
            height: 16,
            encoding: ENCODING_ZLIBHEX,
        };
        let mut buffer = ManagedPixelBuffer::new(16, 16, pf.clone());
        let decoder = ZlibHexDecoder::new();
        decoder
            .decode(&mut stream, &rect, &pf, &mut buffer)
            .await
            .unwrap();

        assert_eq!(get_pixel(&buffer, 0, 0), [7, 7, 7, 0]);
    }

    #[tokio::test]
    async fn decodes_compressed_tile_on_stream_zero() {
        let pf = test_pixel_format();

        let mut tile_body = vec![TILE_BACKGROUND_SPECIFIED];
        tile_body.extend_from_slice(&[42, 42, 42, 0]);

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tile_body).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut data = vec![1u8]; // mode 1: zlib stream 0
        data.extend_from_slice(&(compressed.len() as u16).to_be_bytes());
        data.extend_from_slice(&compressed);

        let mut stream = RfbInStream::new(Cursor::new(data));
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 16,
            height: 16,
            encoding: ENCODING_ZLIBHEX,
        };
        let mut buffer = ManagedPixelBuffer::new(16, 16, pf.clone());
        let decoder = ZlibHexDecoder::new();
        decoder
            .decode(&mut stream, &rect, &pf, &mut buffer)
            .await
            .unwrap();

        assert_eq!(get_pixel(&buffer, 0, 0), [42, 42, 42, 0]);
    }
}
