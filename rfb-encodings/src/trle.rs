//! TRLE encoding decoder - tiled run-length encoding over uncompressed pixel data.
//!
//! TRLE (type 15) iterates 16x16 tiles left-to-right, top-to-bottom. Each tile starts
//! with a subencoding byte that selects one of six layouts:
//!
//! - `0`: raw pixels, one CPixel per pixel in row-major order
//! - `1`: solid tile, a single CPixel fills the whole tile
//! - `2..=16`: packed palette of `subencoding` CPixels followed by indices packed at
//!   1/2/4 bits per pixel depending on palette size
//! - `127`: packed palette indices reusing the palette from the most recent
//!   palette-bearing tile in this rectangle (no palette is re-sent)
//! - `128`: plain RLE, a CPixel followed by a run length, repeated until the tile is full
//! - `129`: palette RLE reusing the previous palette (no palette is re-sent)
//! - `130..=255`: palette RLE with a fresh palette of `subencoding - 128` CPixels
//!
//! Run lengths are encoded as zero or more `255` continuation bytes followed by a
//! final byte; `run_length = 1 + sum(bytes)`. 32-bit pixel formats whose colour
//! channels fit in three bytes are carried as a compact 3-byte CPixel instead of the
//! full 4-byte pixel, the same optimisation ZRLE uses.
//!
//! Unlike ZRLE, TRLE tiles are not wrapped in a zlib stream, so this decoder reads
//! directly off the rectangle's byte stream rather than from a pre-inflated buffer.
//! The "reuse palette" subencodings (127, 129) make the most recently read palette
//! part of the decode state for the current rectangle; that state does not survive
//! past the rectangle's last tile.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_TRLE};
use anyhow::{anyhow, bail, Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

const TILE_SIZE: u16 = 16;

/// Decoder for TRLE (Tiled Run-Length Encoding).
pub struct TRLEDecoder;

impl Decoder for TRLEDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_TRLE
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

        let cpixel_mode = CPixelMode::detect(pixel_format, bytes_per_pixel);

        // Palette reuse (subencodings 127/129) only spans tiles within this rectangle.
        let mut reused_palette: Vec<CPixel> = Vec::new();

        let mut ty = 0u16;
        while ty < rect.height {
            let tile_h = std::cmp::min(TILE_SIZE, rect.height - ty);

            let mut tx = 0u16;
            while tx < rect.width {
                let tile_w = std::cmp::min(TILE_SIZE, rect.width - tx);

                let abs_x = rect
                    .x
                    .checked_add(tx)
                    .ok_or_else(|| anyhow!("TRLE tile absolute x overflows"))?;
                let abs_y = rect
                    .y
                    .checked_add(ty)
                    .ok_or_else(|| anyhow!("TRLE tile absolute y overflows"))?;

                self.decode_tile(
                    stream,
                    (abs_x, abs_y),
                    (tile_w, tile_h),
                    pixel_format,
                    buffer,
                    bytes_per_pixel,
                    &cpixel_mode,
                    &mut reused_palette,
                )
                .await
                .with_context(|| {
                    format!("TRLE: failed to decode tile at ({tx}, {ty}) size {tile_w}x{tile_h}")
                })?;

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        Ok(())
    }
}

impl TRLEDecoder {
    #[allow(clippy::too_many_arguments)]
    async fn decode_tile<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        tile_pos: (u16, u16),
        tile_size: (u16, u16),
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        bytes_per_pixel: u8,
        cpixel_mode: &CPixelMode,
        reused_palette: &mut Vec<CPixel>,
    ) -> Result<()> {
        let subencoding = stream
            .read_u8()
            .await
            .context("Failed to read TRLE subencoding byte")?;

        let tile_area = (tile_size.0 as usize)
            .checked_mul(tile_size.1 as usize)
            .ok_or_else(|| anyhow!("TRLE tile area overflow"))?;

        match subencoding {
            0 => {
                let pixels = read_raw_pixels(stream, tile_area, bytes_per_pixel, cpixel_mode)
                    .await
                    .context("TRLE: raw tile")?;
                write_pixels_to_buffer(&pixels, tile_pos, tile_size, buffer, bytes_per_pixel)
            }
            1 => {
                let pixel = read_cpixel(stream, bytes_per_pixel, cpixel_mode)
                    .await
                    .context("TRLE: solid tile")?;
                let pixel_bytes = pixel_to_buffer_bytes(&pixel, bytes_per_pixel);
                let tile_rect = Rect::new(
                    tile_pos.0 as i32,
                    tile_pos.1 as i32,
                    tile_size.0 as u32,
                    tile_size.1 as u32,
                );
                buffer
                    .fill_rect(tile_rect, &pixel_bytes)
                    .context("TRLE: failed to fill solid tile")
            }
            2..=16 => {
                let pal_size = subencoding as usize;
                let palette = read_palette(stream, pal_size, bytes_per_pixel, cpixel_mode)
                    .await
                    .context("TRLE: packed palette tile")?;
                let pixels =
                    read_packed_indices(stream, &palette, tile_size, pal_size).await?;
                *reused_palette = palette;
                write_pixels_to_buffer(&pixels, tile_pos, tile_size, buffer, bytes_per_pixel)
            }
            127 => {
                if reused_palette.is_empty() {
                    bail!("TRLE: subencoding 127 reuses a palette but none was established yet");
                }
                let pal_size = reused_palette.len();
                let pixels =
                    read_packed_indices(stream, reused_palette, tile_size, pal_size).await?;
                write_pixels_to_buffer(&pixels, tile_pos, tile_size, buffer, bytes_per_pixel)
            }
            128 => {
                let pixels =
                    read_plain_rle_pixels(stream, tile_area, bytes_per_pixel, cpixel_mode)
                        .await
                        .context("TRLE: plain RLE tile")?;
                write_pixels_to_buffer(&pixels, tile_pos, tile_size, buffer, bytes_per_pixel)
            }
            129 => {
                if reused_palette.is_empty() {
                    bail!("TRLE: subencoding 129 reuses a palette but none was established yet");
                }
                let pixels =
                    read_palette_rle_pixels(stream, reused_palette, tile_area).await?;
                write_pixels_to_buffer(&pixels, tile_pos, tile_size, buffer, bytes_per_pixel)
            }
            130..=255 => {
                let pal_size = (subencoding - 128) as usize;
                let palette = read_palette(stream, pal_size, bytes_per_pixel, cpixel_mode)
                    .await
                    .context("TRLE: palette RLE tile")?;
                let pixels = read_palette_rle_pixels(stream, &palette, tile_area).await?;
                *reused_palette = palette;
                write_pixels_to_buffer(&pixels, tile_pos, tile_size, buffer, bytes_per_pixel)
            }
            17..=126 => {
                bail!("TRLE: invalid subencoding {subencoding}")
            }
        }
    }
}

/// CPixel optimisation mode for 24-bit-clean pixels carried in a 32bpp format.
#[derive(Debug, Clone, Copy)]
enum CPixelMode {
    None,
    LowC,
    HighC,
}

impl CPixelMode {
    fn detect(pf: &PixelFormat, bpp: u8) -> Self {
        if bpp != 4 || pf.depth > 24 {
            return Self::None;
        }

        let r = ((0xFFFFu32 * pf.red_max as u32) / 0xFFFF) << pf.red_shift;
        let g = ((0xFFFFu32 * pf.green_max as u32) / 0xFFFF) << pf.green_shift;
        let b = ((0xFFFFu32 * pf.blue_max as u32) / 0xFFFF) << pf.blue_shift;
        let max_pixel = r | g | b;

        let fits_low_3 = max_pixel < (1 << 24);
        let fits_high_3 = (max_pixel & 0xFF) == 0;

        if fits_low_3 && pf.big_endian == 0 {
            Self::LowC
        } else if fits_high_3 && pf.big_endian != 0 {
            Self::HighC
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone)]
struct CPixel {
    bytes: [u8; 4],
}

async fn read_cpixel<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    bytes_per_pixel: u8,
    mode: &CPixelMode,
) -> Result<CPixel> {
    match mode {
        CPixelMode::LowC => {
            let mut data = [0u8; 3];
            stream.read_bytes(&mut data).await?;
            Ok(CPixel {
                bytes: [data[0], data[1], data[2], 0],
            })
        }
        CPixelMode::HighC => {
            let mut data = [0u8; 3];
            stream.read_bytes(&mut data).await?;
            Ok(CPixel {
                bytes: [0, data[0], data[1], data[2]],
            })
        }
        CPixelMode::None => {
            let mut bytes = [0u8; 4];
            stream
                .read_bytes(&mut bytes[..bytes_per_pixel as usize])
                .await?;
            Ok(CPixel { bytes })
        }
    }
}

async fn read_palette<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    pal_size: usize,
    bytes_per_pixel: u8,
    mode: &CPixelMode,
) -> Result<Vec<CPixel>> {
    let mut palette = Vec::with_capacity(pal_size);
    for i in 0..pal_size {
        palette.push(
            read_cpixel(stream, bytes_per_pixel, mode)
                .await
                .with_context(|| format!("Failed to read palette entry {i}"))?,
        );
    }
    Ok(palette)
}

async fn read_rle_length<R: AsyncRead + Unpin>(stream: &mut RfbInStream<R>) -> Result<usize> {
    let mut length = 1usize;
    loop {
        let byte = stream
            .read_u8()
            .await
            .context("Failed to read TRLE run-length byte")?;
        length = length
            .checked_add(byte as usize)
            .ok_or_else(|| anyhow!("TRLE run length overflow"))?;
        if byte != 255 {
            break;
        }
    }
    Ok(length)
}

fn packed_bpp(pal_size: usize) -> usize {
    if pal_size <= 2 {
        1
    } else if pal_size <= 4 {
        2
    } else {
        4
    }
}

async fn read_raw_pixels<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    tile_area: usize,
    bytes_per_pixel: u8,
    mode: &CPixelMode,
) -> Result<Vec<CPixel>> {
    let mut pixels = Vec::with_capacity(tile_area);
    for _ in 0..tile_area {
        pixels.push(read_cpixel(stream, bytes_per_pixel, mode).await?);
    }
    Ok(pixels)
}

async fn read_plain_rle_pixels<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    tile_area: usize,
    bytes_per_pixel: u8,
    mode: &CPixelMode,
) -> Result<Vec<CPixel>> {
    let mut pixels = Vec::with_capacity(tile_area);
    let mut count = 0;

    while count < tile_area {
        let pixel = read_cpixel(stream, bytes_per_pixel, mode).await?;
        let run_len = read_rle_length(stream).await?;

        if count + run_len > tile_area {
            bail!(
                "TRLE RLE run length {} exceeds remaining pixels {} (tile area {})",
                run_len,
                tile_area - count,
                tile_area
            );
        }

        for _ in 0..run_len {
            pixels.push(pixel.clone());
        }
        count += run_len;
    }

    Ok(pixels)
}

async fn read_packed_indices<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    palette: &[CPixel],
    tile_size: (u16, u16),
    pal_size: usize,
) -> Result<Vec<CPixel>> {
    let (tile_w, tile_h) = tile_size;
    let bpp = packed_bpp(pal_size);
    let tile_area = (tile_w as usize)
        .checked_mul(tile_h as usize)
        .ok_or_else(|| anyhow!("TRLE tile area overflow"))?;
    let mut pixels = Vec::with_capacity(tile_area);

    for _ in 0..tile_h {
        let row_bits = (tile_w as usize)
            .checked_mul(bpp)
            .ok_or_else(|| anyhow!("TRLE packed row bits overflow"))?;
        let row_bytes = row_bits.div_ceil(8);
        let mut packed = vec![0u8; row_bytes];
        stream
            .read_bytes(&mut packed)
            .await
            .context("Failed to read TRLE packed palette row")?;

        let mut bit_offset = 0;
        for _ in 0..tile_w {
            let byte_idx = bit_offset / 8;
            let bit_idx = 7 - (bit_offset % 8);
            let mask = ((1 << bpp) - 1) << (bit_idx - (bpp - 1));
            let index = ((packed[byte_idx] & mask) >> (bit_idx - (bpp - 1))) as usize;

            if index >= palette.len() {
                bail!(
                    "TRLE packed palette index {} out of range (palette size {})",
                    index,
                    palette.len()
                );
            }

            pixels.push(palette[index].clone());
            bit_offset += bpp;
        }
    }

    Ok(pixels)
}

async fn read_palette_rle_pixels<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    palette: &[CPixel],
    tile_area: usize,
) -> Result<Vec<CPixel>> {
    let mut pixels = Vec::with_capacity(tile_area);
    let mut count = 0;

    while count < tile_area {
        let code = stream
            .read_u8()
            .await
            .context("Failed to read TRLE palette RLE code")?;

        let (index, run_len) = if (code & 0x80) == 0 {
            (code as usize, 1)
        } else {
            let index = (code & 0x7F) as usize;
            let run_len = read_rle_length(stream).await?;
            (index, run_len)
        };

        if index >= palette.len() {
            bail!(
                "TRLE palette RLE index {} out of range (palette size {})",
                index,
                palette.len()
            );
        }
        if count + run_len > tile_area {
            bail!(
                "TRLE RLE run length {} exceeds remaining pixels {} (tile area {})",
                run_len,
                tile_area - count,
                tile_area
            );
        }

        for _ in 0..run_len {
            pixels.push(palette[index].clone());
        }
        count += run_len;
    }

    Ok(pixels)
}

fn pixel_to_buffer_bytes(pixel: &CPixel, bytes_per_pixel: u8) -> Vec<u8> {
    pixel.bytes[..bytes_per_pixel as usize].to_vec()
}

fn write_pixels_to_buffer(
    pixels: &[CPixel],
    tile_pos: (u16, u16),
    tile_size: (u16, u16),
    buffer: &mut dyn MutablePixelBuffer,
    bytes_per_pixel: u8,
) -> Result<()> {
    let (tile_x, tile_y) = tile_pos;
    let (tile_w, tile_h) = tile_size;

    let mut pixel_data = Vec::with_capacity(pixels.len() * bytes_per_pixel as usize);
    for pixel in pixels {
        pixel_data.extend_from_slice(&pixel.bytes[..bytes_per_pixel as usize]);
    }

    let tile_rect = Rect::new(tile_x as i32, tile_y as i32, tile_w as u32, tile_h as u32);
    buffer
        .image_rect(tile_rect, &pixel_data, tile_w as usize)
        .context("TRLE: failed to write tile pixels")
}
