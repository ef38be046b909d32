//! Tight (type 7) - JPEG or filtered zlib, the workhorse encoding in practice.
//!
//! Every rectangle starts with a compression-control byte: the low 4 bits are
//! per-stream zlib reset flags, the high 4 bits pick a mode. `0x08` is FILL
//! (one solid color, 3-byte RGB or native format depending on depth), `0x09`
//! is JPEG (a compact length then that many bytes of JPEG data), and `0x00`
//! through `0x03` select one of four independent zlib streams for BASIC mode.
//!
//! BASIC mode data is optionally filtered: COPY (plain RGB888), PALETTE
//! (index into 2-256 colors, 1 bit/pixel if the palette has exactly two
//! entries, else 1 byte/pixel), or GRADIENT (RGB888 predicted from
//! neighboring pixels, which decodes better than it compresses). Without an
//! explicit filter byte, BASIC mode is implicitly COPY/RGB888. Data under 12
//! bytes travels uncompressed; at or above that it's prefixed with another
//! compact length and run through the rectangle's selected zlib stream,
//! which keeps its dictionary across rectangles until a reset bit clears it.
//!
//! The compact length itself is 1-3 bytes: the top bit of each byte says
//! whether another follows, and the remaining 7 bits of each are packed
//! little-endian (byte0 bits 0-6, then byte1 bits 0-6 shifted by 7, then
//! byte2 shifted by 14).

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_TIGHT};
use anyhow::{anyhow, bail, Context, Result};
use flate2::Decompress;
use rfb_common::Rect;
use std::io::Cursor;
use std::sync::Mutex;
use tokio::io::AsyncRead;

const TIGHT_EXPLICIT_FILTER: u8 = 0x04;
const TIGHT_FILL: u8 = 0x08;
const TIGHT_JPEG: u8 = 0x09;
const TIGHT_MAX_SUBENCODING: u8 = 0x09;

const TIGHT_FILTER_COPY: u8 = 0x00;
const TIGHT_FILTER_PALETTE: u8 = 0x01;
const TIGHT_FILTER_GRADIENT: u8 = 0x02;

const TIGHT_MAX_WIDTH: u16 = 2048;
const TIGHT_MIN_TO_COMPRESS: usize = 12;

/// Decoder for Tight (type 7).
///
/// Holds the four zlib streams across calls since their dictionaries persist
/// between rectangles; `Mutex` gives interior mutability since
/// [`Decoder::decode`] takes `&self`.
pub struct TightDecoder {
    zlib_streams: Mutex<[Option<Decompress>; 4]>,
}

impl Default for TightDecoder {
    fn default() -> Self {
        Self {
            zlib_streams: Mutex::new([None, None, None, None]),
        }
    }
}

impl TightDecoder {
    /// Read a Tight compact length value (1-3 bytes).
    ///
    /// Returns the decoded length as a usize.
    async fn read_compact_length<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> Result<usize> {
        let b0 = stream
            .read_u8()
            .await
            .context("Failed to read compact length byte 0")?;

        if (b0 & 0x80) == 0 {
            return Ok(b0 as usize);
        }

        let b1 = stream
            .read_u8()
            .await
            .context("Failed to read compact length byte 1")?;
        let mut length = ((b0 & 0x7F) as usize) | ((b1 as usize) << 7);

        if (b1 & 0x80) == 0 {
            return Ok(length);
        }

        let b2 = stream
            .read_u8()
            .await
            .context("Failed to read compact length byte 2")?;
        length |= (b2 as usize) << 14;

        Ok(length)
    }

    /// Decompress zlib-compressed data using the specified stream.
    ///
    /// # Arguments
    /// * `stream_id` - Zlib stream ID (0-3)
    /// * `compressed_data` - The compressed bytes
    /// * `expected_size` - Expected decompressed size
    ///
    /// # Returns
    /// Decompressed data as Vec<u8>
    fn decompress_zlib(
        &self,
        stream_id: usize,
        compressed_data: &[u8],
        expected_size: usize,
    ) -> Result<Vec<u8>> {
        let mut streams = self.zlib_streams.lock().unwrap();

        // Initialize stream on first use
        if streams[stream_id].is_none() {
            streams[stream_id] = Some(Decompress::new(true));
        }

        let decompressor = streams[stream_id]
            .as_mut()
            .expect("Zlib stream should be initialized");

        let mut output = vec![0u8; expected_size];
        let before_out = decompressor.total_out();

        decompressor
            .decompress(compressed_data, &mut output, flate2::FlushDecompress::Sync)
            .with_context(|| {
                format!(
                    "Tight: zlib decompression failed for stream {} (in={}, expected_out={})",
                    stream_id,
                    compressed_data.len(),
                    expected_size
                )
            })?;

        let output_size = (decompressor.total_out() - before_out) as usize;
        if output_size != expected_size {
            bail!(
                "Tight: zlib stream {} produced {} bytes but expected {}",
                stream_id,
                output_size,
                expected_size
            );
        }

        output.truncate(output_size);
        Ok(output)
    }

    /// Apply COPY filter: convert RGB888 or native pixels to buffer format.
    fn filter_copy(
        &self,
        data: &[u8],
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        rgb888_mode: bool,
    ) -> Result<()> {
        let width = rect.width as usize;
        let height = rect.height as usize;
        let dest_rect = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);

        if rgb888_mode {
            // Data is RGB888 (3 bytes/pixel) - need to convert to buffer's format
            // For now, use image_rect which handles conversion
            // Create temporary buffer in BGRA format for image_rect
            let bytes_per_pixel = (pixel_format.bits_per_pixel / 8) as usize;
            let expected_size = width * height * 3;
            if data.len() < expected_size {
                bail!(
                    "Tight COPY RGB888: insufficient data ({} < {})",
                    data.len(),
                    expected_size
                );
            }

            // Convert RGB888 to target pixel format
            let mut converted = vec![0u8; width * height * bytes_per_pixel];
            for y in 0..height {
                for x in 0..width {
                    let src_idx = (y * width + x) * 3;
                    let dst_idx = (y * width + x) * bytes_per_pixel;
                    let r = data[src_idx];
                    let g = data[src_idx + 1];
                    let b = data[src_idx + 2];

                    // Pack into pixel format
                    self.pack_rgb_to_pixel(
                        r,
                        g,
                        b,
                        pixel_format,
                        &mut converted[dst_idx..dst_idx + bytes_per_pixel],
                    )?;
                }
            }

            buffer.image_rect(dest_rect, &converted, width)?;
        } else {
            // Data is in native pixel format - direct copy
            buffer.image_rect(dest_rect, data, width)?;
        }

        Ok(())
    }

    /// Apply PALETTE filter: expand palette indices to pixels.
    async fn filter_palette<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
        data: &[u8],
    ) -> Result<()> {
        // Read palette size (1 byte: count - 1)
        let pal_size_minus_one = stream
            .read_u8()
            .await
            .context("Failed to read Tight palette size")?;
        let palette_size = (pal_size_minus_one as usize) + 1;

        if !(2..=256).contains(&palette_size) {
            bail!(
                "Tight PALETTE: invalid palette size {} (must be 2-256)",
                palette_size
            );
        }

        // Read palette colors as RGB888 (3 bytes each)
        let mut palette_rgb = vec![0u8; palette_size * 3];
        stream
            .read_bytes(&mut palette_rgb)
            .await
            .context("Failed to read Tight palette RGB data")?;

        // Convert palette to pixel format
        let bytes_per_pixel = (pixel_format.bits_per_pixel / 8) as usize;
        let mut palette_pixels = vec![0u8; palette_size * bytes_per_pixel];
        for i in 0..palette_size {
            let r = palette_rgb[i * 3];
            let g = palette_rgb[i * 3 + 1];
            let b = palette_rgb[i * 3 + 2];
            self.pack_rgb_to_pixel(
                r,
                g,
                b,
                pixel_format,
                &mut palette_pixels[i * bytes_per_pixel..(i + 1) * bytes_per_pixel],
            )?;
        }

        let width = rect.width as usize;
        let height = rect.height as usize;

        // Decode indices and expand to pixels
        let mut pixels = vec![0u8; width * height * bytes_per_pixel];

        if palette_size == 2 {
            // 1-bit indices (packed 8 per byte, MSB first)
            let mut data_idx = 0;
            for y in 0..height {
                let mut x = 0;
                while x < width {
                    if data_idx >= data.len() {
                        bail!("Tight PALETTE 2-color: unexpected end of index data");
                    }
                    let bits = data[data_idx];
                    data_idx += 1;

                    for bit in (0..8).rev() {
                        if x >= width {
                            break;
                        }
                        let pal_idx = ((bits >> bit) & 1) as usize;
                        let pixel_start = (y * width + x) * bytes_per_pixel;
                        pixels[pixel_start..pixel_start + bytes_per_pixel].copy_from_slice(
                            &palette_pixels
                                [pal_idx * bytes_per_pixel..(pal_idx + 1) * bytes_per_pixel],
                        );
                        x += 1;
                    }
                }
            }
        } else {
            // 8-bit indices (1 byte per pixel)
            for y in 0..height {
                for x in 0..width {
                    let data_idx = y * width + x;
                    if data_idx >= data.len() {
                        bail!("Tight PALETTE: unexpected end of index data");
                    }
                    let pal_idx = data[data_idx] as usize;
                    if pal_idx >= palette_size {
                        bail!(
                            "Tight PALETTE: index {} out of range (palette size {})",
                            pal_idx,
                            palette_size
                        );
                    }
                    let pixel_start = (y * width + x) * bytes_per_pixel;
                    pixels[pixel_start..pixel_start + bytes_per_pixel].copy_from_slice(
                        &palette_pixels[pal_idx * bytes_per_pixel..(pal_idx + 1) * bytes_per_pixel],
                    );
                }
            }
        }

        // Write to buffer
        let dest_rect = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
        buffer.image_rect(dest_rect, &pixels, width)?;

        Ok(())
    }

    /// Apply GRADIENT filter: reconstruct RGB888 using gradient prediction.
    fn filter_gradient(
        &self,
        data: &[u8],
        rect: &Rectangle,
        pixel_format: &PixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> Result<()> {
        // Gradient filter requires truecolor (16 or 32 bpp)
        if pixel_format.bits_per_pixel == 8 {
            bail!("Tight gradient filter requires truecolor (16/32 bpp), got 8 bpp");
        }

        let width = rect.width as usize;
        let height = rect.height as usize;
        let expected_size = width * height * 3;

        if data.len() < expected_size {
            bail!(
                "Tight GRADIENT: insufficient data ({} < {})",
                data.len(),
                expected_size
            );
        }

        // Gradient prediction: reconstruct RGB888 from deltas
        let mut prev_row = vec![0u8; width * 3];
        let mut curr_row = vec![0u8; width * 3];

        let bytes_per_pixel = (pixel_format.bits_per_pixel / 8) as usize;
        let mut pixels = vec![0u8; width * height * bytes_per_pixel];

        for y in 0..height {
            for x in 0..width {
                let src_idx = (y * width + x) * 3;

                for c in 0..3 {
                    let left = if x > 0 { curr_row[(x - 1) * 3 + c] } else { 0 };
                    let top = prev_row[x * 3 + c];
                    let top_left = if x > 0 { prev_row[(x - 1) * 3 + c] } else { 0 };

                    let predicted = left.wrapping_add(top).wrapping_sub(top_left);
                    let decoded = predicted.wrapping_add(data[src_idx + c]);
                    curr_row[x * 3 + c] = decoded;
                }

                // Convert reconstructed RGB to pixel format
                let r = curr_row[x * 3];
                let g = curr_row[x * 3 + 1];
                let b = curr_row[x * 3 + 2];
                let pixel_start = (y * width + x) * bytes_per_pixel;
                self.pack_rgb_to_pixel(
                    r,
                    g,
                    b,
                    pixel_format,
                    &mut pixels[pixel_start..pixel_start + bytes_per_pixel],
                )?;
            }

            // Swap rows for next iteration
            std::mem::swap(&mut prev_row, &mut curr_row);
        }

        // Write to buffer
        let dest_rect = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
        buffer.image_rect(dest_rect, &pixels, width)?;

        Ok(())
    }

    /// Pack RGB888 values into the target pixel format.
    fn pack_rgb_to_pixel(
        &self,
        r: u8,
        g: u8,
        b: u8,
        pf: &PixelFormat,
        out: &mut [u8],
    ) -> Result<()> {
        let bytes_per_pixel = (pf.bits_per_pixel / 8) as usize;
        if out.len() < bytes_per_pixel {
            bail!("Output buffer too small for pixel");
        }

        // Scale RGB values to fit format bit depths
        let r_val = (r as u32) * (pf.red_max as u32) / 255;
        let g_val = (g as u32) * (pf.green_max as u32) / 255;
        let b_val = (b as u32) * (pf.blue_max as u32) / 255;

        // Pack into pixel value
        let pixel = (r_val << pf.red_shift) | (g_val << pf.green_shift) | (b_val << pf.blue_shift);

        // Write to output in correct endianness
        match bytes_per_pixel {
            1 => out[0] = pixel as u8,
            2 => {
                if pf.big_endian != 0 {
                    out[0..2].copy_from_slice(&(pixel as u16).to_be_bytes());
                } else {
                    out[0..2].copy_from_slice(&(pixel as u16).to_le_bytes());
                }
            }
            4 => {
                if pf.big_endian != 0 {
                    out[0..4].copy_from_slice(&pixel.to_be_bytes());
                } else {
                    out[0..4].copy_from_slice(&pixel.to_le_bytes());
                }
            }
            _ => bail!("Unsupported bytes_per_pixel: {}", bytes_per_pixel),
        }

        Ok(())
    }
}

impl Decoder for TightDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_TIGHT
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

        tracing::trace!(x = rect.x, y = rect.y, width = rect.width, height = rect.height, "Tight rectangle");

        if rect.width > TIGHT_MAX_WIDTH {
            bail!(
                "Tight: rectangle too wide ({} > {} max)",
                rect.width,
                TIGHT_MAX_WIDTH
            );
        }

        let comp_ctl = stream.read_u8().await.with_context(|| {
            format!(
                "Failed to read Tight compression control at ({}, {})",
                rect.x, rect.y
            )
        })?;

        {
            let mut streams = self.zlib_streams.lock().unwrap();
            for (i, slot) in streams.iter_mut().enumerate() {
                if (comp_ctl & (1 << i)) != 0 {
                    *slot = None;
                }
            }
        }

        let comp_type = comp_ctl >> 4;

        if comp_type == TIGHT_FILL {
            let bytes_per_pixel = (pixel_format.bits_per_pixel / 8) as usize;
            let mut pixel_data = vec![0u8; bytes_per_pixel];

            if pixel_format.depth >= 24 && pixel_format.true_color != 0 {
                let mut rgb = [0u8; 3];
                stream
                    .read_bytes(&mut rgb)
                    .await
                    .context("Failed to read Tight FILL RGB data")?;
                self.pack_rgb_to_pixel(rgb[0], rgb[1], rgb[2], pixel_format, &mut pixel_data)?;
            } else {
                stream
                    .read_bytes(&mut pixel_data)
                    .await
                    .context("Failed to read Tight FILL pixel data")?;
            }

            let fill_rect = Rect::new(
                rect.x as i32,
                rect.y as i32,
                rect.width as u32,
                rect.height as u32,
            );
            buffer
                .fill_rect(fill_rect, &pixel_data)
                .context("Failed to fill Tight FILL rectangle")?;
            return Ok(());
        }

        if comp_type == TIGHT_JPEG {
            let jpeg_len = Self::read_compact_length(stream).await?;
            let mut jpeg_data = vec![0u8; jpeg_len];
            stream
                .read_bytes(&mut jpeg_data)
                .await
                .with_context(|| format!("Failed to read {} bytes of Tight JPEG data", jpeg_len))?;

            let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(&jpeg_data));
            let pixels = decoder
                .decode()
                .context("Failed to decode Tight JPEG data")?;
            let metadata = decoder
                .info()
                .ok_or_else(|| anyhow!("JPEG decoder missing metadata"))?;

            // Some servers pad or round the encoded JPEG past the rectangle's
            // declared size; tolerate a JPEG that is larger in either
            // dimension by cropping to rect.width x rect.height from its
            // top-left. A JPEG smaller than the rectangle can't be cropped
            // to fill the claimed area without fabricating pixels, so that
            // is a protocol violation rather than something to paper over.
            if metadata.width < rect.width || metadata.height < rect.height {
                return Err(anyhow::Error::new(crate::ProtocolViolation(format!(
                    "Tight JPEG: decoded {}x{} is smaller than the claimed rectangle {}x{}",
                    metadata.width, metadata.height, rect.width, rect.height
                ))));
            }

            // Convert RGB to pixel format, cropping to the rectangle's extent
            // using the JPEG's own width as the source row stride.
            let src_width = metadata.width as usize;
            let width = rect.width as usize;
            let height = rect.height as usize;
            let bytes_per_pixel = (pixel_format.bits_per_pixel / 8) as usize;
            let mut converted = vec![0u8; width * height * bytes_per_pixel];

            for y in 0..height {
                for x in 0..width {
                    let src_idx = (y * src_width + x) * 3;
                    let dst_idx = (y * width + x) * bytes_per_pixel;
                    let r = pixels[src_idx];
                    let g = pixels[src_idx + 1];
                    let b = pixels[src_idx + 2];
                    self.pack_rgb_to_pixel(
                        r,
                        g,
                        b,
                        pixel_format,
                        &mut converted[dst_idx..dst_idx + bytes_per_pixel],
                    )?;
                }
            }

            let dest_rect = Rect::new(rect.x as i32, rect.y as i32, width as u32, height as u32);
            buffer.image_rect(dest_rect, &converted, width)?;
            return Ok(());
        }

        if comp_type > TIGHT_MAX_SUBENCODING {
            bail!(
                "Tight: invalid compression type {} (max {})",
                comp_type,
                TIGHT_MAX_SUBENCODING
            );
        }

        let stream_id = (comp_ctl >> 4) & 0x03;
        let explicit_filter = (comp_ctl & 0x40) != 0;

        let width = rect.width as usize;
        let height = rect.height as usize;
        let bytes_per_pixel = (pixel_format.bits_per_pixel / 8) as usize;

        // Without an explicit filter byte, BASIC mode always carries RGB888
        // regardless of the negotiated pixel format.
        let rgb888_implicit = !explicit_filter;
        let (filter_type, data_size, use_palette) = if explicit_filter {
            let filter_id = stream
                .read_u8()
                .await
                .context("Failed to read Tight filter ID")?;

            match filter_id {
                TIGHT_FILTER_COPY => (filter_id, width * height * 3, false),
                TIGHT_FILTER_PALETTE => (filter_id, 0, true),
                TIGHT_FILTER_GRADIENT => (filter_id, width * height * 3, false),
                _ => bail!("Tight: invalid filter type {}", filter_id),
            }
        } else {
            (TIGHT_FILTER_COPY, width * height * 3, false)
        };

        if use_palette {
            // Palette data size depends on the palette size, which we don't
            // know until we read it, so peek it before reading the index data.
            let pal_size_byte = stream
                .read_u8()
                .await
                .context("Failed to read palette size for data calculation")?;
            let palette_size = (pal_size_byte as usize) + 1;

            // Calculate index data size
            let index_data_size = if palette_size == 2 {
                height * width.div_ceil(8) // 1 bit per pixel, packed
            } else {
                width * height // 1 byte per pixel
            };

            // Account for palette RGB data
            let palette_rgb_size = palette_size * 3;
            let total_data_size = index_data_size;

            // Read or decompress data
            let data = if total_data_size < TIGHT_MIN_TO_COMPRESS {
                let mut d = vec![0u8; total_data_size];
                stream
                    .read_bytes(&mut d)
                    .await
                    .context("Failed to read uncompressed Tight palette index data")?;
                d
            } else {
                let compressed_len = Self::read_compact_length(stream).await?;
                let mut compressed = vec![0u8; compressed_len];
                stream
                    .read_bytes(&mut compressed)
                    .await
                    .context("Failed to read compressed Tight palette index data")?;
                self.decompress_zlib(stream_id as usize, &compressed, total_data_size)?
            };

            // Create a temporary stream with palette size byte + RGB data + index data
            let mut temp_data = vec![pal_size_byte];
            // We need to read the palette RGB data too
            let mut palette_rgb = vec![0u8; palette_rgb_size];
            stream
                .read_bytes(&mut palette_rgb)
                .await
                .context("Failed to read palette RGB")?;
            temp_data.extend_from_slice(&palette_rgb);

            let cursor = Cursor::new(temp_data);
            let mut temp_stream = RfbInStream::new(cursor);

            return self
                .filter_palette(&mut temp_stream, rect, pixel_format, buffer, &data)
                .await;
        }

        let data = if data_size < TIGHT_MIN_TO_COMPRESS {
            let mut d = vec![0u8; data_size];
            stream.read_bytes(&mut d).await.with_context(|| {
                format!(
                    "Failed to read {} bytes of uncompressed Tight data",
                    data_size
                )
            })?;
            d
        } else {
            let compressed_len = Self::read_compact_length(stream).await?;
            let mut compressed = vec![0u8; compressed_len];
            stream.read_bytes(&mut compressed).await.with_context(|| {
                format!(
                    "Failed to read {} bytes of compressed Tight data",
                    compressed_len
                )
            })?;
            self.decompress_zlib(stream_id as usize, &compressed, data_size)?
        };

        match filter_type {
            TIGHT_FILTER_COPY => {
                let rgb888_mode = explicit_filter || rgb888_implicit;
                self.filter_copy(&data, rect, pixel_format, buffer, rgb888_mode)?;
            }
            TIGHT_FILTER_GRADIENT => {
                self.filter_gradient(&data, rect, pixel_format, buffer)?;
            }
            _ => bail!("Unexpected filter type {} in non-palette path", filter_type),
        }

        Ok(())
    }
}
