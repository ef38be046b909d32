//! Hextile (type 5) - per-tile choice of raw/background/foreground/subrects.
//!
//! The rectangle is walked in 16x16 tiles (edge tiles shrink to fit), each
//! led by a flags byte: RAW means the tile body is just raw pixels and every
//! other flag is ignored; otherwise BACKGROUND_SPECIFIED/FOREGROUND_SPECIFIED
//! gate an optional new color, and ANY_SUBRECTS gates a count of solid-color
//! rectangles packed into single bytes (`xy` nibble pair, `wh` nibble pair
//! biased by one so 0 means size 1). SUBRECTS_COLOURED switches each subrect
//! between carrying its own color and reusing the tile's foreground.
//!
//! Background and foreground aren't re-sent every tile - once set, they
//! persist across tiles for the rest of the rectangle, which is why a tile
//! with none of the color flags set is still valid as long as an earlier
//! tile in the same rectangle supplied one.

use crate::{Decoder, MutablePixelBuffer, PixelFormat, Rectangle, RfbInStream, ENCODING_HEXTILE};
use anyhow::{anyhow, Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

const TILE_RAW: u8 = 1 << 0;
const TILE_BACKGROUND_SPECIFIED: u8 = 1 << 1;
const TILE_FOREGROUND_SPECIFIED: u8 = 1 << 2;
const TILE_ANY_SUBRECTS: u8 = 1 << 3;
const TILE_SUBRECTS_COLOURED: u8 = 1 << 4;

/// Tile edge length; tiles at the rectangle's right/bottom edge are smaller.
const TILE_SIZE: u16 = 16;

/// Decoder for Hextile (type 5).
pub struct HextileDecoder;

impl Decoder for HextileDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_HEXTILE
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

        tracing::trace!(x = rect.x, y = rect.y, width = rect.width, height = rect.height, "Hextile rectangle");

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

                let tile_type = stream.read_u8().await.with_context(|| {
                    format!(
                        "Failed to read Hextile tile type at tile ({}, {}) in rect at ({}, {})",
                        tx, ty, rect.x, rect.y
                    )
                })?;

                if (tile_type & TILE_RAW) != 0 {
                    let abs_x = rect
                        .x
                        .checked_add(tx)
                        .ok_or_else(|| anyhow!("Hextile RAW tile absolute x overflows"))?;
                    let abs_y = rect
                        .y
                        .checked_add(ty)
                        .ok_or_else(|| anyhow!("Hextile RAW tile absolute y overflows"))?;
                    decode_raw_tile(
                        stream,
                        buffer,
                        (abs_x, abs_y),
                        (tile_w, tile_h),
                        bytes_per_pixel,
                        (tx, ty),
                    )
                    .await?;
                    tx += TILE_SIZE;
                    continue;
                }

                if (tile_type & TILE_BACKGROUND_SPECIFIED) != 0 {
                    let mut bg = vec![0u8; bytes_per_pixel as usize];
                    stream.read_bytes(&mut bg).await.with_context(|| {
                        format!(
                            "Failed to read Hextile background at tile ({}, {}) in rect at ({}, {})",
                            tx, ty, rect.x, rect.y
                        )
                    })?;
                    background = Some(bg);
                }

                let bg = background.as_ref().ok_or_else(|| {
                    anyhow!(
                        "Hextile tile at ({}, {}) in rect at ({}, {}) requires background but none was specified",
                        tx, ty, rect.x, rect.y
                    )
                })?;

                let abs_x = rect
                    .x
                    .checked_add(tx)
                    .ok_or_else(|| anyhow!("Hextile tile absolute x overflows"))?;
                let abs_y = rect
                    .y
                    .checked_add(ty)
                    .ok_or_else(|| anyhow!("Hextile tile absolute y overflows"))?;
                let tile_rect = Rect::new(abs_x as i32, abs_y as i32, tile_w as u32, tile_h as u32);
                buffer.fill_rect(tile_rect, bg).with_context(|| {
                    format!(
                        "Failed to fill Hextile background at tile ({}, {}) in rect at ({}, {})",
                        tx, ty, rect.x, rect.y
                    )
                })?;

                if (tile_type & TILE_FOREGROUND_SPECIFIED) != 0 {
                    let mut fg = vec![0u8; bytes_per_pixel as usize];
                    stream.read_bytes(&mut fg).await.with_context(|| {
                        format!(
                            "Failed to read Hextile foreground at tile ({}, {}) in rect at ({}, {})",
                            tx, ty, rect.x, rect.y
                        )
                    })?;
                    foreground = Some(fg);
                }

                if (tile_type & TILE_ANY_SUBRECTS) != 0 {
                    let num_subrects = stream.read_u8().await.with_context(|| {
                        format!(
                            "Failed to read Hextile subrect count at tile ({}, {}) in rect at ({}, {})",
                            tx, ty, rect.x, rect.y
                        )
                    })?;

                    let subrects_coloured = (tile_type & TILE_SUBRECTS_COLOURED) != 0;

                    if num_subrects > 0 && !subrects_coloured && foreground.is_none() {
                        return Err(anyhow!(
                            "Hextile tile at ({}, {}) in rect at ({}, {}) has monochrome subrects but no foreground color",
                            tx, ty, rect.x, rect.y
                        ));
                    }

                    for i in 0..num_subrects {
                        let color = if subrects_coloured {
                            let mut col = vec![0u8; bytes_per_pixel as usize];
                            stream.read_bytes(&mut col).await.with_context(|| {
                                format!(
                                    "Failed to read color for Hextile subrect {} at tile ({}, {}) in rect at ({}, {})",
                                    i, tx, ty, rect.x, rect.y
                                )
                            })?;
                            col
                        } else {
                            foreground.as_ref().unwrap().clone()
                        };

                        let xy = stream.read_u8().await.with_context(|| {
                            format!(
                                "Failed to read XY for Hextile subrect {} at tile ({}, {}) in rect at ({}, {})",
                                i, tx, ty, rect.x, rect.y
                            )
                        })?;
                        let x_off = (xy >> 4) & 0x0F;
                        let y_off = xy & 0x0F;

                        let wh = stream.read_u8().await.with_context(|| {
                            format!(
                                "Failed to read WH for Hextile subrect {} at tile ({}, {}) in rect at ({}, {})",
                                i, tx, ty, rect.x, rect.y
                            )
                        })?;
                        let w = ((wh >> 4) & 0x0F) + 1;
                        let h = (wh & 0x0F) + 1;

                        let right = x_off.checked_add(w).ok_or_else(|| {
                            anyhow!(
                                "Hextile subrect {} x+width overflows: {} + {} at tile ({}, {})",
                                i,
                                x_off,
                                w,
                                tx,
                                ty
                            )
                        })?;
                        let bottom = y_off.checked_add(h).ok_or_else(|| {
                            anyhow!(
                                "Hextile subrect {} y+height overflows: {} + {} at tile ({}, {})",
                                i,
                                y_off,
                                h,
                                tx,
                                ty
                            )
                        })?;

                        if right as u16 > tile_w {
                            return Err(anyhow!(
                                "Hextile subrect {} extends beyond tile width: x={}, w={}, tile_w={} at tile ({}, {})",
                                i, x_off, w, tile_w, tx, ty
                            ));
                        }
                        if bottom as u16 > tile_h {
                            return Err(anyhow!(
                                "Hextile subrect {} extends beyond tile height: y={}, h={}, tile_h={} at tile ({}, {})",
                                i, y_off, h, tile_h, tx, ty
                            ));
                        }

                        let sr_abs_x = abs_x
                            .checked_add(x_off as u16)
                            .ok_or_else(|| anyhow!("Hextile subrect absolute x overflows"))?;
                        let sr_abs_y = abs_y
                            .checked_add(y_off as u16)
                            .ok_or_else(|| anyhow!("Hextile subrect absolute y overflows"))?;
                        let subrect =
                            Rect::new(sr_abs_x as i32, sr_abs_y as i32, w as u32, h as u32);
                        buffer.fill_rect(subrect, &color).with_context(|| {
                            format!(
                                "Failed to fill Hextile subrect {} at ({}, {}) size {}x{} in tile ({}, {})",
                                i, x_off, y_off, w, h, tx, ty
                            )
                        })?;
                    }
                }

                tx += TILE_SIZE;
            }
            ty += TILE_SIZE;
        }

        Ok(())
    }
}

/// Decodes a RAW-flagged tile: the body is just `tile_w * tile_h` raw pixels.
async fn decode_raw_tile<R: AsyncRead + Unpin>(
    stream: &mut RfbInStream<R>,
    buffer: &mut dyn MutablePixelBuffer,
    abs_pos: (u16, u16),
    tile_size: (u16, u16),
    bytes_per_pixel: u8,
    tile_offset: (u16, u16),
) -> Result<()> {
    let (abs_x, abs_y) = abs_pos;
    let (tile_w, tile_h) = tile_size;
    let (tx, ty) = tile_offset;
    let pixels_per_row = tile_w as usize;
    let row_bytes = pixels_per_row
        .checked_mul(bytes_per_pixel as usize)
        .ok_or_else(|| anyhow!("Hextile RAW tile row bytes overflow"))?;
    let total_bytes = row_bytes
        .checked_mul(tile_h as usize)
        .ok_or_else(|| anyhow!("Hextile RAW tile total bytes overflow"))?;

    let mut raw_data = vec![0u8; total_bytes];
    stream.read_bytes(&mut raw_data).await.with_context(|| {
        format!(
            "Failed to read {} bytes of RAW data for Hextile tile at ({}, {})",
            total_bytes, tx, ty
        )
    })?;

    for row in 0..tile_h {
        let src_offset = (row as usize) * row_bytes;
        let src_row = &raw_data[src_offset..src_offset + row_bytes];

        let row_y = abs_y
            .checked_add(row)
            .ok_or_else(|| anyhow!("Hextile RAW tile row y overflows"))?;
        let row_rect = Rect::new(abs_x as i32, row_y as i32, tile_w as u32, 1);

        buffer
            .image_rect(row_rect, src_row, tile_w as usize)
            .with_context(|| {
                format!(
                    "Failed to write RAW tile row {} at ({}, {}) for tile at ({}, {})",
                    row, abs_x, row_y, tx, ty
                )
            })?;
    }

    Ok(())
}
