//! CoRRE encoding decoder - RRE with compact (u8) sub-rectangle coordinates.
//!
//! CoRRE (type 4) is RRE restricted so that every sub-rectangle's x/y/width/height
//! fit in a single byte, which also bounds the outer rectangle to 256x256. Servers
//! use it instead of RRE when the bandwidth saving from 1-byte fields outweighs the
//! size restriction.
//!
//! # Wire Format
//!
//! ```text
//! +------------------+
//! | num_subrects     |  4 bytes (u32, network byte order)
//! +------------------+
//! | background_pixel |  bytes_per_pixel bytes
//! +------------------+
//! | Subrectangle 1   |
//! |   pixel          |  bytes_per_pixel bytes
//! |   x, y, w, h     |  1 byte each (u8)
//! +------------------+
//! | ...              |
//! +------------------+
//! ```

use crate::{
    Decoder, MutablePixelBuffer, PixelFormat, ProtocolViolation, Rectangle, RfbInStream,
    ENCODING_CORRE,
};
use anyhow::{anyhow, Context, Result};
use rfb_common::Rect;
use tokio::io::AsyncRead;

/// Maximum rectangle extent CoRRE can represent (coordinates are a single byte).
const MAX_CORRE_EXTENT: u16 = 255;

/// Decoder for CoRRE (Compact RRE).
pub struct CoRREDecoder;

impl Decoder for CoRREDecoder {
    fn encoding_type(&self) -> i32 {
        ENCODING_CORRE
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

        if rect.width > MAX_CORRE_EXTENT || rect.height > MAX_CORRE_EXTENT {
            return Err(anyhow::Error::new(ProtocolViolation(format!(
                "CoRRE rectangle {}x{} exceeds the 256x256 bound the encoding allows",
                rect.width, rect.height
            ))));
        }

        let bytes_per_pixel = pixel_format.bits_per_pixel / 8;
        if bytes_per_pixel == 0 || bytes_per_pixel > 4 {
            return Err(anyhow!(
                "Invalid bytes_per_pixel: {} (must be 1-4)",
                bytes_per_pixel
            ));
        }

        let num_subrects = stream
            .read_u32()
            .await
            .context("Failed to read CoRRE num_subrects")?;

        let mut bg_pixel = vec![0u8; bytes_per_pixel as usize];
        stream
            .read_bytes(&mut bg_pixel)
            .await
            .context("Failed to read CoRRE background pixel")?;

        let dest_rect = Rect::new(
            rect.x as i32,
            rect.y as i32,
            rect.width as u32,
            rect.height as u32,
        );
        buffer
            .fill_rect(dest_rect, &bg_pixel)
            .context("Failed to fill background in CoRRE decode")?;

        for i in 0..num_subrects {
            let mut pixel = vec![0u8; bytes_per_pixel as usize];
            stream
                .read_bytes(&mut pixel)
                .await
                .with_context(|| format!("Failed to read pixel for CoRRE subrect {i}"))?;

            let x = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read x for CoRRE subrect {i}"))? as u16;
            let y = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read y for CoRRE subrect {i}"))? as u16;
            let width = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read width for CoRRE subrect {i}"))?
                as u16;
            let height = stream
                .read_u8()
                .await
                .with_context(|| format!("Failed to read height for CoRRE subrect {i}"))?
                as u16;

            let right = x.checked_add(width).ok_or_else(|| {
                anyhow!("CoRRE subrect {i} x+width overflows: {x} + {width}")
            })?;
            let bottom = y.checked_add(height).ok_or_else(|| {
                anyhow!("CoRRE subrect {i} y+height overflows: {y} + {height}")
            })?;

            if right > rect.width {
                return Err(anyhow!(
                    "CoRRE subrect {i} extends beyond rectangle width: x={x}, width={width}, rect.width={}",
                    rect.width
                ));
            }
            if bottom > rect.height {
                return Err(anyhow!(
                    "CoRRE subrect {i} extends beyond rectangle height: y={y}, height={height}, rect.height={}",
                    rect.height
                ));
            }

            if width == 0 || height == 0 {
                continue;
            }

            let abs_x = rect
                .x
                .checked_add(x)
                .ok_or_else(|| anyhow!("CoRRE subrect {i} absolute x overflows"))?;
            let abs_y = rect
                .y
                .checked_add(y)
                .ok_or_else(|| anyhow!("CoRRE subrect {i} absolute y overflows"))?;

            let subrect = Rect::new(abs_x as i32, abs_y as i32, width as u32, height as u32);
            buffer.fill_rect(subrect, &pixel).with_context(|| {
                format!("Failed to fill CoRRE subrect {i} at ({abs_x}, {abs_y}) size {width}x{height}")
            })?;
        }

        Ok(())
    }
}
