//! Framebuffer state management and decoder registry.
//!
//! This module manages the client's framebuffer and provides a registry of
//! encoding decoders to apply server framebuffer update rectangles.

use crate::errors::RfbClientError;
use anyhow::Result as AnyResult;
use rfb_common::Rect;
use rfb_encodings as enc;
use rfb_encodings::{Decoder, MutablePixelBuffer, RfbInStream};
use rfb_pixelbuffer::{ManagedPixelBuffer, PixelBuffer as _, PixelFormat as LocalPixelFormat};
use rfb_protocol::messages::types::{PixelFormat as ServerPixelFormat, Rectangle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Registry of decoders keyed by encoding type.
#[derive(Default)]
pub struct DecoderRegistry {
    decoders: HashMap<i32, DecoderEntry>,
}

impl DecoderRegistry {
    /// Create a registry with all standard encodings registered.
    pub fn with_standard() -> Self {
        let mut reg = Self::default();
        reg.register(DecoderEntry::Raw(enc::RawDecoder));
        reg.register(DecoderEntry::CopyRect(enc::CopyRectDecoder));
        reg.register(DecoderEntry::RRE(enc::RREDecoder));
        reg.register(DecoderEntry::CoRRE(enc::CoRREDecoder));
        reg.register(DecoderEntry::Hextile(enc::HextileDecoder));
        reg.register(DecoderEntry::Tight(enc::TightDecoder::default()));
        reg.register(DecoderEntry::TRLE(enc::TRLEDecoder));
        reg.register(DecoderEntry::Zlib(enc::ZlibDecoder::default()));
        reg.register(DecoderEntry::ZlibHex(enc::ZlibHexDecoder::default()));
        reg.register(DecoderEntry::ZRLE(enc::ZRLEDecoder::default()));
        reg
    }

    /// Register a decoder entry.
    pub(crate) fn register(&mut self, decoder: DecoderEntry) {
        self.decoders.insert(decoder.encoding_type(), decoder);
    }

    /// Get a decoder by encoding type.
    pub(crate) fn get(&self, encoding: i32) -> Option<&DecoderEntry> {
        self.decoders.get(&encoding)
    }
}

/// A concrete decoder entry wrapper for dynamic dispatch over non-object-safe Decoder.
pub(crate) enum DecoderEntry {
    Raw(enc::RawDecoder),
    CopyRect(enc::CopyRectDecoder),
    RRE(enc::RREDecoder),
    CoRRE(enc::CoRREDecoder),
    Hextile(enc::HextileDecoder),
    Tight(enc::TightDecoder),
    TRLE(enc::TRLEDecoder),
    Zlib(enc::ZlibDecoder),
    ZlibHex(enc::ZlibHexDecoder),
    ZRLE(enc::ZRLEDecoder),
}

impl DecoderEntry {
    fn encoding_type(&self) -> i32 {
        match self {
            Self::Raw(d) => d.encoding_type(),
            Self::CopyRect(d) => d.encoding_type(),
            Self::RRE(d) => d.encoding_type(),
            Self::CoRRE(d) => d.encoding_type(),
            Self::Hextile(d) => d.encoding_type(),
            Self::Tight(d) => d.encoding_type(),
            Self::TRLE(d) => d.encoding_type(),
            Self::Zlib(d) => d.encoding_type(),
            Self::ZlibHex(d) => d.encoding_type(),
            Self::ZRLE(d) => d.encoding_type(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "Raw",
            Self::CopyRect(_) => "CopyRect",
            Self::RRE(_) => "RRE",
            Self::CoRRE(_) => "CoRRE",
            Self::Hextile(_) => "Hextile",
            Self::Tight(_) => "Tight",
            Self::TRLE(_) => "TRLE",
            Self::Zlib(_) => "Zlib",
            Self::ZlibHex(_) => "ZlibHex",
            Self::ZRLE(_) => "ZRLE",
        }
    }

    async fn decode<R: AsyncRead + Unpin>(
        &self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
        pixel_format: &ServerPixelFormat,
        buffer: &mut dyn MutablePixelBuffer,
    ) -> AnyResult<()> {
        match self {
            Self::Raw(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::CopyRect(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::RRE(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::CoRRE(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Hextile(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Tight(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::TRLE(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::Zlib(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::ZlibHex(d) => d.decode(stream, rect, pixel_format, buffer).await,
            Self::ZRLE(d) => d.decode(stream, rect, pixel_format, buffer).await,
        }
    }
}

/// Framebuffer state and decoder dispatcher.
pub struct Framebuffer {
    /// Local framebuffer buffer in a fixed output pixel format (RGB888).
    buffer: ManagedPixelBuffer,
    /// Server-advertised pixel format (input format for decoders).
    server_pixel_format: ServerPixelFormat,
    /// Decoder registry.
    registry: DecoderRegistry,
    /// Desktop name, updated by the DesktopName pseudo-encoding mid-session.
    desktop_name: Option<String>,
}

impl Framebuffer {
    /// Create a new framebuffer with given server pixel format and dimensions.
    ///
    /// The internal buffer uses local RGB888 format for simplicity and broad compatibility.
    pub fn new(width: u16, height: u16, server_pixel_format: ServerPixelFormat) -> Self {
        let local_format = LocalPixelFormat::rgb888();
        let buffer = ManagedPixelBuffer::new(width as u32, height as u32, local_format);
        Self {
            buffer,
            server_pixel_format,
            registry: DecoderRegistry::with_standard(),
            desktop_name: None,
        }
    }

    /// Returns the current dimensions.
    pub fn size(&self) -> (u16, u16) {
        let (w, h) = self.buffer.dimensions();
        (w as u16, h as u16)
    }

    /// Returns a reference to the underlying buffer.
    pub fn buffer(&self) -> &ManagedPixelBuffer {
        &self.buffer
    }

    /// Returns a mutable reference to the underlying buffer.
    pub fn buffer_mut(&mut self) -> &mut ManagedPixelBuffer {
        &mut self.buffer
    }

    /// Returns the most recent desktop name received via the DesktopName pseudo-encoding,
    /// if the server has sent one since connecting.
    pub fn desktop_name(&self) -> Option<&str> {
        self.desktop_name.as_deref()
    }

    /// Apply a single rectangle update from the server.
    pub async fn apply_rectangle<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rect: &Rectangle,
    ) -> Result<(), RfbClientError> {
        match rect.encoding {
            enc::ENCODING_LAST_RECT => Ok(()),
            enc::ENCODING_DESKTOP_SIZE => {
                self.buffer.resize(rect.width as u32, rect.height as u32);
                Ok(())
            }
            enc::ENCODING_WMVI => {
                // Rectangle body is ServerInit's 16-byte pixel-format record.
                let pf = ServerPixelFormat::read_from(stream).await.map_err(|e| {
                    RfbClientError::ProtocolViolation(format!("failed to read WMVi pixel format: {e}"))
                })?;
                self.buffer.resize(rect.width as u32, rect.height as u32);
                self.server_pixel_format = pf;
                Ok(())
            }
            enc::ENCODING_DESKTOP_NAME => {
                let length = stream.read_u32().await.map_err(|e| {
                    RfbClientError::ProtocolViolation(format!("failed to read DesktopName length: {e}"))
                })? as usize;
                let mut name_bytes = vec![0u8; length];
                stream.read_bytes(&mut name_bytes).await.map_err(|e| {
                    RfbClientError::ProtocolViolation(format!("failed to read DesktopName bytes: {e}"))
                })?;
                self.desktop_name = Some(String::from_utf8_lossy(&name_bytes).into_owned());
                Ok(())
            }
            enc::ENCODING_GII | enc::ENCODING_XVP => {
                // Capability announcements carried as zero-size pseudo-rectangles;
                // no rectangle body to consume.
                tracing::debug!(
                    "Server advertised pseudo-encoding {} (GII/XVP capability)",
                    rect.encoding
                );
                Ok(())
            }
            other => {
                let decoder = self
                    .registry
                    .get(other)
                    .ok_or(RfbClientError::Unsupported(format!("encoding {other} not registered")))?;

                tracing::debug!(
                    "Decoder selected: {} (encoding={}) for rect x={}, y={}, w={}, h={}",
                    decoder.name(),
                    other,
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height
                );

                let pf = &self.server_pixel_format;
                let buffer: &mut dyn MutablePixelBuffer = &mut self.buffer;

                decoder.decode(stream, rect, pf, buffer).await.map_err(|e| {
                    match e.downcast::<enc::ProtocolViolation>() {
                        Ok(violation) => RfbClientError::ProtocolViolation(violation.0),
                        Err(source) => RfbClientError::Encoding {
                            encoding: other,
                            source,
                        },
                    }
                })
            }
        }
    }

    /// Apply an update by streaming from the input (reads header + decodes rectangles).
    pub async fn apply_update_stream<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
    ) -> Result<Vec<Rect>, RfbClientError> {
        // FramebufferUpdate header: 1 byte padding + 2 bytes rect count
        stream.skip(1).await.map_err(|e| {
            RfbClientError::ProtocolViolation(format!("failed to read FramebufferUpdate padding: {e}"))
        })?;
        let num_raw = stream.read_u16().await.map_err(|e| {
            RfbClientError::ProtocolViolation(format!("failed to read FramebufferUpdate rect count: {e}"))
        })?;

        tracing::debug!(
            target: "rfb_client::framing",
            "FBU start: declared_rects={}, available_buffer_bytes={}",
            num_raw,
            stream.available()
        );

        let mut damage: Vec<Rect> = Vec::new();
        let mut rects_decoded = 0;
        let unbounded = num_raw == 0xFFFF;
        let num = if unbounded { usize::MAX } else { num_raw as usize };
        if !unbounded {
            damage.reserve(num);
        }

        for i in 0..num {
            let buffer_before = stream.available();
            let rect = Rectangle::read_from(stream).await.map_err(|e| {
                RfbClientError::ProtocolViolation(format!("failed to read Rectangle header: {e}"))
            })?;
            tracing::info!(
                "FramebufferUpdate rect: x={}, y={}, w={}, h={}, encoding={}",
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                rect.encoding
            );

            if unbounded && rect.encoding == enc::ENCODING_LAST_RECT {
                tracing::debug!(
                    target: "rfb_client::framing",
                    "FBU rect {}: LastRect marker (end of update)",
                    rects_decoded
                );
                break;
            }

            tracing::debug!(
                target: "rfb_client::framing",
                "FBU rect {}: enc={} rect=[{},{} {}x{}] buffer_before={}",
                i, rect.encoding, rect.x, rect.y, rect.width, rect.height, buffer_before
            );

            self.apply_rectangle(stream, &rect).await?;

            tracing::debug!(
                target: "rfb_client::framing",
                "FBU rect {}: decoded, buffer_after={}",
                i,
                stream.available()
            );

            rects_decoded += 1;

            if rect.encoding >= 0 {
                damage.push(Rect::new(
                    rect.x as i32,
                    rect.y as i32,
                    rect.width as u32,
                    rect.height as u32,
                ));
            }
        }

        if !unbounded && rects_decoded != num_raw as usize {
            tracing::warn!(
                target: "rfb_client::framing",
                "FBU end: MISMATCH! declared_rects={} decoded_rects={}",
                num_raw,
                rects_decoded
            );
        } else {
            tracing::debug!(
                target: "rfb_client::framing",
                "FBU end: rects_decoded={} (matches declared count)",
                rects_decoded
            );
        }

        Ok(damage)
    }

    /// Apply multiple rectangles, returning the list of damaged regions for repaint.
    pub async fn apply_update<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut RfbInStream<R>,
        rects: &[Rectangle],
    ) -> Result<Vec<Rect>, RfbClientError> {
        let mut damage = Vec::with_capacity(rects.len());
        for rect in rects {
            tracing::info!(
                "FramebufferUpdate rect: x={}, y={}, w={}, h={}, encoding={}",
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                rect.encoding
            );
            self.apply_rectangle(stream, rect).await?;
            if rect.encoding >= 0 {
                damage.push(Rect::new(
                    rect.x as i32,
                    rect.y as i32,
                    rect.width as u32,
                    rect.height as u32,
                ));
            }
        }
        Ok(damage)
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pixel_format() -> ServerPixelFormat {
        ServerPixelFormat {
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

    #[test]
    fn registry_has_all_standard_encodings() {
        let reg = DecoderRegistry::with_standard();
        for enc_type in [
            enc::ENCODING_RAW,
            enc::ENCODING_COPY_RECT,
            enc::ENCODING_RRE,
            enc::ENCODING_CORRE,
            enc::ENCODING_HEXTILE,
            enc::ENCODING_TIGHT,
            enc::ENCODING_TRLE,
            enc::ENCODING_ZLIB,
            enc::ENCODING_ZLIBHEX,
            enc::ENCODING_ZRLE,
        ] {
            assert!(reg.get(enc_type).is_some(), "missing decoder for {enc_type}");
        }
    }

    #[tokio::test]
    async fn applies_desktop_size_resize() {
        let pf = test_pixel_format();
        let mut fb = Framebuffer::new(4, 4, pf);
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 8,
            height: 6,
            encoding: enc::ENCODING_DESKTOP_SIZE,
        };
        let mut stream = RfbInStream::new(std::io::Cursor::new(Vec::new()));
        fb.apply_rectangle(&mut stream, &rect).await.unwrap();
        assert_eq!(fb.size(), (8, 6));
    }

    #[tokio::test]
    async fn applies_desktop_name_update() {
        let pf = test_pixel_format();
        let mut fb = Framebuffer::new(4, 4, pf);
        let name = b"My Desktop";
        let mut data = Vec::new();
        data.extend_from_slice(&(name.len() as u32).to_be_bytes());
        data.extend_from_slice(name);
        let mut stream = RfbInStream::new(std::io::Cursor::new(data));
        let rect = Rectangle {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            encoding: enc::ENCODING_DESKTOP_NAME,
        };
        fb.apply_rectangle(&mut stream, &rect).await.unwrap();
        assert_eq!(fb.desktop_name(), Some("My Desktop"));
    }
}
