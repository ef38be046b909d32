//! Core RFB protocol types.
//!
//! This module defines fundamental types used throughout the RFB protocol:
//! - [`PixelFormat`] - Describes pixel format (bit depths, color channels, endianness)
//! - [`Rectangle`] - Rectangle header with encoding type
//! - Encoding constants for different compression/encoding schemes

use crate::io::{RfbInStream, RfbOutStream};
use tokio::io::{AsyncRead, AsyncWrite};

/// RFB pixel format specification.
///
/// Describes how pixels are encoded in the framebuffer, including:
/// - Bits per pixel and color depth
/// - RGB channel sizes and bit positions
/// - Byte order (big/little endian)
///
/// # Wire Format
///
/// PixelFormat is 16 bytes on the wire:
/// - 1 byte: bits_per_pixel
/// - 1 byte: depth
/// - 1 byte: big_endian (0 or 1)
/// - 1 byte: true_color (0 or 1)
/// - 2 bytes: red_max
/// - 2 bytes: green_max
/// - 2 bytes: blue_max
/// - 1 byte: red_shift
/// - 1 byte: green_shift
/// - 1 byte: blue_shift
/// - 3 bytes: padding (must be zero)
///
/// # Examples
///
/// ```
/// use rfb_protocol::messages::types::PixelFormat;
///
/// // Standard 32-bit RGB format
/// let pf = PixelFormat {
///     bits_per_pixel: 32,
///     depth: 24,
///     big_endian: 0,
///     true_color: 1,
///     red_max: 255,
///     green_max: 255,
///     blue_max: 255,
///     red_shift: 16,
///     green_shift: 8,
///     blue_shift: 0,
/// };
///
/// assert_eq!(pf.bytes_per_pixel(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: u8, // Boolean: must be 0 or 1
    pub true_color: u8, // Boolean: must be 0 or 1
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// Calculate bytes per pixel (1, 2, 3, or 4).
    ///
    /// # Examples
    ///
    /// ```
    /// # use rfb_protocol::messages::types::PixelFormat;
    /// let pf = PixelFormat {
    ///     bits_per_pixel: 32,
    ///     depth: 24,
    ///     big_endian: 0,
    ///     true_color: 1,
    ///     red_max: 255, green_max: 255, blue_max: 255,
    ///     red_shift: 16, green_shift: 8, blue_shift: 0,
    /// };
    /// assert_eq!(pf.bytes_per_pixel(), 4);
    /// ```
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bits_per_pixel.div_ceil(8)
    }

    /// Read a PixelFormat from an RFB input stream.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - EOF is reached before all 16 bytes are read
    /// - Boolean fields (big_endian, true_color) are not 0 or 1
    /// - Padding bytes are not zero
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        let bits_per_pixel = stream.read_u8().await?;
        let depth = stream.read_u8().await?;
        let big_endian = stream.read_u8().await?;
        let true_color = stream.read_u8().await?;

        // Validate booleans strictly
        if big_endian > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("big_endian must be 0 or 1, got {}", big_endian),
            ));
        }
        if true_color > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("true_color must be 0 or 1, got {}", true_color),
            ));
        }

        let red_max = stream.read_u16().await?;
        let green_max = stream.read_u16().await?;
        let blue_max = stream.read_u16().await?;
        let red_shift = stream.read_u8().await?;
        let green_shift = stream.read_u8().await?;
        let blue_shift = stream.read_u8().await?;

        // Read and validate padding (3 bytes, must be zero)
        let mut padding = [0u8; 3];
        stream.read_bytes(&mut padding).await?;
        if padding != [0, 0, 0] {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("padding must be zero, got {:?}", padding),
            ));
        }

        Ok(Self {
            bits_per_pixel,
            depth,
            big_endian,
            true_color,
            red_max,
            green_max,
            blue_max,
            red_shift,
            green_shift,
            blue_shift,
        })
    }

    /// Write this PixelFormat to an RFB output stream.
    ///
    /// # Errors
    ///
    /// Returns an error if boolean fields are not 0 or 1.
    pub fn write_to<W: AsyncWrite + Unpin>(
        &self,
        stream: &mut RfbOutStream<W>,
    ) -> std::io::Result<()> {
        // Validate booleans before writing
        if self.big_endian > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("big_endian must be 0 or 1, got {}", self.big_endian),
            ));
        }
        if self.true_color > 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("true_color must be 0 or 1, got {}", self.true_color),
            ));
        }

        stream.write_u8(self.bits_per_pixel);
        stream.write_u8(self.depth);
        stream.write_u8(self.big_endian);
        stream.write_u8(self.true_color);
        stream.write_u16(self.red_max);
        stream.write_u16(self.green_max);
        stream.write_u16(self.blue_max);
        stream.write_u8(self.red_shift);
        stream.write_u8(self.green_shift);
        stream.write_u8(self.blue_shift);
        // 3 bytes padding (must be zero)
        stream.write_u8(0);
        stream.write_u8(0);
        stream.write_u8(0);

        Ok(())
    }
}

/// Rectangle header for framebuffer updates.
///
/// Describes a rectangular region of the screen along with the encoding
/// type used for its pixel data.
///
/// # Wire Format
///
/// Rectangle header is 12 bytes:
/// - 2 bytes: x position
/// - 2 bytes: y position
/// - 2 bytes: width
/// - 2 bytes: height
/// - 4 bytes: encoding type (signed i32)
///
/// # Note
///
/// The Rectangle struct only contains the header. The actual pixel data
/// follows and must be parsed according to the encoding type by separate
/// decoder implementations (Phase 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl Rectangle {
    /// Read a Rectangle header from an RFB input stream.
    ///
    /// **Note**: This only reads the 12-byte header. The encoding-specific
    /// pixel data that follows must be handled separately.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut RfbInStream<R>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            x: stream.read_u16().await?,
            y: stream.read_u16().await?,
            width: stream.read_u16().await?,
            height: stream.read_u16().await?,
            encoding: stream.read_i32().await?,
        })
    }

    /// Write a Rectangle header to an RFB output stream.
    pub fn write_to<W: AsyncWrite + Unpin>(&self, stream: &mut RfbOutStream<W>) {
        stream.write_u16(self.x);
        stream.write_u16(self.y);
        stream.write_u16(self.width);
        stream.write_u16(self.height);
        stream.write_i32(self.encoding);
    }
}

//
// Encoding type constants
//

/// Raw encoding - uncompressed pixel data.
pub const ENCODING_RAW: i32 = 0;

/// CopyRect encoding - copy from another screen region.
pub const ENCODING_COPYRECT: i32 = 1;

/// RRE (Rise-and-Run-length Encoding).
pub const ENCODING_RRE: i32 = 2;

/// Hextile encoding - 16x16 tile-based compression.
pub const ENCODING_HEXTILE: i32 = 5;

/// Tight encoding - JPEG and zlib compression.
pub const ENCODING_TIGHT: i32 = 7;

/// ZRLE (Zlib Run-Length Encoding).
pub const ENCODING_ZRLE: i32 = 16;

/// CoRRE (Compact RRE) encoding - RRE with 8-bit subrectangle coordinates.
pub const ENCODING_CORRE: i32 = 4;

/// Zlib encoding - Raw pixel data compressed with a single persistent zlib stream.
pub const ENCODING_ZLIB: i32 = 6;

/// ZlibHex encoding - Hextile with raw/mono/colour subencodings zlib-compressed.
pub const ENCODING_ZLIBHEX: i32 = 8;

/// TRLE (Tile Run-Length Encoding) - ZRLE's uncompressed tile-based ancestor.
pub const ENCODING_TRLE: i32 = 15;

//
// Pseudo-encodings
//

/// LastRect pseudo-encoding - marks the end of a FramebufferUpdate's rectangle list.
pub const PSEUDO_ENCODING_LAST_RECT: i32 = -224;

/// DesktopSize pseudo-encoding - server-initiated resize notification.
pub const PSEUDO_ENCODING_DESKTOP_SIZE: i32 = -223;

/// DesktopName pseudo-encoding - server-initiated desktop name change.
pub const PSEUDO_ENCODING_DESKTOP_NAME: i32 = -307;

/// WMVi pseudo-encoding - combined desktop-size + framebuffer update.
pub const PSEUDO_ENCODING_WMVI: i32 = 0x574d_5669;

/// GII pseudo-encoding - generic input injection capability.
pub const PSEUDO_ENCODING_GII: i32 = -305;

/// XVP pseudo-encoding - extended virtual machine power control.
pub const PSEUDO_ENCODING_XVP: i32 = -309;

//
// Security type constants
//

/// No security - no authentication required.
pub const SECURITY_TYPE_NONE: u8 = 1;

/// VNC authentication - DES challenge-response with password.
pub const SECURITY_TYPE_VNC_AUTH: u8 = 2;

/// TightVNC's capability-negotiated security type (tunnel + auth capability lists).
pub const SECURITY_TYPE_TIGHT: u8 = 16;

/// VeNCrypt - TLS-wrapped security subtype negotiation.
pub const SECURITY_TYPE_VENCRYPT: u8 = 19;

//
// VeNCrypt subtype constants
//

/// Plain username/password authentication, no TLS tunnel.
pub const VENCRYPT_SUBTYPE_PLAIN: u32 = 256;

/// TLS tunnel, then SecurityType::None inside.
pub const VENCRYPT_SUBTYPE_TLS_NONE: u32 = 257;

/// TLS tunnel, then VNC authentication inside.
pub const VENCRYPT_SUBTYPE_TLS_VNC: u32 = 258;

/// TLS tunnel, then Plain authentication inside.
pub const VENCRYPT_SUBTYPE_TLS_PLAIN: u32 = 259;

/// X509-verified TLS tunnel, then SecurityType::None inside.
pub const VENCRYPT_SUBTYPE_X509_NONE: u32 = 260;

/// X509-verified TLS tunnel, then VNC authentication inside.
pub const VENCRYPT_SUBTYPE_X509_VNC: u32 = 261;

/// X509-verified TLS tunnel, then Plain authentication inside.
pub const VENCRYPT_SUBTYPE_X509_PLAIN: u32 = 262;
