//! [`PixelBuffer`] (read-only) and [`MutablePixelBuffer`] (read-write plus
//! fill/copy/blit) are the interface decoders write through and the view
//! layer reads from, so a decoder doesn't need to know whether it's
//! painting into a plain `Vec` or a platform-backed surface.
//!
//! Every stride in this API counts **pixels**, not bytes - get the
//! conversion backwards (`height * stride` instead of
//! `height * stride * bytes_per_pixel`) and a buffer silently comes out
//! short or reads past its own end.
//! ```text
//! byte_offset = (y * stride + x) * bytes_per_pixel
//! ```

use crate::PixelFormat;
use anyhow::Result;
use rfb_common::{Point, Rect};

/// Read-only access to a framebuffer's pixel data. Implementations must keep
/// the data stable for the lifetime of the returned slice.
pub trait PixelBuffer {
    /// Buffer dimensions as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// The pixel format the buffer's bytes are encoded in.
    fn pixel_format(&self) -> &PixelFormat;

    /// Returns the pixel data backing `rect`, or `None` if it's out of
    /// bounds. `stride` receives the row stride in pixels; the returned
    /// slice may cover more than `rect` alone, so navigate rows through
    /// `stride` rather than assuming the slice is tightly packed.
    fn get_buffer(&self, rect: Rect, stride: &mut usize) -> Option<&[u8]>;
}

/// Write access to a framebuffer, either by borrowing the raw bytes
/// ([`get_buffer_rw`](Self::get_buffer_rw)/[`commit_buffer`](Self::commit_buffer))
/// or through the higher-level fill/copy/blit operations decoders use.
pub trait MutablePixelBuffer: PixelBuffer + Send {
    /// Returns mutable access to the pixel data backing `rect`, or `None` if
    /// it's out of bounds. Every call must be paired with a
    /// [`commit_buffer()`](Self::commit_buffer) for the same rectangle once
    /// the caller is done writing, or the change may not stick.
    fn get_buffer_rw(&mut self, rect: Rect, stride: &mut usize) -> Option<&mut [u8]>;

    /// Finalizes a write made through [`get_buffer_rw()`](Self::get_buffer_rw).
    fn commit_buffer(&mut self, rect: Rect);

    /// Fills `rect` with `pixel`, which must be exactly one pixel's worth of
    /// bytes in this buffer's format.
    fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) -> Result<()>;

    /// Copies `dest`'s pixels from `dest` offset by `src_offset`, handling
    /// the case where source and destination overlap (e.g. a scroll).
    fn copy_rect(&mut self, dest: Rect, src_offset: Point) -> Result<()>;

    /// Blits `pixels` into `dest`. `stride` is the source row stride in
    /// pixels; `0` means the data is tightly packed to `dest`'s width.
    fn image_rect(&mut self, dest: Rect, pixels: &[u8], stride: usize) -> Result<()>;
}
