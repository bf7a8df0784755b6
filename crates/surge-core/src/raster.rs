//! Uncompressed RGB pixel buffer shared by the codec, tiling, and engine
//! layers.

use crate::error::{Result, UpscaleError};

/// Channel count for every raster in the worker.  Alpha is dropped at decode
/// time and never reintroduced.
pub const RGB_CHANNELS: usize = 3;

/// An uncompressed 8-bit RGB image in row-major interleaved order.
///
/// Invariant: `data.len() == width * height * RGB_CHANNELS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Raster {
    /// Wrap an existing pixel buffer, validating the size invariant.
    pub fn from_vec(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * RGB_CHANNELS;
        if data.len() != expected {
            return Err(UpscaleError::Decode(format!(
                "raster buffer size mismatch: {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Allocate a zero-filled raster.
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * RGB_CHANNELS],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// One row of interleaved RGB bytes.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * RGB_CHANNELS;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// Mutable slice covering `len` pixels starting at `(x, y)`.
    pub fn row_span_mut(&mut self, x: u32, y: u32, len: usize) -> &mut [u8] {
        let start = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        &mut self.data[start..start + len * RGB_CHANNELS]
    }

    /// Slice covering `len` pixels starting at `(x, y)`.
    pub fn row_span(&self, x: u32, y: u32, len: usize) -> &[u8] {
        let start = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        &self.data[start..start + len * RGB_CHANNELS]
    }

    /// Copy out the `w`×`h` rectangle anchored at `(x, y)`.
    ///
    /// The rectangle must lie inside the raster.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Raster {
        debug_assert!(x + w <= self.width && y + h <= self.height);
        let mut out = Vec::with_capacity(w as usize * h as usize * RGB_CHANNELS);
        for row in 0..h {
            out.extend_from_slice(self.row_span(x, y + row, w as usize));
        }
        Raster {
            width: w,
            height: h,
            data: out,
        }
    }
}
