//! 2-D dimensions and the luma/chroma relationship of biplanar layouts.
//!
//! The chroma plane of NV12 is sampled at half resolution in both
//! directions. All halving here is integer division with no rounding
//! adjustment; callers that need exact chroma coverage must pass even
//! luma dimensions, which [`Extent::require_even`] checks.

use crate::error::{Error, Result};

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent {
    /// New extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Extent of the chroma plane for a luma plane of this size.
    #[inline]
    pub const fn chroma(&self) -> Self {
        Self::new(self.width / 2, self.height / 2)
    }

    /// Pixel count.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Reject empty extents.
    pub fn require_non_empty(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::dimensions(self.width, self.height, "zero dimension"));
        }
        Ok(())
    }

    /// Reject empty or odd extents (biplanar layouts).
    pub fn require_even(&self) -> Result<()> {
        self.require_non_empty()?;
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(Error::dimensions(
                self.width,
                self.height,
                "biplanar layouts need even dimensions",
            ));
        }
        Ok(())
    }

    /// Extent grown by `border` on every side.
    pub const fn padded(&self, border: u32) -> Self {
        Self::new(self.width + 2 * border, self.height + 2 * border)
    }
}

impl From<(u32, u32)> for Extent {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

/// Chroma border for a luma border (integer halving).
#[inline]
pub const fn chroma_border(border: u32) -> u32 {
    border / 2
}
