//! Pixel layouts exchanged between filter kernels and the inference step.
//!
//! Only the layout is negotiated: planar vs interleaved and u8 vs f32.
//! Colour standards and bit depths beyond that are out of scope.
//!
//! | Layout          | Storage               | Planes | Bytes (w x h)   |
//! |-----------------|-----------------------|--------|-----------------|
//! | `Nv12`          | texture, Y + UV       | 2      | w*h*3/2         |
//! | `Rgba8`         | texture, interleaved  | 1      | w*h*4           |
//! | `RgbPlanarF32`  | buffer, R, G, B       | 3      | w*h*3*4         |

use crate::extent::Extent;

/// Pixel layout of a surface or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelLayout {
    /// Biplanar 4:2:0, 8-bit: full-res Y plane + half-res interleaved UV plane.
    Nv12,
    /// Interleaved 8-bit RGBA.
    Rgba8,
    /// Three consecutive f32 planes (R, G, B), `width*height` floats each.
    RgbPlanarF32,
}

impl PixelLayout {
    /// Number of graphics planes a texture of this layout exposes.
    pub const fn texture_planes(self) -> u32 {
        match self {
            Self::Nv12 => 2,
            Self::Rgba8 | Self::RgbPlanarF32 => 1,
        }
    }

    /// Colour channels carried.
    pub const fn channels(self) -> u32 {
        match self {
            Self::Nv12 | Self::RgbPlanarF32 => 3,
            Self::Rgba8 => 4,
        }
    }

    /// Bytes per stored sample.
    pub const fn bytes_per_sample(self) -> u32 {
        match self {
            Self::Nv12 | Self::Rgba8 => 1,
            Self::RgbPlanarF32 => 4,
        }
    }

    /// True when channels are stored in separate planes.
    pub const fn is_planar(self) -> bool {
        matches!(self, Self::Nv12 | Self::RgbPlanarF32)
    }

    /// True when a chroma plane at half resolution is present.
    pub const fn is_biplanar(self) -> bool {
        matches!(self, Self::Nv12)
    }

    /// Bytes needed to hold one frame of `extent`.
    pub const fn frame_bytes(self, extent: Extent) -> u64 {
        let area = extent.area();
        match self {
            Self::Nv12 => area * 3 / 2,
            Self::Rgba8 => area * 4,
            Self::RgbPlanarF32 => area * 3 * 4,
        }
    }

    /// Elements per plane for planar buffers (the kernels' "channel size").
    pub const fn plane_stride(self, extent: Extent) -> u64 {
        extent.area()
    }

    /// Short lowercase name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nv12 => "nv12",
            Self::Rgba8 => "rgba8",
            Self::RgbPlanarF32 => "rgb_planar_f32",
        }
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        let vga = Extent::new(640, 480);
        assert_eq!(PixelLayout::Nv12.frame_bytes(vga), 460_800);
        assert_eq!(PixelLayout::Rgba8.frame_bytes(vga), 1_228_800);
        assert_eq!(PixelLayout::RgbPlanarF32.frame_bytes(vga), 3_686_400);
    }

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelLayout::Nv12.texture_planes(), 2);
        assert!(PixelLayout::Nv12.is_biplanar());
        assert!(!PixelLayout::Rgba8.is_planar());
        assert_eq!(PixelLayout::RgbPlanarF32.plane_stride(Extent::new(4, 2)), 8);
    }
}
