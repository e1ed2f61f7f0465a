//! Opaque graphics-side references and the identity of imported planes.
//!
//! Nothing here owns GPU memory. A [`SurfaceHandle`] is whatever pointer the
//! graphics API uses for a texture (an `ID3D11Texture2D*` on Windows); the
//! compute side imports views of it and must never outlive the caller's
//! texture.
//!
//! # Identity
//!
//! ```text
//! NV12 texture 0x1000
//!   ├── plane 0 (Y,  full res)   -> SharedSurfaceKey(0x1000, Luma)
//!   └── plane 1 (UV, half res)   -> SharedSurfaceKey(0x1000, Chroma)
//! ```

use std::fmt;

/// Opaque reference to the graphics device a compute context is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphicsDevice(usize);

impl GraphicsDevice {
    /// Wrap a raw device pointer.
    pub fn from_raw(ptr: *mut std::ffi::c_void) -> Self {
        Self(ptr as usize)
    }

    /// Wrap an already-numeric identifier (tests, recording driver).
    pub const fn from_id(id: usize) -> Self {
        Self(id)
    }

    /// Raw pointer for native calls.
    pub fn as_raw(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }

    /// Numeric identity.
    pub const fn id(&self) -> usize {
        self.0
    }
}

/// Opaque reference to a graphics-owned texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(usize);

impl SurfaceHandle {
    /// Wrap a raw texture pointer.
    pub fn from_raw(ptr: *mut std::ffi::c_void) -> Self {
        Self(ptr as usize)
    }

    /// Wrap an already-numeric identifier.
    pub const fn from_id(id: usize) -> Self {
        Self(id)
    }

    /// Raw pointer for native calls.
    pub fn as_raw(&self) -> *mut std::ffi::c_void {
        self.0 as *mut std::ffi::c_void
    }

    /// Numeric identity.
    pub const fn id(&self) -> usize {
        self.0
    }

    /// True for the null handle.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface@{:#x}", self.0)
    }
}

/// One memory-contiguous component of a multi-planar texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Plane {
    /// Plane 0: luma, or the only plane of a packed format.
    Luma,
    /// Plane 1: interleaved chroma of a biplanar format.
    Chroma,
}

impl Plane {
    /// Subresource index passed to the import call.
    pub const fn index(self) -> u32 {
        match self {
            Self::Luma => 0,
            Self::Chroma => 1,
        }
    }

    /// Inverse of [`Plane::index`].
    pub const fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Luma),
            1 => Some(Self::Chroma),
            _ => None,
        }
    }
}

/// Access mode of an imported compute view.
///
/// Fixed at import time. The registry keeps the mode of the first import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemAccess {
    /// Kernels only read.
    ReadOnly,
    /// Kernels read and write.
    #[default]
    ReadWrite,
}

impl MemAccess {
    /// Map the `read_only` flag used by the import API.
    pub const fn from_read_only(read_only: bool) -> Self {
        if read_only { Self::ReadOnly } else { Self::ReadWrite }
    }

    /// True for [`MemAccess::ReadOnly`].
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

/// Identity of one imported plane: (texture, plane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedSurfaceKey {
    /// Graphics texture.
    pub surface: SurfaceHandle,
    /// Plane of that texture.
    pub plane: Plane,
}

impl SharedSurfaceKey {
    /// Key for `plane` of `surface`.
    pub const fn new(surface: SurfaceHandle, plane: Plane) -> Self {
        Self { surface, plane }
    }
}

impl fmt::Display for SharedSurfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.surface, self.plane.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_planes_of_one_surface_are_distinct_keys() {
        let tex = SurfaceHandle::from_id(0x1000);
        let luma = SharedSurfaceKey::new(tex, Plane::Luma);
        let chroma = SharedSurfaceKey::new(tex, Plane::Chroma);
        assert_ne!(luma, chroma);

        let set: HashSet<_> = [luma, chroma, luma].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_plane_index_roundtrip() {
        for plane in [Plane::Luma, Plane::Chroma] {
            assert_eq!(Plane::from_index(plane.index()), Some(plane));
        }
        assert_eq!(Plane::from_index(2), None);
    }

    #[test]
    fn test_raw_pointer_identity() {
        let mut backing = 7u8;
        let ptr = &mut backing as *mut u8 as *mut std::ffi::c_void;
        let handle = SurfaceHandle::from_raw(ptr);
        assert_eq!(handle.as_raw(), ptr);
        assert!(!handle.is_null());
        assert!(SurfaceHandle::from_id(0).is_null());
    }

    #[test]
    fn test_access_from_flag() {
        assert!(MemAccess::from_read_only(true).is_read_only());
        assert_eq!(MemAccess::from_read_only(false), MemAccess::ReadWrite);
    }
}
