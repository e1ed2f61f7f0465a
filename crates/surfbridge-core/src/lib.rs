//! # surfbridge-core
//!
//! Plain data types shared by the surfbridge crates.
//!
//! This crate has no GPU dependencies. It describes *what* is being shared
//! between a graphics API and a compute API, never *how*:
//!
//! - [`GraphicsDevice`], [`SurfaceHandle`] - opaque references owned by the caller
//! - [`Plane`], [`SharedSurfaceKey`] - identity of one imported plane
//! - [`MemAccess`] - access mode fixed at import time
//! - [`Extent`] - 2-D dimensions with luma/chroma helpers
//! - [`PixelLayout`] - pixel layouts handed between kernels and inference
//!
//! ## Crate Structure
//!
//! ```text
//! surfbridge-core (this crate)
//!    ^
//!    |
//!    +-- surfbridge-compute (environment, kernels, drivers)
//!    +-- surfbridge-bench
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` - Enable serialization for layout and extent types

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod extent;
pub mod format;
pub mod surface;

pub use error::{Error, Result};
pub use extent::Extent;
pub use format::PixelLayout;
pub use surface::{GraphicsDevice, MemAccess, Plane, SharedSurfaceKey, SurfaceHandle};

/// Prelude module for convenient imports.
///
/// ```
/// use surfbridge_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::extent::Extent;
    pub use crate::format::PixelLayout;
    pub use crate::surface::{GraphicsDevice, MemAccess, Plane, SharedSurfaceKey, SurfaceHandle};
}
