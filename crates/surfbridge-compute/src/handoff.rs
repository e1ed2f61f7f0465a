//! Boundary to the external inference step.
//!
//! Nothing here runs a network. Filters hand over where their output lives
//! and in which layout; the adapter decides how to consume it.

use surfbridge_core::{Error, Extent, PixelLayout, SurfaceHandle};

use crate::backend::MemId;
use crate::ComputeResult;

/// Input handed to an [`InferenceAdapter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InferenceInput<'a> {
    /// Device buffer in the compute context (zero-copy).
    ComputeBuffer {
        mem: MemId,
        layout: PixelLayout,
        extent: Extent,
    },
    /// Graphics texture, shared with the compute context.
    SharedSurface {
        surface: SurfaceHandle,
        layout: PixelLayout,
        extent: Extent,
    },
    /// Host memory, e.g. a frame read back for a CPU plugin.
    HostPixels {
        data: &'a [u8],
        layout: PixelLayout,
        extent: Extent,
    },
}

impl<'a> InferenceInput<'a> {
    /// Host pixels, checked against the frame size of `layout`.
    pub fn host(data: &'a [u8], layout: PixelLayout, extent: Extent) -> ComputeResult<Self> {
        extent.require_non_empty()?;
        if (data.len() as u64) < layout.frame_bytes(extent) {
            return Err(Error::InvalidParameter {
                name: "data",
                value: data.len() as i64,
                reason: "shorter than one frame",
            }
            .into());
        }
        Ok(Self::HostPixels { data, layout, extent })
    }

    pub fn layout(&self) -> PixelLayout {
        match self {
            Self::ComputeBuffer { layout, .. }
            | Self::SharedSurface { layout, .. }
            | Self::HostPixels { layout, .. } => *layout,
        }
    }

    pub fn extent(&self) -> Extent {
        match self {
            Self::ComputeBuffer { extent, .. }
            | Self::SharedSurface { extent, .. }
            | Self::HostPixels { extent, .. } => *extent,
        }
    }

    /// True when no host copy is involved.
    pub fn is_device_resident(&self) -> bool {
        !matches!(self, Self::HostPixels { .. })
    }
}

/// External inference step.
pub trait InferenceAdapter {
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether `layout` can be consumed without conversion.
    fn accepts(&self, layout: PixelLayout) -> bool {
        let _ = layout;
        true
    }

    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<Self::Output, Self::Error>;
}
