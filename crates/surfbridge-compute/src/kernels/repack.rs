//! RGBA texture -> planar RGB float buffer.
//!
//! Feeds a rendered RGBA frame to the inference step. The dispatch sits
//! between acquire and release like every other filter.

use std::sync::Arc;

use surfbridge_core::{Error, Extent, PixelLayout, Plane, SurfaceHandle};
use tracing::debug;

use super::{
    Dispatch, KernelKind, KernelState, int_arg, require_capacity, require_surface, run_chained,
};
use crate::args::{ArgKind, ArgList};
use crate::env::{ComputeBuffer, ComputeEnvironment};
use crate::geometry::WorkSize;
use crate::handoff::InferenceInput;
use crate::program::{KernelProgram, NativeKernel};
use crate::shaders::RGBA_TO_RGB;
use crate::{ComputeError, ComputeResult};

/// Channel multiplier applied on top of the 0..255 expansion.
pub const DEFAULT_SCALE: f32 = 1.0;

// convertRGBAToRGBfloat(src, rgb, cols, rows, scale)
const SIGNATURE: [ArgKind; 5] = [
    ArgKind::SharedSurface,
    ArgKind::Buffer,
    ArgKind::Int,
    ArgKind::Int,
    ArgKind::Float,
];

#[derive(Debug)]
pub struct SourceRepack {
    env: Arc<ComputeEnvironment>,
    kernel: NativeKernel,
    args: ArgList,
    work: WorkSize,
    /// Held until the next configuration; the kernel argument points into it.
    output: Option<(Arc<ComputeBuffer>, Extent)>,
    preferred_local: usize,
    state: KernelState,
}

impl SourceRepack {
    pub(crate) fn create(program: &Arc<KernelProgram>, preferred_local: usize) -> ComputeResult<Self> {
        let kernel = program.create_kernel(RGBA_TO_RGB)?;
        Ok(Self {
            env: Arc::clone(program.env()),
            kernel,
            args: ArgList::new(&SIGNATURE),
            work: WorkSize::new(0, 0, preferred_local),
            output: None,
            preferred_local,
            state: KernelState::Unconfigured,
        })
    }

    /// Repack `rgba` into `rgb` with [`DEFAULT_SCALE`].
    pub fn set_arguments(
        &mut self,
        rgba: SurfaceHandle,
        rgb: &Arc<ComputeBuffer>,
        extent: Extent,
    ) -> ComputeResult<()> {
        self.set_arguments_scaled(rgba, rgb, extent, DEFAULT_SCALE)
    }

    /// Repack `rgba` into `rgb`, multiplying every channel by `scale`.
    pub fn set_arguments_scaled(
        &mut self,
        rgba: SurfaceHandle,
        rgb: &Arc<ComputeBuffer>,
        extent: Extent,
        scale: f32,
    ) -> ComputeResult<()> {
        require_surface("rgba", rgba)?;
        extent.require_even()?;
        require_capacity(rgb, PixelLayout::RgbPlanarF32.frame_bytes(extent))?;
        if !scale.is_finite() {
            return Err(Error::InvalidParameter {
                name: "scale",
                value: 0,
                reason: "must be finite",
            }
            .into());
        }
        let cols = int_arg("cols", extent.width.into())?;
        let rows = int_arg("rows", extent.height.into())?;

        let src = self.env.create_shared_surface(rgba, Plane::Luma, true)?;

        let mut args = ArgList::new(&SIGNATURE);
        args.set_surface(0, src)?;
        args.set_buffer(1, rgb.mem())?;
        args.set_int(2, cols)?;
        args.set_int(3, rows)?;
        args.set_float(4, scale)?;

        self.args = args;
        self.work = WorkSize::for_extent(extent.chroma(), self.preferred_local);
        self.output = Some((Arc::clone(rgb), extent));
        self.state = KernelState::Configured;
        debug!(width = extent.width, height = extent.height, scale, "configured source repack");
        Ok(())
    }

    pub fn run(&mut self) -> ComputeResult<()> {
        if self.state == KernelState::Unconfigured {
            return Err(ComputeError::NotConfigured(KernelKind::SourceRepack.name()));
        }
        run_chained(
            &self.env,
            &[Dispatch {
                kernel: &self.kernel,
                args: &self.args,
                work: self.work,
            }],
        )?;
        self.state = KernelState::Executed;
        Ok(())
    }

    /// The filled buffer as inference input. Valid after a successful run.
    pub fn handoff(&self) -> ComputeResult<InferenceInput<'_>> {
        match (self.state, &self.output) {
            (KernelState::Executed, Some((rgb, extent))) => Ok(InferenceInput::ComputeBuffer {
                mem: rgb.mem(),
                layout: PixelLayout::RgbPlanarF32,
                extent: *extent,
            }),
            _ => Err(ComputeError::NotConfigured(KernelKind::SourceRepack.name())),
        }
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn work(&self) -> WorkSize {
        self.work
    }

    pub fn args(&self) -> &ArgList {
        &self.args
    }

    pub fn kernel(&self) -> &NativeKernel {
        &self.kernel
    }
}
