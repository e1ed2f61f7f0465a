//! NV12 <-> planar RGB float conversion.
//!
//! Both directions share one argument layout, `(Y, UV, rgb, cols,
//! channel_size)`, and one work item per 2x2 luma block, so the dispatch
//! covers the chroma extent. Runs use the blocking acquire/release form.

use std::sync::Arc;

use surfbridge_core::{Extent, PixelLayout, Plane, SurfaceHandle};
use tracing::debug;

use super::{
    Dispatch, KernelKind, KernelState, int_arg, require_capacity, require_surface, run_blocking,
};
use crate::args::{ArgKind, ArgList};
use crate::env::{ComputeBuffer, ComputeEnvironment};
use crate::geometry::WorkSize;
use crate::handoff::InferenceInput;
use crate::program::{KernelProgram, NativeKernel};
use crate::shaders::{NV12_TO_RGB, RGB_TO_NV12};
use crate::{ComputeError, ComputeResult};

const SIGNATURE: [ArgKind; 5] = [
    ArgKind::SharedSurface,
    ArgKind::SharedSurface,
    ArgKind::Buffer,
    ArgKind::Int,
    ArgKind::Int,
];

/// Which entry point the next run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConversionDirection {
    #[default]
    Nv12ToRgb,
    RgbToNv12,
}

/// Output of the last configuration.
#[derive(Debug, Clone, Copy)]
enum Target {
    Buffer,
    Surface(SurfaceHandle),
}

#[derive(Debug)]
pub struct FormatConversion {
    env: Arc<ComputeEnvironment>,
    to_rgb: NativeKernel,
    to_nv12: NativeKernel,
    args: ArgList,
    direction: ConversionDirection,
    work: WorkSize,
    extent: Extent,
    target: Option<Target>,
    /// Bound as argument 2 in both directions; held until the next
    /// configuration so a run never sees freed memory.
    rgb: Option<Arc<ComputeBuffer>>,
    preferred_local: usize,
    state: KernelState,
}

impl FormatConversion {
    pub(crate) fn create(program: &Arc<KernelProgram>, preferred_local: usize) -> ComputeResult<Self> {
        let to_rgb = program.create_kernel(NV12_TO_RGB)?;
        let to_nv12 = program.create_kernel(RGB_TO_NV12)?;
        Ok(Self {
            env: Arc::clone(program.env()),
            to_rgb,
            to_nv12,
            args: ArgList::new(&SIGNATURE),
            direction: ConversionDirection::default(),
            work: WorkSize::new(0, 0, preferred_local),
            extent: Extent::default(),
            target: None,
            rgb: None,
            preferred_local,
            state: KernelState::Unconfigured,
        })
    }

    /// Convert the NV12 surface `nv12` into three float planes in `rgb`.
    pub fn set_arguments_nv12_to_rgb(
        &mut self,
        nv12: SurfaceHandle,
        rgb: &Arc<ComputeBuffer>,
        extent: Extent,
    ) -> ComputeResult<()> {
        self.configure(nv12, rgb, extent, ConversionDirection::Nv12ToRgb)
    }

    /// Convert three float planes in `rgb` into the NV12 surface `nv12`.
    pub fn set_arguments_rgb_to_nv12(
        &mut self,
        rgb: &Arc<ComputeBuffer>,
        nv12: SurfaceHandle,
        extent: Extent,
    ) -> ComputeResult<()> {
        self.configure(nv12, rgb, extent, ConversionDirection::RgbToNv12)
    }

    fn configure(
        &mut self,
        nv12: SurfaceHandle,
        rgb: &Arc<ComputeBuffer>,
        extent: Extent,
        direction: ConversionDirection,
    ) -> ComputeResult<()> {
        require_surface("nv12", nv12)?;
        extent.require_even()?;
        require_capacity(rgb, PixelLayout::RgbPlanarF32.frame_bytes(extent))?;
        let cols = int_arg("cols", extent.width.into())?;
        let channel_size = int_arg("channel_size", PixelLayout::RgbPlanarF32.plane_stride(extent))?;

        let read_only = direction == ConversionDirection::Nv12ToRgb;
        let y = self.env.create_shared_surface(nv12, Plane::Luma, read_only)?;
        let uv = self.env.create_shared_surface(nv12, Plane::Chroma, read_only)?;

        let mut args = ArgList::new(&SIGNATURE);
        args.set_surface(0, y)?;
        args.set_surface(1, uv)?;
        args.set_buffer(2, rgb.mem())?;
        args.set_int(3, cols)?;
        args.set_int(4, channel_size)?;

        self.args = args;
        self.direction = direction;
        self.extent = extent;
        self.work = WorkSize::for_extent(extent.chroma(), self.preferred_local);
        self.target = Some(match direction {
            ConversionDirection::Nv12ToRgb => Target::Buffer,
            ConversionDirection::RgbToNv12 => Target::Surface(nv12),
        });
        self.rgb = Some(Arc::clone(rgb));
        self.state = KernelState::Configured;
        debug!(width = extent.width, height = extent.height, ?direction, "configured format conversion");
        Ok(())
    }

    pub fn run(&mut self) -> ComputeResult<()> {
        if self.state == KernelState::Unconfigured {
            return Err(ComputeError::NotConfigured(KernelKind::FormatConversion.name()));
        }
        let kernel = match self.direction {
            ConversionDirection::Nv12ToRgb => &self.to_rgb,
            ConversionDirection::RgbToNv12 => &self.to_nv12,
        };
        run_blocking(
            &self.env,
            &Dispatch {
                kernel,
                args: &self.args,
                work: self.work,
            },
        )?;
        self.state = KernelState::Executed;
        Ok(())
    }

    /// Output of the last successful run, for the inference step.
    ///
    /// The buffer stays alive while the input borrows the filter. A surface
    /// output is owned by the caller.
    pub fn handoff(&self) -> ComputeResult<InferenceInput<'_>> {
        if self.state != KernelState::Executed {
            return Err(ComputeError::NotConfigured(KernelKind::FormatConversion.name()));
        }
        match (self.target, &self.rgb) {
            (Some(Target::Buffer), Some(rgb)) => Ok(InferenceInput::ComputeBuffer {
                mem: rgb.mem(),
                layout: PixelLayout::RgbPlanarF32,
                extent: self.extent,
            }),
            (Some(Target::Surface(surface)), _) => Ok(InferenceInput::SharedSurface {
                surface,
                layout: PixelLayout::Nv12,
                extent: self.extent,
            }),
            _ => Err(ComputeError::NotConfigured(KernelKind::FormatConversion.name())),
        }
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn direction(&self) -> ConversionDirection {
        self.direction
    }

    pub fn work(&self) -> WorkSize {
        self.work
    }

    pub fn args(&self) -> &ArgList {
        &self.args
    }

    /// Entry point the next run dispatches.
    pub fn active_kernel(&self) -> &NativeKernel {
        match self.direction {
            ConversionDirection::Nv12ToRgb => &self.to_rgb,
            ConversionDirection::RgbToNv12 => &self.to_nv12,
        }
    }
}
