//! Replicate-edge border padding of NV12 surfaces.
//!
//! The same entry point runs twice per frame, once on the luma planes and
//! once on the chroma planes at half width, height and border. Both
//! dispatches depend only on the acquire, so the device may overlap them.

use std::sync::Arc;

use surfbridge_core::{Error, Extent, Plane, SurfaceHandle, extent::chroma_border};
use tracing::debug;

use super::{Dispatch, KernelKind, KernelState, int_arg, require_surface, run_chained};
use crate::args::{ArgKind, ArgList};
use crate::env::ComputeEnvironment;
use crate::geometry::WorkSize;
use crate::program::{KernelProgram, NativeKernel};
use crate::shaders::COPY_MAKE_BORDER;
use crate::{ComputeError, ComputeResult};

// copyMakeBorder(src, dst, rows, cols, border)
const SIGNATURE: [ArgKind; 5] = [
    ArgKind::SharedSurface,
    ArgKind::SharedSurface,
    ArgKind::Int,
    ArgKind::Int,
    ArgKind::Int,
];

#[derive(Debug)]
pub struct BorderPad {
    env: Arc<ComputeEnvironment>,
    luma: NativeKernel,
    chroma: NativeKernel,
    luma_args: ArgList,
    chroma_args: ArgList,
    luma_work: WorkSize,
    chroma_work: WorkSize,
    preferred_local: usize,
    state: KernelState,
}

impl BorderPad {
    pub(crate) fn create(program: &Arc<KernelProgram>, preferred_local: usize) -> ComputeResult<Self> {
        let luma = program.create_kernel(COPY_MAKE_BORDER)?;
        let chroma = program.create_kernel(COPY_MAKE_BORDER)?;
        Ok(Self {
            env: Arc::clone(program.env()),
            luma,
            chroma,
            luma_args: ArgList::new(&SIGNATURE),
            chroma_args: ArgList::new(&SIGNATURE),
            luma_work: WorkSize::new(0, 0, preferred_local),
            chroma_work: WorkSize::new(0, 0, preferred_local),
            preferred_local,
            state: KernelState::Unconfigured,
        })
    }

    /// Pad `src` (`extent`) into `dst` (`extent` + `border` on every side).
    ///
    /// `extent` must be even and non-empty, `border` even and non-zero.
    pub fn set_arguments(
        &mut self,
        src: SurfaceHandle,
        dst: SurfaceHandle,
        extent: Extent,
        border: u32,
    ) -> ComputeResult<()> {
        require_surface("src", src)?;
        require_surface("dst", dst)?;
        extent.require_even()?;
        if border == 0 || border % 2 != 0 {
            return Err(Error::InvalidParameter {
                name: "border",
                value: i64::from(border),
                reason: "must be even and non-zero",
            }
            .into());
        }

        let env = &self.env;
        let src_y = env.create_shared_surface(src, Plane::Luma, true)?;
        let src_uv = env.create_shared_surface(src, Plane::Chroma, true)?;
        let dst_y = env.create_shared_surface(dst, Plane::Luma, false)?;
        let dst_uv = env.create_shared_surface(dst, Plane::Chroma, false)?;

        let chroma = extent.chroma();
        let mut luma_args = ArgList::new(&SIGNATURE);
        luma_args.set_surface(0, src_y)?;
        luma_args.set_surface(1, dst_y)?;
        luma_args.set_int(2, int_arg("rows", extent.height.into())?)?;
        luma_args.set_int(3, int_arg("cols", extent.width.into())?)?;
        luma_args.set_int(4, int_arg("border", border.into())?)?;

        let mut chroma_args = ArgList::new(&SIGNATURE);
        chroma_args.set_surface(0, src_uv)?;
        chroma_args.set_surface(1, dst_uv)?;
        chroma_args.set_int(2, int_arg("rows", chroma.height.into())?)?;
        chroma_args.set_int(3, int_arg("cols", chroma.width.into())?)?;
        chroma_args.set_int(4, int_arg("border", chroma_border(border).into())?)?;

        self.luma_args = luma_args;
        self.chroma_args = chroma_args;
        self.luma_work = WorkSize::for_extent(extent, self.preferred_local);
        self.chroma_work = WorkSize::for_extent(chroma, self.preferred_local);
        self.state = KernelState::Configured;
        debug!(width = extent.width, height = extent.height, border, "configured border pad");
        Ok(())
    }

    pub fn run(&mut self) -> ComputeResult<()> {
        if self.state == KernelState::Unconfigured {
            return Err(ComputeError::NotConfigured(KernelKind::BorderPad.name()));
        }
        run_chained(
            &self.env,
            &[
                Dispatch {
                    kernel: &self.luma,
                    args: &self.luma_args,
                    work: self.luma_work,
                },
                Dispatch {
                    kernel: &self.chroma,
                    args: &self.chroma_args,
                    work: self.chroma_work,
                },
            ],
        )?;
        self.state = KernelState::Executed;
        Ok(())
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn luma_work(&self) -> WorkSize {
        self.luma_work
    }

    pub fn chroma_work(&self) -> WorkSize {
        self.chroma_work
    }

    pub fn luma_args(&self) -> &ArgList {
        &self.luma_args
    }

    pub fn chroma_args(&self) -> &ArgList {
        &self.chroma_args
    }

    /// Native kernels (luma, chroma).
    pub fn kernels(&self) -> (&NativeKernel, &NativeKernel) {
        (&self.luma, &self.chroma)
    }
}
