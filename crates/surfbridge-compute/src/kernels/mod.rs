//! Filter kernels.
//!
//! Every filter follows the same state machine:
//!
//! ```text
//! Unconfigured --set_arguments--> Configured --run--> Executed
//!                                     ^                   |
//!                                     +---set_arguments---+
//! ```
//!
//! `run` is allowed from `Configured` and `Executed` (re-running the last
//! configuration). A failed `set_arguments` or `run` leaves the state and the
//! bound values as they were.

mod border;
mod convert;
mod repack;

pub use border::BorderPad;
pub use convert::{ConversionDirection, FormatConversion};
pub use repack::{DEFAULT_SCALE, SourceRepack};

use surfbridge_core::{Error, SurfaceHandle};
use tracing::trace;

use crate::args::ArgList;
use crate::env::{ComputeBuffer, ComputeEnvironment};
use crate::geometry::WorkSize;
use crate::program::NativeKernel;
use crate::sync::Event;
use crate::ComputeResult;

/// Configuration state of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelState {
    #[default]
    Unconfigured,
    Configured,
    Executed,
}

/// Filter names understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    FormatConversion,
    BorderPad,
    SourceRepack,
}

impl KernelKind {
    pub const ALL: [KernelKind; 3] = [Self::FormatConversion, Self::BorderPad, Self::SourceRepack];

    /// Store name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FormatConversion => "fmtConversion",
            Self::BorderPad => "copyMakeBorder",
            Self::SourceRepack => "srcConversion",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for KernelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A filter instance.
#[derive(Debug)]
pub enum FilterKernel {
    FormatConversion(FormatConversion),
    BorderPad(BorderPad),
    SourceRepack(SourceRepack),
}

impl FilterKernel {
    pub fn kind(&self) -> KernelKind {
        match self {
            Self::FormatConversion(_) => KernelKind::FormatConversion,
            Self::BorderPad(_) => KernelKind::BorderPad,
            Self::SourceRepack(_) => KernelKind::SourceRepack,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    pub fn state(&self) -> KernelState {
        match self {
            Self::FormatConversion(k) => k.state(),
            Self::BorderPad(k) => k.state(),
            Self::SourceRepack(k) => k.state(),
        }
    }

    /// Acquire, dispatch, release and wait.
    pub fn run(&mut self) -> ComputeResult<()> {
        match self {
            Self::FormatConversion(k) => k.run(),
            Self::BorderPad(k) => k.run(),
            Self::SourceRepack(k) => k.run(),
        }
    }

    pub fn as_format_conversion_mut(&mut self) -> Option<&mut FormatConversion> {
        match self {
            Self::FormatConversion(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_border_pad_mut(&mut self) -> Option<&mut BorderPad> {
        match self {
            Self::BorderPad(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_source_repack_mut(&mut self) -> Option<&mut SourceRepack> {
        match self {
            Self::SourceRepack(k) => Some(k),
            _ => None,
        }
    }
}

impl From<FormatConversion> for FilterKernel {
    fn from(k: FormatConversion) -> Self {
        Self::FormatConversion(k)
    }
}

impl From<BorderPad> for FilterKernel {
    fn from(k: BorderPad) -> Self {
        Self::BorderPad(k)
    }
}

impl From<SourceRepack> for FilterKernel {
    fn from(k: SourceRepack) -> Self {
        Self::SourceRepack(k)
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// One dispatch of a run.
pub(crate) struct Dispatch<'a> {
    pub kernel: &'a NativeKernel,
    pub args: &'a ArgList,
    pub work: WorkSize,
}

fn shared_surfaces(dispatches: &[Dispatch<'_>]) -> Vec<crate::backend::MemId> {
    let mut mems = Vec::new();
    for d in dispatches {
        for mem in d.args.shared_surfaces() {
            if !mems.contains(&mem) {
                mems.push(mem);
            }
        }
    }
    mems
}

/// Chaining form: one acquire, every dispatch waits only on the acquire,
/// one release waits on every dispatch, then flush and wait for the release.
pub(crate) fn run_chained(env: &ComputeEnvironment, dispatches: &[Dispatch<'_>]) -> ComputeResult<()> {
    for d in dispatches {
        d.args.bind(d.kernel)?;
    }
    let mems = shared_surfaces(dispatches);

    let session = env.session();
    let lease = session.acquire(&mems, &[])?;
    let mut done: Vec<Event> = Vec::with_capacity(dispatches.len());
    for d in dispatches {
        done.push(session.dispatch(d.kernel, &d.work, &[lease.acquire_event()])?);
    }
    let waits: Vec<&Event> = done.iter().collect();
    let released = session.release(lease, &waits)?;
    session.flush()?;
    released.wait()?;
    trace!(dispatches = dispatches.len(), surfaces = mems.len(), "chain complete");
    Ok(())
}

/// Blocking form: acquire and drain, dispatch, release and drain.
pub(crate) fn run_blocking(env: &ComputeEnvironment, dispatch: &Dispatch<'_>) -> ComputeResult<()> {
    dispatch.args.bind(dispatch.kernel)?;
    let mems = dispatch.args.shared_surfaces();

    let session = env.session();
    let lease = session.acquire_blocking(&mems)?;
    let _done = session.dispatch(dispatch.kernel, &dispatch.work, &[])?;
    session.release_blocking(lease, &[])
}

pub(crate) fn require_surface(name: &'static str, surface: SurfaceHandle) -> Result<(), Error> {
    if surface.is_null() {
        return Err(Error::InvalidParameter {
            name,
            value: 0,
            reason: "null surface",
        });
    }
    Ok(())
}

pub(crate) fn int_arg(name: &'static str, value: u64) -> Result<i32, Error> {
    i32::try_from(value).map_err(|_| Error::InvalidParameter {
        name,
        value: value as i64,
        reason: "does not fit a kernel int",
    })
}

/// Reject buffers smaller than `needed` bytes.
pub(crate) fn require_capacity(buffer: &ComputeBuffer, needed: u64) -> Result<(), Error> {
    if (buffer.len() as u64) < needed {
        return Err(Error::InvalidParameter {
            name: "buffer",
            value: buffer.len() as i64,
            reason: "smaller than the frame it must hold",
        });
    }
    Ok(())
}
