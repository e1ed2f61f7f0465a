//! Zero-copy surface sharing between a graphics device and a compute runtime.
//!
//! Graphics textures are imported once into compute memory, acquired around
//! every kernel dispatch and released back to the graphics API before the
//! frame is presented. On top of that sit a small set of format-conversion
//! kernels feeding an external inference step.
//!
//! # Architecture
//!
//! ```text
//! InteropRuntime (platform candidates)
//!     └── ComputeEnvironment (device, context, queue, surface registry)
//!             └── FilterStore (one compiled program)
//!                     └── FilterKernel
//!                             ├── FormatConversion  (NV12 <-> RGB float planes)
//!                             ├── BorderPad         (replicate-edge padding, luma + chroma)
//!                             └── SourceRepack      (RGBA texture -> RGB float planes)
//!
//! ComputeDriver trait (every native call)
//!     ├── RecordingDriver  (in-memory, always available)
//!     └── OpenClDriver     (OpenCL + D3D11 sharing, feature `opencl`)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use surfbridge_compute::{Backend, Extent, FilterStore, InteropRuntime, KernelKind, RuntimeConfig};
//!
//! let driver = surfbridge_compute::create_driver(Backend::OpenCl)?;
//! let runtime = InteropRuntime::discover(driver, &RuntimeConfig::default())?;
//! let env = runtime.environment_for(graphics_device)?;
//!
//! let store = FilterStore::with_default_kernels(env.clone())?;
//! let mut pad = store.create(KernelKind::BorderPad)?;
//! if let Some(border) = pad.as_border_pad_mut() {
//!     border.set_arguments(src, dst, Extent::new(640, 480), 16)?;
//! }
//! pad.run()?;
//! ```

pub mod args;
pub mod backend;
pub mod env;
pub mod geometry;
pub mod handoff;
pub mod kernels;
pub mod pipeline;
pub mod program;
pub mod registry;
pub mod runtime;
pub mod shaders;
pub mod store;
pub mod sync;

pub use args::{ArgKind, ArgList, KernelArg};
pub use backend::{
    Backend, ComputeDriver, RecordingDriver, create_driver, describe_backends, detect_backends,
};
pub use env::{ComputeBuffer, ComputeEnvironment, DeviceClass, InteropPlatform, QueueSession};
pub use geometry::{PREFERRED_LOCAL_SIZE, WorkSize, choose_local_size};
pub use handoff::{InferenceAdapter, InferenceInput};
pub use kernels::{
    BorderPad, ConversionDirection, FilterKernel, FormatConversion, KernelKind, KernelState,
    SourceRepack,
};
pub use pipeline::FilterChain;
pub use program::{KernelProgram, NativeKernel};
pub use registry::SurfaceRegistry;
pub use runtime::{InteropRuntime, RuntimeConfig};
pub use store::{FilterStore, StoreConfig};
pub use sync::{Event, SurfaceLease};

#[cfg(feature = "opencl")]
pub use backend::OpenClDriver;

pub use surfbridge_core::{
    Extent, GraphicsDevice, MemAccess, PixelLayout, Plane, SharedSurfaceKey, SurfaceHandle,
};

use thiserror::Error;

/// Interop and kernel execution errors.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("platform discovery failed: {0}")]
    PlatformDiscoveryFailed(String),

    #[error("platform `{platform}` does not export `{function}`")]
    ExtensionUnavailable { platform: String, function: String },

    #[error("no compute device for graphics device: {0}")]
    DeviceBindingFailed(String),

    #[error("failed to import {surface}: {reason}")]
    SurfaceImportFailed { surface: String, reason: String },

    #[error("program build failed:\n{log}")]
    Compile { log: String },

    #[error("failed to create kernel `{name}`: {reason}")]
    KernelCreateFailed { name: String, reason: String },

    #[error("unknown kernel `{0}`")]
    UnknownKernel(String),

    #[error("failed to bind argument {index}: {reason}")]
    ArgumentBindFailed { index: u32, reason: String },

    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("synchronization failed: {0}")]
    SyncFailed(String),

    #[error("failed to create buffer: {0}")]
    BufferCreateFailed(String),

    #[error("kernel `{0}` has no arguments set")]
    NotConfigured(&'static str),

    #[error(transparent)]
    InvalidArgument(#[from] surfbridge_core::Error),

    #[error("backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("stage {index} ({kernel}) failed")]
    StageFailed {
        index: usize,
        kernel: &'static str,
        #[source]
        source: Box<ComputeError>,
    },
}

pub type ComputeResult<T> = Result<T, ComputeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_converts() {
        let core = surfbridge_core::Error::dimensions(0, 480, "zero dimension");
        let err: ComputeError = core.into();
        assert!(matches!(err, ComputeError::InvalidArgument(_)));
        assert!(err.to_string().contains("0x480"));
    }

    #[test]
    fn test_stage_failure_keeps_source() {
        let err = ComputeError::StageFailed {
            index: 1,
            kernel: "copyMakeBorder",
            source: Box::new(ComputeError::DispatchFailed("-54".into())),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("dispatch failed: -54"));
    }
}
