//! Native compute drivers.
//!
//! Every call that touches the compute runtime goes through [`ComputeDriver`].
//! The rest of the crate only sees opaque handle newtypes, so the same
//! environment/kernel code runs on the real OpenCL driver and on the
//! in-memory [`RecordingDriver`].
//!
//! # Architecture
//!
//! ```text
//! ComputeEnvironment / KernelProgram / FilterKernel
//!     └── Arc<dyn ComputeDriver>
//!             +-- RecordingDriver (deterministic, records calls)
//!             +-- OpenClDriver    (OpenCL + cl_khr_d3d11_sharing)
//! ```
//!
//! Drivers report failures with the final error variant for the call
//! (`SyncFailed` for acquire/release, `DispatchFailed` for kernel launches,
//! ...). Callers only remap where a higher-level operation owns the failure,
//! e.g. device binding.
//!
//! # Handle ownership
//!
//! Handles cannot be built outside this crate:
//!
//! ```compile_fail
//! let forged = surfbridge_compute::backend::MemId::from_raw(0x10);
//! ```
//!
//! and releasing one is `unsafe`, since the RAII owner would release it
//! again on drop:
//!
//! ```compile_fail
//! use surfbridge_compute::{ComputeBuffer, ComputeDriver};
//!
//! fn free_early(driver: &dyn ComputeDriver, buffer: &ComputeBuffer) {
//!     driver.release_mem(buffer.mem());
//! }
//! ```

mod detect;
mod recording;

#[cfg(feature = "opencl")]
mod opencl_backend;

#[cfg(all(feature = "opencl", target_os = "windows"))]
pub mod d3d11;

pub use detect::{BackendInfo, describe_backends, detect_backends};
pub use recording::{DriverCall, Fault, MockPlatform, RecordingDriver};

#[cfg(feature = "opencl")]
pub use opencl_backend::OpenClDriver;

use std::ffi::c_void;
use std::sync::Arc;

use surfbridge_core::{GraphicsDevice, MemAccess, Plane, SurfaceHandle};

use crate::geometry::WorkSize;
use crate::{ComputeError, ComputeResult};

// =============================================================================
// Handles
// =============================================================================

macro_rules! native_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(usize);

            impl $name {
                /// Wrap a native pointer.
                #[cfg_attr(not(feature = "opencl"), allow(dead_code))]
                pub(crate) fn from_ptr(ptr: *mut c_void) -> Self {
                    Self(ptr as usize)
                }

                /// Wrap a numeric id.
                pub(crate) const fn from_raw(raw: usize) -> Self {
                    Self(raw)
                }

                /// Native pointer.
                pub fn as_ptr(&self) -> *mut c_void {
                    self.0 as *mut c_void
                }

                /// Numeric id.
                pub const fn raw(&self) -> usize {
                    self.0
                }
            }
        )*
    };
}

native_handle! {
    /// Compute platform (`cl_platform_id`).
    PlatformId;
    /// Compute device (`cl_device_id`).
    DeviceId;
    /// Compute context (`cl_context`).
    ContextId;
    /// In-order command queue (`cl_command_queue`).
    QueueId;
    /// Memory object, imported surface plane or plain buffer (`cl_mem`).
    MemId;
    /// Compiled program (`cl_program`).
    ProgramId;
    /// Kernel object (`cl_kernel`).
    KernelId;
    /// Completion event (`cl_event`).
    EventId;
}

/// A platform as reported by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub id: PlatformId,
    pub name: String,
    pub vendor: String,
    /// Number of GPU devices exposed by the platform.
    pub gpu_devices: u32,
}

/// Scalar or memory value handed to `set_kernel_arg`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue {
    Int(i32),
    Float(f32),
    Mem(MemId),
}

impl ArgValue {
    /// Bytes passed to the native call (`arg_size`, `arg_value`).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Int(v) => bytemuck::bytes_of(v),
            Self::Float(v) => bytemuck::bytes_of(v),
            Self::Mem(mem) => bytemuck::bytes_of(&mem.0),
        }
    }
}

// =============================================================================
// Driver trait
// =============================================================================

/// The native compute API.
///
/// Handles returned by `create_*`/`import_*`/`enqueue_*` are owned by the
/// caller and must be handed back to the matching `release_*`. Handles can
/// only be minted inside this crate, and the RAII owners ([`Event`],
/// [`ComputeBuffer`], [`KernelProgram`], [`NativeKernel`],
/// [`ComputeEnvironment`]) are the only callers of the release methods.
///
/// [`Event`]: crate::Event
/// [`ComputeBuffer`]: crate::ComputeBuffer
/// [`KernelProgram`]: crate::KernelProgram
/// [`NativeKernel`]: crate::NativeKernel
/// [`ComputeEnvironment`]: crate::ComputeEnvironment
pub trait ComputeDriver: Send + Sync + std::fmt::Debug {
    /// Driver name for logs.
    fn name(&self) -> &'static str;

    /// Enumerate platforms.
    fn platforms(&self) -> ComputeResult<Vec<PlatformInfo>>;

    /// Resolve the four D3D11 sharing entry points of `platform`.
    fn resolve_interop(&self, platform: PlatformId) -> ComputeResult<()>;

    /// Preferred compute device for a graphics device.
    fn device_for_graphics(
        &self,
        platform: PlatformId,
        graphics: GraphicsDevice,
    ) -> ComputeResult<DeviceId>;

    /// Context holding exactly `device`, shared with `graphics`.
    fn create_context(
        &self,
        platform: PlatformId,
        device: DeviceId,
        graphics: GraphicsDevice,
    ) -> ComputeResult<ContextId>;

    /// In-order command queue on `device`.
    fn create_queue(&self, context: ContextId, device: DeviceId) -> ComputeResult<QueueId>;

    /// True when the device shares memory with the host (integrated GPU).
    fn host_unified_memory(&self, device: DeviceId) -> ComputeResult<bool>;

    /// Import one plane of a graphics texture.
    fn import_surface(
        &self,
        platform: PlatformId,
        context: ContextId,
        surface: SurfaceHandle,
        plane: Plane,
        access: MemAccess,
    ) -> ComputeResult<MemId>;

    /// Plain device buffer.
    fn create_buffer(&self, context: ContextId, bytes: usize, access: MemAccess)
    -> ComputeResult<MemId>;

    /// Compile and link `source` for `device`.
    fn build_program(
        &self,
        context: ContextId,
        device: DeviceId,
        source: &str,
        options: &str,
    ) -> ComputeResult<ProgramId>;

    fn create_kernel(&self, program: ProgramId, name: &str) -> ComputeResult<KernelId>;

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, value: &ArgValue) -> ComputeResult<()>;

    /// Hand shared surfaces to the compute API.
    fn enqueue_acquire(
        &self,
        platform: PlatformId,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId>;

    /// Hand shared surfaces back to the graphics API.
    fn enqueue_release(
        &self,
        platform: PlatformId,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId>;

    /// 2-D ND-range launch.
    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        work: &WorkSize,
        wait: &[EventId],
    ) -> ComputeResult<EventId>;

    fn flush(&self, queue: QueueId) -> ComputeResult<()>;

    fn finish(&self, queue: QueueId) -> ComputeResult<()>;

    fn wait_for_events(&self, events: &[EventId]) -> ComputeResult<()>;

    /// Drop one reference to `event`.
    ///
    /// # Safety
    ///
    /// `event` must have come from this driver, must not have been released
    /// already, and must not be used afterwards. The same contract holds for
    /// every `release_*` method below.
    unsafe fn release_event(&self, event: EventId);
    /// # Safety
    ///
    /// See [`release_event`](Self::release_event). No queued command may
    /// still reference `mem`.
    unsafe fn release_mem(&self, mem: MemId);
    /// # Safety
    ///
    /// See [`release_event`](Self::release_event).
    unsafe fn release_kernel(&self, kernel: KernelId);
    /// # Safety
    ///
    /// See [`release_event`](Self::release_event). Kernels created from
    /// `program` must be released first.
    unsafe fn release_program(&self, program: ProgramId);
    /// # Safety
    ///
    /// See [`release_event`](Self::release_event).
    unsafe fn release_queue(&self, queue: QueueId);
    /// # Safety
    ///
    /// See [`release_event`](Self::release_event). The context's queue and
    /// memory objects must be released first.
    unsafe fn release_context(&self, context: ContextId);
}

// =============================================================================
// Backend selection
// =============================================================================

/// Available drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// In-memory recording driver.
    #[default]
    Recording,
    /// OpenCL with D3D11 sharing.
    OpenCl,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Recording => true,
            #[cfg(feature = "opencl")]
            Self::OpenCl => OpenClDriver::is_available(),
            #[cfg(not(feature = "opencl"))]
            Self::OpenCl => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::OpenCl => "opencl",
        }
    }
}

/// Instantiate the driver for `backend`.
pub fn create_driver(backend: Backend) -> ComputeResult<Arc<dyn ComputeDriver>> {
    match backend {
        Backend::Recording => Ok(Arc::new(RecordingDriver::new())),
        #[cfg(feature = "opencl")]
        Backend::OpenCl => Ok(Arc::new(OpenClDriver::new()?)),
        #[cfg(not(feature = "opencl"))]
        Backend::OpenCl => Err(ComputeError::BackendNotAvailable(
            "built without the `opencl` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_bytes_match_native_sizes() {
        assert_eq!(ArgValue::Int(640).as_bytes(), 640i32.to_ne_bytes());
        assert_eq!(ArgValue::Float(0.5).as_bytes(), 0.5f32.to_ne_bytes());
        assert_eq!(
            ArgValue::Mem(MemId::from_raw(7)).as_bytes().len(),
            std::mem::size_of::<*mut c_void>()
        );
    }

    #[test]
    fn test_handle_pointer_identity() {
        let id = EventId::from_raw(0x40);
        assert_eq!(EventId::from_ptr(id.as_ptr()), id);
        assert_eq!(id.raw(), 0x40);
    }

    #[test]
    fn test_recording_backend_always_created() {
        assert!(Backend::Recording.is_available());
        let driver = create_driver(Backend::Recording).unwrap();
        assert_eq!(driver.name(), "recording");
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_opencl_needs_feature() {
        assert!(!Backend::OpenCl.is_available());
        assert!(matches!(
            create_driver(Backend::OpenCl),
            Err(ComputeError::BackendNotAvailable(_))
        ));
    }
}
