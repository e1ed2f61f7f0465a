//! Compute environment bound to one graphics device.
//!
//! # Lifecycle
//!
//! ```text
//! InteropPlatform::initialize(platform)      resolve sharing entry points
//!     └── bind_to_graphics_device(device)    device -> context -> queue
//!             └── ComputeEnvironment
//!                     ├── create_shared_surface()   import once, cache
//!                     ├── create_buffer()           plain device memory
//!                     └── session()                 exclusive queue access
//!                             acquire -> dispatch -> release -> wait
//! ```
//!
//! The surface registry lives behind the environment mutex. A
//! [`QueueSession`] holds that mutex for its whole lifetime, so acquire /
//! dispatch / release chains issued from different threads never interleave
//! on the shared queue.
//!
//! The mutex is not reentrant. While a session is open, calls that need the
//! registry ([`ComputeEnvironment::create_shared_surface`],
//! [`ComputeEnvironment::shared_surface_count`]) fail fast on the thread that
//! owns the session instead of blocking on themselves.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use surfbridge_core::{GraphicsDevice, MemAccess, Plane, SharedSurfaceKey, SurfaceHandle};
use tracing::{debug, info, trace};

use crate::backend::{ComputeDriver, ContextId, DeviceId, MemId, PlatformInfo, QueueId};
use crate::geometry::WorkSize;
use crate::program::NativeKernel;
use crate::registry::SurfaceRegistry;
use crate::sync::{Event, SurfaceLease, wait_list};
use crate::{ComputeError, ComputeResult};

// =============================================================================
// Platform
// =============================================================================

/// A platform whose D3D11 sharing entry points resolved.
#[derive(Debug, Clone)]
pub struct InteropPlatform {
    driver: Arc<dyn ComputeDriver>,
    info: PlatformInfo,
}

impl InteropPlatform {
    /// Resolve the sharing extension on `info`.
    ///
    /// `ExtensionUnavailable` means the platform cannot share surfaces with
    /// D3D11 and should be skipped.
    pub fn initialize(driver: Arc<dyn ComputeDriver>, info: PlatformInfo) -> ComputeResult<Self> {
        driver.resolve_interop(info.id)?;
        debug!(platform = %info.name, "resolved D3D11 sharing entry points");
        Ok(Self { driver, info })
    }

    pub fn info(&self) -> &PlatformInfo {
        &self.info
    }

    /// Create a context and queue on the compute device associated with
    /// `graphics`.
    ///
    /// Any failure is reported as `DeviceBindingFailed`; objects created
    /// before the failure are released.
    pub fn bind_to_graphics_device(&self, graphics: GraphicsDevice) -> ComputeResult<ComputeEnvironment> {
        let driver = &self.driver;
        let platform = self.info.id;

        let device = driver.device_for_graphics(platform, graphics).map_err(binding)?;
        let context = driver
            .create_context(platform, device, graphics)
            .map_err(binding)?;
        let queue = match driver.create_queue(context, device) {
            Ok(queue) => queue,
            Err(e) => {
                // SAFETY: created above, not shared yet.
                unsafe { driver.release_context(context) };
                return Err(binding(e));
            }
        };
        let unified = match driver.host_unified_memory(device) {
            Ok(unified) => unified,
            Err(e) => {
                // SAFETY: as above.
                unsafe {
                    driver.release_queue(queue);
                    driver.release_context(context);
                }
                return Err(binding(e));
            }
        };
        let device_class = DeviceClass::from_unified_memory(unified);

        info!(
            platform = %self.info.name,
            graphics = graphics.id(),
            class = %device_class,
            "bound compute environment"
        );

        Ok(ComputeEnvironment {
            driver: Arc::clone(driver),
            platform: self.info.clone(),
            graphics,
            device,
            context,
            queue,
            device_class,
            registry: Mutex::new(SurfaceRegistry::new()),
            session_thread: Mutex::new(None),
        })
    }
}

fn binding(err: ComputeError) -> ComputeError {
    match err {
        ComputeError::DeviceBindingFailed(_) => err,
        other => ComputeError::DeviceBindingFailed(other.to_string()),
    }
}

/// Integrated devices share memory with the host; discrete ones do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Integrated,
    Discrete,
}

impl DeviceClass {
    pub fn from_unified_memory(unified: bool) -> Self {
        if unified { Self::Integrated } else { Self::Discrete }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Integrated => "integrated",
            Self::Discrete => "discrete",
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Environment
// =============================================================================

/// One context, one device and one in-order queue, shared with a graphics
/// device.
#[derive(Debug)]
pub struct ComputeEnvironment {
    driver: Arc<dyn ComputeDriver>,
    platform: PlatformInfo,
    graphics: GraphicsDevice,
    device: DeviceId,
    context: ContextId,
    queue: QueueId,
    device_class: DeviceClass,
    registry: Mutex<SurfaceRegistry>,
    /// Thread currently holding a [`QueueSession`].
    session_thread: Mutex<Option<ThreadId>>,
}

impl ComputeEnvironment {
    pub fn driver(&self) -> &Arc<dyn ComputeDriver> {
        &self.driver
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn graphics_device(&self) -> GraphicsDevice {
        self.graphics
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device_class
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session_owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.session_thread.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True when the calling thread holds an open session.
    pub fn in_session(&self) -> bool {
        *self.session_owner() == Some(thread::current().id())
    }

    /// Registry lock for calls made outside a session.
    fn lock_outside_session(&self, call: &str) -> ComputeResult<MutexGuard<'_, SurfaceRegistry>> {
        if self.in_session() {
            return Err(ComputeError::SyncFailed(format!(
                "{} called while this thread holds a queue session",
                call
            )));
        }
        Ok(self.lock())
    }

    /// Compute view of `plane` of `surface`, imported on first use.
    pub fn create_shared_surface(
        &self,
        surface: SurfaceHandle,
        plane: Plane,
        read_only: bool,
    ) -> ComputeResult<MemId> {
        let access = MemAccess::from_read_only(read_only);
        let key = SharedSurfaceKey::new(surface, plane);
        self.lock_outside_session("create_shared_surface")?
            .get_or_import(key, access, || {
            self.driver
                .import_surface(self.platform.id, self.context, surface, plane, access)
        })
    }

    /// Number of distinct planes imported so far.
    ///
    /// Fails on a thread that holds an open session.
    pub fn shared_surface_count(&self) -> ComputeResult<usize> {
        Ok(self.lock_outside_session("shared_surface_count")?.len())
    }

    /// Plain device buffer of `bytes` bytes.
    pub fn create_buffer(&self, bytes: usize, access: MemAccess) -> ComputeResult<ComputeBuffer> {
        let mem = self.driver.create_buffer(self.context, bytes, access)?;
        debug!(bytes, ?access, "created compute buffer");
        Ok(ComputeBuffer {
            driver: Arc::clone(&self.driver),
            mem,
            bytes,
            access,
        })
    }

    /// Exclusive access to the queue until the session is dropped.
    ///
    /// Blocks while another thread holds a session. Import every surface
    /// before opening one: the registry stays locked for the session's
    /// lifetime, so [`create_shared_surface`](Self::create_shared_surface)
    /// from the same thread returns `SyncFailed`. Opening a second session
    /// on the same thread deadlocks.
    pub fn session(&self) -> QueueSession<'_> {
        let registry = self.lock();
        *self.session_owner() = Some(thread::current().id());
        QueueSession {
            env: self,
            _registry: registry,
        }
    }
}

impl Drop for ComputeEnvironment {
    fn drop(&mut self) {
        let mems = self.lock().drain();
        // SAFETY: filters and sessions borrow or hold the environment, so
        // nothing can reach these handles any more.
        unsafe {
            for mem in mems {
                self.driver.release_mem(mem);
            }
            self.driver.release_queue(self.queue);
            self.driver.release_context(self.context);
        }
        debug!(platform = %self.platform.name, "released compute environment");
    }
}

// =============================================================================
// Buffers
// =============================================================================

/// Plain device buffer, released on drop.
#[derive(Debug)]
pub struct ComputeBuffer {
    driver: Arc<dyn ComputeDriver>,
    mem: MemId,
    bytes: usize,
    access: MemAccess,
}

impl ComputeBuffer {
    pub fn mem(&self) -> MemId {
        self.mem
    }

    pub fn len(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn access(&self) -> MemAccess {
        self.access
    }
}

impl Drop for ComputeBuffer {
    fn drop(&mut self) {
        // SAFETY: the buffer owns its handle; filters that bind it hold an Arc.
        unsafe { self.driver.release_mem(self.mem) };
    }
}

// =============================================================================
// Queue session
// =============================================================================

/// Holds the environment mutex; every enqueue goes through here.
///
/// Two acquire/release forms are offered. The blocking form flushes and
/// finishes the queue after enqueueing; the chaining form takes a wait list
/// and returns an event without blocking.
#[derive(Debug)]
pub struct QueueSession<'e> {
    env: &'e ComputeEnvironment,
    _registry: MutexGuard<'e, SurfaceRegistry>,
}

impl Drop for QueueSession<'_> {
    fn drop(&mut self) {
        // Cleared before the registry guard goes.
        *self.env.session_owner() = None;
    }
}

impl<'e> QueueSession<'e> {
    pub fn env(&self) -> &'e ComputeEnvironment {
        self.env
    }

    /// Enqueue one batched acquire of `mems` after `wait`.
    pub fn acquire(&self, mems: &[MemId], wait: &[&Event]) -> ComputeResult<SurfaceLease<'_>> {
        let env = self.env;
        let id = env
            .driver
            .enqueue_acquire(env.platform.id, env.queue, mems, &wait_list(wait))?;
        trace!(surfaces = mems.len(), "enqueue acquire");
        Ok(SurfaceLease {
            env,
            mems: mems.to_vec(),
            acquired: Event::new(Arc::clone(&env.driver), id),
            released: false,
        })
    }

    /// Acquire and wait for the queue to drain.
    pub fn acquire_blocking(&self, mems: &[MemId]) -> ComputeResult<SurfaceLease<'_>> {
        let lease = self.acquire(mems, &[])?;
        self.flush()?;
        self.finish()?;
        Ok(lease)
    }

    /// Enqueue `kernel` over `work` after `wait`.
    pub fn dispatch(&self, kernel: &NativeKernel, work: &WorkSize, wait: &[&Event]) -> ComputeResult<Event> {
        let env = self.env;
        let id = env
            .driver
            .enqueue_kernel(env.queue, kernel.id(), work, &wait_list(wait))?;
        trace!(
            kernel = kernel.name(),
            global_x = work.global[0],
            global_y = work.global[1],
            local_x = work.local[0],
            local_y = work.local[1],
            "enqueue dispatch"
        );
        Ok(Event::new(Arc::clone(&env.driver), id))
    }

    /// Enqueue one batched release of everything `lease` holds after `wait`.
    ///
    /// On error the lease is dropped, which retries as a blocking release.
    pub fn release(&self, mut lease: SurfaceLease<'_>, wait: &[&Event]) -> ComputeResult<Event> {
        let env = self.env;
        let id = env
            .driver
            .enqueue_release(env.platform.id, env.queue, &lease.mems, &wait_list(wait))?;
        lease.released = true;
        trace!(surfaces = lease.mems.len(), "enqueue release");
        Ok(Event::new(Arc::clone(&env.driver), id))
    }

    /// Release and wait for the queue to drain.
    pub fn release_blocking(&self, lease: SurfaceLease<'_>, wait: &[&Event]) -> ComputeResult<()> {
        let _event = self.release(lease, wait)?;
        self.flush()?;
        self.finish()
    }

    pub fn flush(&self) -> ComputeResult<()> {
        self.env.driver.flush(self.env.queue)
    }

    pub fn finish(&self) -> ComputeResult<()> {
        self.env.driver.finish(self.env.queue)
    }

    pub fn wait(&self, events: &[&Event]) -> ComputeResult<()> {
        self.env.driver.wait_for_events(&wait_list(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DriverCall, Fault, MockPlatform, RecordingDriver};

    fn platform(driver: &Arc<RecordingDriver>) -> InteropPlatform {
        let dyn_driver: Arc<dyn ComputeDriver> = driver.clone();
        let info = dyn_driver.platforms().unwrap().remove(0);
        InteropPlatform::initialize(dyn_driver, info).unwrap()
    }

    #[test]
    fn test_bind_classifies_device() {
        let driver = Arc::new(RecordingDriver::new());
        let env = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(0xd3d))
            .unwrap();
        assert_eq!(env.device_class(), DeviceClass::Integrated);
        assert_eq!(env.graphics_device(), GraphicsDevice::from_id(0xd3d));

        let driver = Arc::new(RecordingDriver::with_platforms(vec![
            MockPlatform::intel().discrete(),
        ]));
        let env = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(1))
            .unwrap();
        assert_eq!(env.device_class(), DeviceClass::Discrete);
    }

    #[test]
    fn test_bind_failure_releases_context() {
        let driver = Arc::new(RecordingDriver::new());
        let plat = platform(&driver);
        driver.inject(Fault::CreateQueue);
        let err = plat
            .bind_to_graphics_device(GraphicsDevice::from_id(1))
            .unwrap_err();
        assert!(matches!(err, ComputeError::DeviceBindingFailed(_)));
        assert_eq!(driver.live_contexts(), 0);

        driver.inject(Fault::DeviceInfo);
        assert!(plat.bind_to_graphics_device(GraphicsDevice::from_id(1)).is_err());
        assert_eq!(driver.live_contexts(), 0);
        assert_eq!(driver.live_queues(), 0);
    }

    #[test]
    fn test_null_graphics_device_rejected() {
        let driver = Arc::new(RecordingDriver::new());
        let err = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(0))
            .unwrap_err();
        assert!(err.to_string().contains("-1006"));
    }

    #[test]
    fn test_drop_releases_everything() {
        let driver = Arc::new(RecordingDriver::new());
        {
            let env = platform(&driver)
                .bind_to_graphics_device(GraphicsDevice::from_id(1))
                .unwrap();
            let tex = SurfaceHandle::from_id(0x100);
            env.create_shared_surface(tex, Plane::Luma, false).unwrap();
            env.create_shared_surface(tex, Plane::Chroma, false).unwrap();
            let _buf = env.create_buffer(64, MemAccess::ReadWrite).unwrap();
            assert_eq!(driver.live_mems(), 3);
        }
        assert_eq!(driver.live_mems(), 0);
        assert_eq!(driver.live_queues(), 0);
        assert_eq!(driver.live_contexts(), 0);

        let calls = driver.calls();
        let queue_pos = calls
            .iter()
            .position(|c| matches!(c, DriverCall::ReleaseQueue(_)))
            .unwrap();
        let context_pos = calls
            .iter()
            .position(|c| matches!(c, DriverCall::ReleaseContext(_)))
            .unwrap();
        assert!(queue_pos < context_pos);
    }

    #[test]
    fn test_dropped_lease_releases() {
        let driver = Arc::new(RecordingDriver::new());
        let env = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(1))
            .unwrap();
        let mem = env
            .create_shared_surface(SurfaceHandle::from_id(0x200), Plane::Luma, true)
            .unwrap();
        {
            let session = env.session();
            let lease = session.acquire(&[mem], &[]).unwrap();
            assert_eq!(lease.mems(), &[mem]);
            assert_eq!(driver.acquired(), vec![mem]);
        }
        assert!(driver.acquired().is_empty());
        assert_eq!(driver.live_events(), 0);
    }

    #[test]
    fn test_blocking_forms_drain_queue() {
        let driver = Arc::new(RecordingDriver::new());
        let env = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(1))
            .unwrap();
        let mem = env
            .create_shared_surface(SurfaceHandle::from_id(0x300), Plane::Luma, false)
            .unwrap();
        driver.clear_calls();
        let session = env.session();
        let lease = session.acquire_blocking(&[mem]).unwrap();
        session.release_blocking(lease, &[]).unwrap();
        drop(session);

        let kinds: Vec<&'static str> = driver
            .calls()
            .iter()
            .filter_map(|c| match c {
                DriverCall::Acquire { .. } => Some("acquire"),
                DriverCall::Release { .. } => Some("release"),
                DriverCall::Flush { .. } => Some("flush"),
                DriverCall::Finish { .. } => Some("finish"),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, ["acquire", "flush", "finish", "release", "flush", "finish"]);
    }

    #[test]
    fn test_import_inside_session_fails_fast() {
        let driver = Arc::new(RecordingDriver::new());
        let env = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(1))
            .unwrap();
        let tex = SurfaceHandle::from_id(0x400);
        {
            let _session = env.session();
            assert!(env.in_session());
            let err = env.create_shared_surface(tex, Plane::Luma, true).unwrap_err();
            assert!(matches!(err, ComputeError::SyncFailed(_)));
            assert!(env.shared_surface_count().is_err());
        }
        assert!(!env.in_session());
        env.create_shared_surface(tex, Plane::Luma, true).unwrap();
        assert_eq!(env.shared_surface_count().unwrap(), 1);
        assert_eq!(driver.import_count(), 1);
    }

    #[test]
    fn test_session_on_other_thread_blocks_import() {
        let driver = Arc::new(RecordingDriver::new());
        let env = platform(&driver)
            .bind_to_graphics_device(GraphicsDevice::from_id(1))
            .unwrap();
        let session = env.session();
        thread::scope(|scope| {
            let worker = scope.spawn(|| {
                assert!(!env.in_session());
                env.create_shared_surface(SurfaceHandle::from_id(0x500), Plane::Chroma, false)
            });
            drop(session);
            assert!(worker.join().unwrap().is_ok());
        });
        assert_eq!(env.shared_surface_count().unwrap(), 1);
    }
}
