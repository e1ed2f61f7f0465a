//! In-memory compute driver.
//!
//! Simulates platforms, devices, surface imports, program builds and an
//! in-order queue whose commands complete as soon as they are enqueued.
//! Every successful call is appended to a log that tests inspect, and the
//! D3D11 sharing protocol is enforced the way a strict driver would:
//!
//! - a dispatch whose arguments reference an unacquired shared surface fails,
//! - acquiring an already acquired surface fails,
//! - releasing a surface that is not acquired fails,
//! - waiting on an unknown or released event fails.
//!
//! One-shot failures can be armed with [`RecordingDriver::inject`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use surfbridge_core::{GraphicsDevice, MemAccess, Plane, SharedSurfaceKey, SurfaceHandle};

use super::{
    ArgValue, ComputeDriver, ContextId, DeviceId, EventId, KernelId, MemId, PlatformId,
    PlatformInfo, ProgramId, QueueId,
};
use crate::geometry::WorkSize;
use crate::{ComputeError, ComputeResult};

// Status codes reported in error text, named as in cl.h / cl_d3d11.h.
const CL_DEVICE_NOT_FOUND: i32 = -1;
const CL_INVALID_VALUE: i32 = -30;
const CL_INVALID_PLATFORM: i32 = -32;
const CL_INVALID_DEVICE: i32 = -33;
const CL_INVALID_CONTEXT: i32 = -34;
const CL_INVALID_COMMAND_QUEUE: i32 = -36;
const CL_INVALID_MEM_OBJECT: i32 = -38;
const CL_INVALID_PROGRAM: i32 = -44;
const CL_INVALID_KERNEL_NAME: i32 = -46;
const CL_INVALID_KERNEL: i32 = -48;
const CL_INVALID_ARG_INDEX: i32 = -49;
const CL_INVALID_KERNEL_ARGS: i32 = -52;
const CL_INVALID_WORK_GROUP_SIZE: i32 = -54;
const CL_INVALID_EVENT_WAIT_LIST: i32 = -57;
const CL_INVALID_EVENT: i32 = -58;
const CL_INVALID_GLOBAL_WORK_SIZE: i32 = -63;
const CL_OUT_OF_RESOURCES: i32 = -5;
const CL_D3D11_RESOURCE_ALREADY_ACQUIRED_KHR: i32 = -1004;
const CL_D3D11_RESOURCE_NOT_ACQUIRED_KHR: i32 = -1005;
const CL_INVALID_D3D11_DEVICE_KHR: i32 = -1006;
const CL_INVALID_D3D11_RESOURCE_KHR: i32 = -1007;

// =============================================================================
// Configuration
// =============================================================================

/// A simulated platform with one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPlatform {
    pub name: String,
    pub vendor: String,
    /// Whether the device is a GPU.
    pub gpu: bool,
    /// Whether the D3D11 sharing entry points resolve.
    pub interop: bool,
    /// Graphics device the compute device is associated with; `None` accepts any.
    pub graphics: Option<GraphicsDevice>,
    /// Integrated (true) or discrete (false).
    pub unified_memory: bool,
}

impl MockPlatform {
    /// Integrated GPU platform with working interop.
    pub fn intel() -> Self {
        Self {
            name: "Intel(R) OpenCL HD Graphics".into(),
            vendor: "Intel(R) Corporation".into(),
            gpu: true,
            interop: true,
            graphics: None,
            unified_memory: true,
        }
    }

    /// Platform with the given name and vendor, GPU with interop.
    pub fn named(name: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor: vendor.into(),
            ..Self::intel()
        }
    }

    /// CPU-only platform.
    pub fn cpu_only(mut self) -> Self {
        self.gpu = false;
        self
    }

    /// Sharing extension missing.
    pub fn without_interop(mut self) -> Self {
        self.interop = false;
        self
    }

    /// Only associated with `graphics`.
    pub fn bound_to(mut self, graphics: GraphicsDevice) -> Self {
        self.graphics = Some(graphics);
        self
    }

    /// Discrete device.
    pub fn discrete(mut self) -> Self {
        self.unified_memory = false;
        self
    }
}

/// Call that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Platforms,
    Extension,
    DeviceQuery,
    CreateContext,
    CreateQueue,
    DeviceInfo,
    Import,
    CreateBuffer,
    CreateKernel,
    SetArg,
    Dispatch,
    Acquire,
    Release,
    Flush,
    Finish,
    Wait,
}

/// One successful driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Platforms,
    ResolveInterop { platform: PlatformId },
    DeviceForGraphics { platform: PlatformId, graphics: GraphicsDevice, device: DeviceId },
    CreateContext { context: ContextId, device: DeviceId },
    CreateQueue { queue: QueueId, context: ContextId },
    ImportSurface { mem: MemId, key: SharedSurfaceKey, access: MemAccess },
    CreateBuffer { mem: MemId, bytes: usize, access: MemAccess },
    BuildProgram { program: ProgramId, options: String },
    CreateKernel { kernel: KernelId, name: String },
    SetKernelArg { kernel: KernelId, index: u32, value: ArgValue, size: usize },
    Acquire { event: EventId, mems: Vec<MemId>, wait: Vec<EventId> },
    Dispatch { event: EventId, kernel: KernelId, name: String, work: WorkSize, wait: Vec<EventId> },
    Release { event: EventId, mems: Vec<MemId>, wait: Vec<EventId> },
    Flush { queue: QueueId },
    Finish { queue: QueueId },
    Wait { events: Vec<EventId> },
    ReleaseEvent(EventId),
    ReleaseMem(MemId),
    ReleaseKernel(KernelId),
    ReleaseProgram(ProgramId),
    ReleaseQueue(QueueId),
    ReleaseContext(ContextId),
}

// =============================================================================
// State
// =============================================================================

struct PlatformEntry {
    info: PlatformInfo,
    config: MockPlatform,
    device: DeviceId,
    interop_resolved: bool,
}

struct ContextEntry {
    platform: PlatformId,
}

enum MemKind {
    Shared(SharedSurfaceKey),
    Buffer,
}

struct MemEntry {
    kind: MemKind,
    acquired: bool,
}

struct KernelEntry {
    name: String,
    params: u32,
    args: BTreeMap<u32, ArgValue>,
}

#[derive(Default)]
struct MockState {
    next_id: usize,
    platforms: Vec<PlatformEntry>,
    contexts: HashMap<ContextId, ContextEntry>,
    queues: HashMap<QueueId, ContextId>,
    mems: HashMap<MemId, MemEntry>,
    programs: HashMap<ProgramId, Vec<(String, u32)>>,
    kernels: HashMap<KernelId, KernelEntry>,
    events: HashMap<EventId, u64>,
    seq: u64,
    faults: Vec<Fault>,
    calls: Vec<DriverCall>,
}

impl MockState {
    fn alloc(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(pos) => {
                self.faults.remove(pos);
                true
            }
            None => false,
        }
    }

    fn platform(&self, id: PlatformId) -> Option<&PlatformEntry> {
        self.platforms.iter().find(|p| p.info.id == id)
    }

    fn new_event(&mut self) -> EventId {
        let event = EventId::from_raw(self.alloc());
        self.seq += 1;
        self.events.insert(event, self.seq);
        event
    }

    fn check_wait_list(&self, wait: &[EventId]) -> Result<(), i32> {
        if wait.iter().all(|e| self.events.contains_key(e)) {
            Ok(())
        } else {
            Err(CL_INVALID_EVENT_WAIT_LIST)
        }
    }

    fn check_shared(&self, mems: &[MemId], want_acquired: bool) -> Result<(), i32> {
        for mem in mems {
            match self.mems.get(mem) {
                Some(MemEntry { kind: MemKind::Shared(_), acquired }) => {
                    if *acquired != want_acquired {
                        return Err(if want_acquired {
                            CL_D3D11_RESOURCE_NOT_ACQUIRED_KHR
                        } else {
                            CL_D3D11_RESOURCE_ALREADY_ACQUIRED_KHR
                        });
                    }
                }
                _ => return Err(CL_INVALID_MEM_OBJECT),
            }
        }
        Ok(())
    }
}

fn failed(call: &str, code: i32) -> String {
    format!("{} failed: {}", call, code)
}

// =============================================================================
// Driver
// =============================================================================

/// Deterministic driver backed by in-memory tables.
pub struct RecordingDriver {
    state: Mutex<MockState>,
}

impl std::fmt::Debug for RecordingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state();
        f.debug_struct("RecordingDriver")
            .field("platforms", &st.platforms.len())
            .field("calls", &st.calls.len())
            .finish_non_exhaustive()
    }
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    /// One integrated Intel GPU platform accepting any graphics device.
    pub fn new() -> Self {
        Self::with_platforms(vec![MockPlatform::intel()])
    }

    /// Driver exposing `platforms` in enumeration order.
    pub fn with_platforms(platforms: Vec<MockPlatform>) -> Self {
        let mut state = MockState::default();
        for config in platforms {
            let id = PlatformId::from_raw(state.alloc());
            let device = DeviceId::from_raw(state.alloc());
            state.platforms.push(PlatformEntry {
                info: PlatformInfo {
                    id,
                    name: config.name.clone(),
                    vendor: config.vendor.clone(),
                    gpu_devices: u32::from(config.gpu),
                },
                config,
                device,
                interop_resolved: false,
            });
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call of kind `fault` fail.
    pub fn inject(&self, fault: Fault) {
        self.state().faults.push(fault);
    }

    /// Successful calls in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Number of successful surface imports so far.
    pub fn import_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::ImportSurface { .. }))
            .count()
    }

    pub fn live_events(&self) -> usize {
        self.state().events.len()
    }

    pub fn live_mems(&self) -> usize {
        self.state().mems.len()
    }

    pub fn live_kernels(&self) -> usize {
        self.state().kernels.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state().programs.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.state().contexts.len()
    }

    pub fn live_queues(&self) -> usize {
        self.state().queues.len()
    }

    /// Shared surfaces currently held by the compute side.
    pub fn acquired(&self) -> Vec<MemId> {
        let mut out: Vec<MemId> = self
            .state()
            .mems
            .iter()
            .filter(|(_, m)| m.acquired)
            .map(|(id, _)| *id)
            .collect();
        out.sort();
        out
    }

    /// Surface plane a memory object was imported from.
    pub fn shared_key(&self, mem: MemId) -> Option<SharedSurfaceKey> {
        match self.state().mems.get(&mem) {
            Some(MemEntry {
                kind: MemKind::Shared(key),
                ..
            }) => Some(*key),
            _ => None,
        }
    }

    /// Value currently bound at `index` of `kernel`.
    pub fn kernel_arg(&self, kernel: KernelId, index: u32) -> Option<ArgValue> {
        self.state()
            .kernels
            .get(&kernel)
            .and_then(|k| k.args.get(&index).copied())
    }

    /// Completion order of `event` (1-based), if still alive.
    pub fn completion_order(&self, event: EventId) -> Option<u64> {
        self.state().events.get(&event).copied()
    }
}

impl ComputeDriver for RecordingDriver {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn platforms(&self) -> ComputeResult<Vec<PlatformInfo>> {
        let mut st = self.state();
        if st.take_fault(Fault::Platforms) {
            return Err(ComputeError::PlatformDiscoveryFailed(failed(
                "clGetPlatformIDs",
                CL_OUT_OF_RESOURCES,
            )));
        }
        st.calls.push(DriverCall::Platforms);
        Ok(st.platforms.iter().map(|p| p.info.clone()).collect())
    }

    fn resolve_interop(&self, platform: PlatformId) -> ComputeResult<()> {
        let mut st = self.state();
        let injected = st.take_fault(Fault::Extension);
        let entry = st
            .platforms
            .iter_mut()
            .find(|p| p.info.id == platform)
            .ok_or_else(|| ComputeError::ExtensionUnavailable {
                platform: format!("{:#x}", platform.raw()),
                function: "clGetDeviceIDsFromD3D11KHR".into(),
            })?;
        if injected || !entry.config.interop {
            return Err(ComputeError::ExtensionUnavailable {
                platform: entry.info.name.clone(),
                function: "clGetDeviceIDsFromD3D11KHR".into(),
            });
        }
        entry.interop_resolved = true;
        st.calls.push(DriverCall::ResolveInterop { platform });
        Ok(())
    }

    fn device_for_graphics(
        &self,
        platform: PlatformId,
        graphics: GraphicsDevice,
    ) -> ComputeResult<DeviceId> {
        let mut st = self.state();
        let call = "clGetDeviceIDsFromD3D11KHR";
        if st.take_fault(Fault::DeviceQuery) {
            return Err(ComputeError::DeviceBindingFailed(failed(call, CL_OUT_OF_RESOURCES)));
        }
        let entry = st
            .platform(platform)
            .ok_or_else(|| ComputeError::DeviceBindingFailed(failed(call, CL_INVALID_PLATFORM)))?;
        if !entry.interop_resolved {
            return Err(ComputeError::ExtensionUnavailable {
                platform: entry.info.name.clone(),
                function: call.into(),
            });
        }
        if graphics.id() == 0 {
            return Err(ComputeError::DeviceBindingFailed(failed(
                call,
                CL_INVALID_D3D11_DEVICE_KHR,
            )));
        }
        let associated = entry.config.graphics.is_none_or(|g| g == graphics);
        if !entry.config.gpu || !associated {
            return Err(ComputeError::DeviceBindingFailed(failed(call, CL_DEVICE_NOT_FOUND)));
        }
        let device = entry.device;
        st.calls.push(DriverCall::DeviceForGraphics {
            platform,
            graphics,
            device,
        });
        Ok(device)
    }

    fn create_context(
        &self,
        platform: PlatformId,
        device: DeviceId,
        _graphics: GraphicsDevice,
    ) -> ComputeResult<ContextId> {
        let mut st = self.state();
        let call = "clCreateContext";
        if st.take_fault(Fault::CreateContext) {
            return Err(ComputeError::DeviceBindingFailed(failed(call, CL_OUT_OF_RESOURCES)));
        }
        match st.platform(platform) {
            Some(p) if p.device == device => {}
            Some(_) => return Err(ComputeError::DeviceBindingFailed(failed(call, CL_INVALID_DEVICE))),
            None => return Err(ComputeError::DeviceBindingFailed(failed(call, CL_INVALID_PLATFORM))),
        }
        let context = ContextId::from_raw(st.alloc());
        st.contexts.insert(context, ContextEntry { platform });
        st.calls.push(DriverCall::CreateContext { context, device });
        Ok(context)
    }

    fn create_queue(&self, context: ContextId, _device: DeviceId) -> ComputeResult<QueueId> {
        let mut st = self.state();
        let call = "clCreateCommandQueue";
        if st.take_fault(Fault::CreateQueue) {
            return Err(ComputeError::DeviceBindingFailed(failed(call, CL_OUT_OF_RESOURCES)));
        }
        if !st.contexts.contains_key(&context) {
            return Err(ComputeError::DeviceBindingFailed(failed(call, CL_INVALID_CONTEXT)));
        }
        let queue = QueueId::from_raw(st.alloc());
        st.queues.insert(queue, context);
        st.calls.push(DriverCall::CreateQueue { queue, context });
        Ok(queue)
    }

    fn host_unified_memory(&self, device: DeviceId) -> ComputeResult<bool> {
        let mut st = self.state();
        let call = "clGetDeviceInfo(CL_DEVICE_HOST_UNIFIED_MEMORY)";
        if st.take_fault(Fault::DeviceInfo) {
            return Err(ComputeError::DeviceBindingFailed(failed(call, CL_OUT_OF_RESOURCES)));
        }
        st.platforms
            .iter()
            .find(|p| p.device == device)
            .map(|p| p.config.unified_memory)
            .ok_or_else(|| ComputeError::DeviceBindingFailed(failed(call, CL_INVALID_DEVICE)))
    }

    fn import_surface(
        &self,
        platform: PlatformId,
        context: ContextId,
        surface: SurfaceHandle,
        plane: Plane,
        access: MemAccess,
    ) -> ComputeResult<MemId> {
        let mut st = self.state();
        let key = SharedSurfaceKey::new(surface, plane);
        let fail = |code| ComputeError::SurfaceImportFailed {
            surface: key.to_string(),
            reason: failed("clCreateFromD3D11Texture2DKHR", code),
        };
        if st.take_fault(Fault::Import) {
            return Err(fail(CL_OUT_OF_RESOURCES));
        }
        match st.contexts.get(&context) {
            Some(ctx) if ctx.platform == platform => {}
            _ => return Err(fail(CL_INVALID_CONTEXT)),
        }
        if surface.is_null() {
            return Err(fail(CL_INVALID_D3D11_RESOURCE_KHR));
        }
        let mem = MemId::from_raw(st.alloc());
        st.mems.insert(
            mem,
            MemEntry {
                kind: MemKind::Shared(key),
                acquired: false,
            },
        );
        st.calls.push(DriverCall::ImportSurface { mem, key, access });
        Ok(mem)
    }

    fn create_buffer(
        &self,
        context: ContextId,
        bytes: usize,
        access: MemAccess,
    ) -> ComputeResult<MemId> {
        let mut st = self.state();
        let call = "clCreateBuffer";
        if st.take_fault(Fault::CreateBuffer) {
            return Err(ComputeError::BufferCreateFailed(failed(call, CL_OUT_OF_RESOURCES)));
        }
        if !st.contexts.contains_key(&context) {
            return Err(ComputeError::BufferCreateFailed(failed(call, CL_INVALID_CONTEXT)));
        }
        if bytes == 0 {
            return Err(ComputeError::BufferCreateFailed(failed(call, CL_INVALID_VALUE)));
        }
        let mem = MemId::from_raw(st.alloc());
        st.mems.insert(
            mem,
            MemEntry {
                kind: MemKind::Buffer,
                acquired: false,
            },
        );
        st.calls.push(DriverCall::CreateBuffer { mem, bytes, access });
        Ok(mem)
    }

    fn build_program(
        &self,
        context: ContextId,
        _device: DeviceId,
        source: &str,
        options: &str,
    ) -> ComputeResult<ProgramId> {
        let mut st = self.state();
        if !st.contexts.contains_key(&context) {
            return Err(ComputeError::Compile {
                log: failed("clCreateProgramWithSource", CL_INVALID_CONTEXT),
            });
        }
        let entry_points = compile(source, options).map_err(|log| ComputeError::Compile { log })?;
        let program = ProgramId::from_raw(st.alloc());
        st.programs.insert(program, entry_points);
        st.calls.push(DriverCall::BuildProgram {
            program,
            options: options.to_string(),
        });
        Ok(program)
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> ComputeResult<KernelId> {
        let mut st = self.state();
        let fail = |code| ComputeError::KernelCreateFailed {
            name: name.to_string(),
            reason: failed("clCreateKernel", code),
        };
        if st.take_fault(Fault::CreateKernel) {
            return Err(fail(CL_OUT_OF_RESOURCES));
        }
        let params = st
            .programs
            .get(&program)
            .ok_or_else(|| fail(CL_INVALID_PROGRAM))?
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, params)| *params)
            .ok_or_else(|| fail(CL_INVALID_KERNEL_NAME))?;
        let kernel = KernelId::from_raw(st.alloc());
        st.kernels.insert(
            kernel,
            KernelEntry {
                name: name.to_string(),
                params,
                args: BTreeMap::new(),
            },
        );
        st.calls.push(DriverCall::CreateKernel {
            kernel,
            name: name.to_string(),
        });
        Ok(kernel)
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, value: &ArgValue) -> ComputeResult<()> {
        let mut st = self.state();
        let fail = |code| ComputeError::ArgumentBindFailed {
            index,
            reason: failed("clSetKernelArg", code),
        };
        if st.take_fault(Fault::SetArg) {
            return Err(fail(CL_OUT_OF_RESOURCES));
        }
        if let ArgValue::Mem(mem) = value {
            if !st.mems.contains_key(mem) {
                return Err(fail(CL_INVALID_MEM_OBJECT));
            }
        }
        let entry = st.kernels.get_mut(&kernel).ok_or_else(|| fail(CL_INVALID_KERNEL))?;
        if index >= entry.params {
            return Err(fail(CL_INVALID_ARG_INDEX));
        }
        entry.args.insert(index, *value);
        let size = value.as_bytes().len();
        st.calls.push(DriverCall::SetKernelArg {
            kernel,
            index,
            value: *value,
            size,
        });
        Ok(())
    }

    fn enqueue_acquire(
        &self,
        _platform: PlatformId,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let mut st = self.state();
        let fail = |code| ComputeError::SyncFailed(failed("clEnqueueAcquireD3D11ObjectsKHR", code));
        if st.take_fault(Fault::Acquire) {
            return Err(fail(CL_OUT_OF_RESOURCES));
        }
        if !st.queues.contains_key(&queue) {
            return Err(fail(CL_INVALID_COMMAND_QUEUE));
        }
        st.check_wait_list(wait).map_err(fail)?;
        st.check_shared(mems, false).map_err(fail)?;
        for mem in mems {
            if let Some(entry) = st.mems.get_mut(mem) {
                entry.acquired = true;
            }
        }
        let event = st.new_event();
        st.calls.push(DriverCall::Acquire {
            event,
            mems: mems.to_vec(),
            wait: wait.to_vec(),
        });
        Ok(event)
    }

    fn enqueue_release(
        &self,
        _platform: PlatformId,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let mut st = self.state();
        let fail = |code| ComputeError::SyncFailed(failed("clEnqueueReleaseD3D11ObjectsKHR", code));
        if st.take_fault(Fault::Release) {
            return Err(fail(CL_OUT_OF_RESOURCES));
        }
        if !st.queues.contains_key(&queue) {
            return Err(fail(CL_INVALID_COMMAND_QUEUE));
        }
        st.check_wait_list(wait).map_err(fail)?;
        st.check_shared(mems, true).map_err(fail)?;
        for mem in mems {
            if let Some(entry) = st.mems.get_mut(mem) {
                entry.acquired = false;
            }
        }
        let event = st.new_event();
        st.calls.push(DriverCall::Release {
            event,
            mems: mems.to_vec(),
            wait: wait.to_vec(),
        });
        Ok(event)
    }

    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        work: &WorkSize,
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let mut st = self.state();
        let fail = |code| ComputeError::DispatchFailed(failed("clEnqueueNDRangeKernel", code));
        if st.take_fault(Fault::Dispatch) {
            return Err(fail(CL_OUT_OF_RESOURCES));
        }
        if !st.queues.contains_key(&queue) {
            return Err(fail(CL_INVALID_COMMAND_QUEUE));
        }
        st.check_wait_list(wait).map_err(fail)?;
        if work.global.contains(&0) {
            return Err(fail(CL_INVALID_GLOBAL_WORK_SIZE));
        }
        if (0..2).any(|d| work.local[d] == 0 || work.global[d] % work.local[d] != 0) {
            return Err(fail(CL_INVALID_WORK_GROUP_SIZE));
        }
        let entry = st.kernels.get(&kernel).ok_or_else(|| fail(CL_INVALID_KERNEL))?;
        if (0..entry.params).any(|i| !entry.args.contains_key(&i)) {
            return Err(fail(CL_INVALID_KERNEL_ARGS));
        }
        let name = entry.name.clone();
        let touched: Vec<MemId> = entry
            .args
            .values()
            .filter_map(|v| match v {
                ArgValue::Mem(mem) => Some(*mem),
                _ => None,
            })
            .collect();
        for mem in &touched {
            match st.mems.get(mem) {
                Some(MemEntry {
                    kind: MemKind::Shared(_),
                    acquired: false,
                }) => return Err(fail(CL_D3D11_RESOURCE_NOT_ACQUIRED_KHR)),
                Some(_) => {}
                None => return Err(fail(CL_INVALID_MEM_OBJECT)),
            }
        }
        let event = st.new_event();
        st.calls.push(DriverCall::Dispatch {
            event,
            kernel,
            name,
            work: *work,
            wait: wait.to_vec(),
        });
        Ok(event)
    }

    fn flush(&self, queue: QueueId) -> ComputeResult<()> {
        let mut st = self.state();
        if st.take_fault(Fault::Flush) {
            return Err(ComputeError::SyncFailed(failed("clFlush", CL_OUT_OF_RESOURCES)));
        }
        if !st.queues.contains_key(&queue) {
            return Err(ComputeError::SyncFailed(failed("clFlush", CL_INVALID_COMMAND_QUEUE)));
        }
        st.calls.push(DriverCall::Flush { queue });
        Ok(())
    }

    fn finish(&self, queue: QueueId) -> ComputeResult<()> {
        let mut st = self.state();
        if st.take_fault(Fault::Finish) {
            return Err(ComputeError::SyncFailed(failed("clFinish", CL_OUT_OF_RESOURCES)));
        }
        if !st.queues.contains_key(&queue) {
            return Err(ComputeError::SyncFailed(failed("clFinish", CL_INVALID_COMMAND_QUEUE)));
        }
        st.calls.push(DriverCall::Finish { queue });
        Ok(())
    }

    fn wait_for_events(&self, events: &[EventId]) -> ComputeResult<()> {
        let mut st = self.state();
        if st.take_fault(Fault::Wait) {
            return Err(ComputeError::SyncFailed(failed("clWaitForEvents", CL_OUT_OF_RESOURCES)));
        }
        if events.is_empty() {
            return Err(ComputeError::SyncFailed(failed("clWaitForEvents", CL_INVALID_VALUE)));
        }
        if !events.iter().all(|e| st.events.contains_key(e)) {
            return Err(ComputeError::SyncFailed(failed("clWaitForEvents", CL_INVALID_EVENT)));
        }
        st.calls.push(DriverCall::Wait {
            events: events.to_vec(),
        });
        Ok(())
    }

    unsafe fn release_event(&self, event: EventId) {
        let mut st = self.state();
        if st.events.remove(&event).is_some() {
            st.calls.push(DriverCall::ReleaseEvent(event));
        }
    }

    unsafe fn release_mem(&self, mem: MemId) {
        let mut st = self.state();
        if st.mems.remove(&mem).is_some() {
            st.calls.push(DriverCall::ReleaseMem(mem));
        }
    }

    unsafe fn release_kernel(&self, kernel: KernelId) {
        let mut st = self.state();
        if st.kernels.remove(&kernel).is_some() {
            st.calls.push(DriverCall::ReleaseKernel(kernel));
        }
    }

    unsafe fn release_program(&self, program: ProgramId) {
        let mut st = self.state();
        if st.programs.remove(&program).is_some() {
            st.calls.push(DriverCall::ReleaseProgram(program));
        }
    }

    unsafe fn release_queue(&self, queue: QueueId) {
        let mut st = self.state();
        if st.queues.remove(&queue).is_some() {
            st.calls.push(DriverCall::ReleaseQueue(queue));
        }
    }

    unsafe fn release_context(&self, context: ContextId) {
        let mut st = self.state();
        if st.contexts.remove(&context).is_some() {
            st.calls.push(DriverCall::ReleaseContext(context));
        }
    }
}

// =============================================================================
// Simulated compiler
// =============================================================================

/// "Compile" an OpenCL C module: returns its entry points and their
/// parameter counts, or a build log.
fn compile(source: &str, options: &str) -> Result<Vec<(String, u32)>, String> {
    let code = strip_comments(source);
    if code.trim().is_empty() {
        return Err("error: program source is empty".into());
    }

    let mut log = Vec::new();
    let werror = options.split_whitespace().any(|o| o == "-Werror");
    for (lineno, line) in code.lines().enumerate() {
        let directive = line.trim_start();
        if let Some(msg) = directive.strip_prefix("#error") {
            log.push(format!("<source>:{}: error: {}", lineno + 1, msg.trim()));
        } else if let Some(msg) = directive.strip_prefix("#warning") {
            let severity = if werror { "error" } else { "warning" };
            log.push(format!("<source>:{}: {}: {}", lineno + 1, severity, msg.trim()));
        }
    }

    let mut depth = [0i64; 2];
    for ch in code.chars() {
        match ch {
            '{' => depth[0] += 1,
            '}' => depth[0] -= 1,
            '(' => depth[1] += 1,
            ')' => depth[1] -= 1,
            _ => {}
        }
        if depth.iter().any(|d| *d < 0) {
            break;
        }
    }
    if depth[0] != 0 {
        log.push("<source>: error: expected '}'".into());
    }
    if depth[1] != 0 {
        log.push("<source>: error: expected ')'".into());
    }

    let fatal = log.iter().any(|l| l.contains("error:"));
    if fatal {
        log.push(format!("{} error(s) generated.", log.len()));
        return Err(log.join("\n"));
    }
    Ok(entry_points(&code))
}

fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            for n in chars.by_ref() {
                if n == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for n in chars.by_ref() {
                if n == '\n' {
                    out.push('\n');
                }
                if prev == '*' && n == '/' {
                    break;
                }
                prev = n;
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `kernel void name(params...)` declarations, `__kernel` or `kernel`.
fn entry_points(code: &str) -> Vec<(String, u32)> {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut out = Vec::new();
    for (pos, keyword) in code.match_indices("kernel") {
        let head = &code[..pos];
        let head = head.strip_suffix("__").unwrap_or(head);
        if head.chars().last().is_some_and(is_ident) {
            continue;
        }
        let after = &code[pos + keyword.len()..];
        if !after.starts_with(char::is_whitespace) {
            continue;
        }
        let Some(decl) = after.trim_start().strip_prefix("void") else {
            continue;
        };
        if !decl.starts_with(char::is_whitespace) {
            continue;
        }
        let decl = decl.trim_start();
        let name_len = decl.find(|c: char| !is_ident(c)).unwrap_or(decl.len());
        if name_len == 0 {
            continue;
        }
        let name = &decl[..name_len];
        let Some(params) = decl[name_len..].trim_start().strip_prefix('(') else {
            continue;
        };
        let Some(close) = params.find(')') else {
            continue;
        };
        let params = params[..close].trim();
        let count = if params.is_empty() || params == "void" {
            0
        } else {
            params.split(',').count() as u32
        };
        out.push((name.to_string(), count));
    }
    out
}
