//! OpenCL driver with `cl_khr_d3d11_sharing`.
//!
//! Requires the `opencl` feature and an ICD loader. The four sharing entry
//! points are not exported by the loader; they are resolved per platform with
//! `clGetExtensionFunctionAddressForPlatform` and cached.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_void};
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use opencl_sys::{
    CL_CONTEXT_PLATFORM, CL_DEVICE_NOT_FOUND, CL_DEVICE_TYPE_GPU, CL_FALSE, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE,
    CL_PLATFORM_NAME, CL_PLATFORM_VENDOR, CL_PROGRAM_BUILD_LOG, CL_SUCCESS, cl_bool,
    cl_command_queue, cl_context, cl_context_properties, cl_device_id, cl_event, cl_int, cl_mem,
    cl_mem_flags, cl_platform_id, cl_uint, clBuildProgram, clCreateBuffer, clCreateContext,
    clCreateKernel, clCreateProgramWithSource, clEnqueueNDRangeKernel, clFinish, clFlush,
    clGetDeviceIDs, clGetDeviceInfo, clGetExtensionFunctionAddressForPlatform, clGetPlatformIDs,
    clGetPlatformInfo, clGetProgramBuildInfo, clReleaseCommandQueue, clReleaseContext,
    clReleaseEvent, clReleaseKernel, clReleaseMemObject, clReleaseProgram, clSetKernelArg,
    clWaitForEvents,
};
use surfbridge_core::{GraphicsDevice, MemAccess, Plane, SurfaceHandle};
use tracing::{debug, trace};

use super::{
    ArgValue, ComputeDriver, ContextId, DeviceId, EventId, KernelId, MemId, PlatformId,
    PlatformInfo, ProgramId, QueueId,
};
use crate::geometry::WorkSize;
use crate::{ComputeError, ComputeResult};

// cl.h
const CL_CONTEXT_INTEROP_USER_SYNC: cl_context_properties = 0x1085;
const CL_DEVICE_HOST_UNIFIED_MEMORY: cl_uint = 0x1035;

// =============================================================================
// cl_d3d11.h
// =============================================================================

const CL_D3D11_DEVICE_KHR: cl_uint = 0x4019;
const CL_PREFERRED_DEVICES_FOR_D3D11_KHR: cl_uint = 0x401B;
const CL_CONTEXT_D3D11_DEVICE_KHR: cl_context_properties = 0x401D;

type GetDeviceIdsFn = unsafe extern "system" fn(
    platform: cl_platform_id,
    source: cl_uint,
    d3d_object: *mut c_void,
    set: cl_uint,
    num_entries: cl_uint,
    devices: *mut cl_device_id,
    num_devices: *mut cl_uint,
) -> cl_int;

type CreateFromTexture2dFn = unsafe extern "system" fn(
    context: cl_context,
    flags: cl_mem_flags,
    resource: *mut c_void,
    subresource: cl_uint,
    errcode_ret: *mut cl_int,
) -> cl_mem;

type EnqueueObjectsFn = unsafe extern "system" fn(
    queue: cl_command_queue,
    num_objects: cl_uint,
    mem_objects: *const cl_mem,
    num_events: cl_uint,
    event_wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int;

#[derive(Clone, Copy)]
struct SharingFns {
    get_device_ids: GetDeviceIdsFn,
    create_from_texture2d: CreateFromTexture2dFn,
    acquire: EnqueueObjectsFn,
    release: EnqueueObjectsFn,
}

/// Resolve `name` on `platform` as a function pointer of type `F`.
///
/// # Safety
///
/// `F` must be the `extern "system"` signature of `name`.
unsafe fn resolve<F: Copy>(platform: cl_platform_id, name: &CStr) -> Option<F> {
    // SAFETY: name is NUL-terminated; platform came from clGetPlatformIDs.
    let ptr = unsafe { clGetExtensionFunctionAddressForPlatform(platform, name.as_ptr()) };
    if ptr.is_null() {
        None
    } else {
        // SAFETY: caller guarantees F matches the exported symbol.
        Some(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) })
    }
}

fn check(call: &str, code: cl_int) -> Result<(), String> {
    if code == CL_SUCCESS {
        Ok(())
    } else {
        Err(format!("{} failed: {}", call, code))
    }
}

fn raw_events(wait: &[EventId]) -> Vec<cl_event> {
    wait.iter().map(|e| e.as_ptr() as cl_event).collect()
}

fn list_ptr<T>(list: &[T]) -> *const T {
    if list.is_empty() { ptr::null() } else { list.as_ptr() }
}

// =============================================================================
// Driver
// =============================================================================

/// OpenCL C API driver.
pub struct OpenClDriver {
    sharing: Mutex<HashMap<PlatformId, SharingFns>>,
}

impl std::fmt::Debug for OpenClDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClDriver")
            .field("resolved_platforms", &self.fns().len())
            .finish()
    }
}

impl OpenClDriver {
    pub fn new() -> ComputeResult<Self> {
        if !Self::is_available() {
            return Err(ComputeError::BackendNotAvailable("no OpenCL platform".into()));
        }
        Ok(Self {
            sharing: Mutex::new(HashMap::new()),
        })
    }

    /// True when the ICD loader reports at least one platform.
    pub fn is_available() -> bool {
        let mut count: cl_uint = 0;
        // SAFETY: count query with a null output array.
        let code = unsafe { clGetPlatformIDs(0, ptr::null_mut(), &mut count) };
        code == CL_SUCCESS && count > 0
    }

    fn fns(&self) -> MutexGuard<'_, HashMap<PlatformId, SharingFns>> {
        self.sharing.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sharing_for(&self, platform: PlatformId) -> Option<SharingFns> {
        self.fns().get(&platform).copied()
    }

    fn platform_string(platform: cl_platform_id, param: cl_uint) -> Result<String, String> {
        let mut size = 0usize;
        // SAFETY: size query.
        check("clGetPlatformInfo", unsafe {
            clGetPlatformInfo(platform, param, 0, ptr::null_mut(), &mut size)
        })?;
        let mut buf = vec![0u8; size];
        // SAFETY: buf holds `size` bytes.
        check("clGetPlatformInfo", unsafe {
            clGetPlatformInfo(platform, param, size, buf.as_mut_ptr() as *mut c_void, ptr::null_mut())
        })?;
        Ok(nul_terminated(&buf))
    }

    fn gpu_count(platform: cl_platform_id) -> u32 {
        let mut count: cl_uint = 0;
        // SAFETY: count query; CL_DEVICE_NOT_FOUND leaves count at 0.
        let code = unsafe {
            clGetDeviceIDs(platform, CL_DEVICE_TYPE_GPU, 0, ptr::null_mut(), &mut count)
        };
        if code == CL_SUCCESS { count } else { 0 }
    }

    fn build_log(program: opencl_sys::cl_program, device: cl_device_id) -> String {
        let mut size = 0usize;
        // SAFETY: size query.
        let code = unsafe {
            clGetProgramBuildInfo(program, device, CL_PROGRAM_BUILD_LOG, 0, ptr::null_mut(), &mut size)
        };
        if code != CL_SUCCESS || size == 0 {
            return String::new();
        }
        let mut buf = vec![0u8; size];
        // SAFETY: buf holds `size` bytes.
        let code = unsafe {
            clGetProgramBuildInfo(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                size,
                buf.as_mut_ptr() as *mut c_void,
                ptr::null_mut(),
            )
        };
        if code != CL_SUCCESS {
            return String::new();
        }
        nul_terminated(&buf)
    }

    fn enqueue_objects(
        f: EnqueueObjectsFn,
        call: &str,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let objects: Vec<cl_mem> = mems.iter().map(|m| m.as_ptr() as cl_mem).collect();
        let events = raw_events(wait);
        let mut event: cl_event = ptr::null_mut();
        // SAFETY: slices outlive the call; f was resolved for this platform.
        let code = unsafe {
            f(
                queue.as_ptr() as cl_command_queue,
                objects.len() as cl_uint,
                list_ptr(&objects),
                events.len() as cl_uint,
                list_ptr(&events),
                &mut event,
            )
        };
        check(call, code).map_err(ComputeError::SyncFailed)?;
        Ok(EventId::from_ptr(event as *mut c_void))
    }
}

fn nul_terminated(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).trim_end().to_string()
}

fn mem_flags(access: MemAccess) -> cl_mem_flags {
    if access.is_read_only() {
        CL_MEM_READ_ONLY
    } else {
        CL_MEM_READ_WRITE
    }
}

impl ComputeDriver for OpenClDriver {
    fn name(&self) -> &'static str {
        "opencl"
    }

    fn platforms(&self) -> ComputeResult<Vec<PlatformInfo>> {
        let discovery = ComputeError::PlatformDiscoveryFailed;
        let mut count: cl_uint = 0;
        // SAFETY: count query.
        check("clGetPlatformIDs", unsafe {
            clGetPlatformIDs(0, ptr::null_mut(), &mut count)
        })
        .map_err(discovery)?;
        let mut ids: Vec<cl_platform_id> = vec![ptr::null_mut(); count as usize];
        // SAFETY: ids holds `count` entries.
        check("clGetPlatformIDs", unsafe {
            clGetPlatformIDs(count, ids.as_mut_ptr(), ptr::null_mut())
        })
        .map_err(discovery)?;

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(PlatformInfo {
                id: PlatformId::from_ptr(id as *mut c_void),
                name: Self::platform_string(id, CL_PLATFORM_NAME).map_err(discovery)?,
                vendor: Self::platform_string(id, CL_PLATFORM_VENDOR).map_err(discovery)?,
                gpu_devices: Self::gpu_count(id),
            });
        }
        Ok(out)
    }

    fn resolve_interop(&self, platform: PlatformId) -> ComputeResult<()> {
        let raw = platform.as_ptr() as cl_platform_id;
        let missing = |function: &str| ComputeError::ExtensionUnavailable {
            platform: Self::platform_string(raw, CL_PLATFORM_NAME)
                .unwrap_or_else(|_| format!("{:#x}", platform.raw())),
            function: function.to_string(),
        };
        // SAFETY: each F matches the cl_d3d11.h typedef of the named symbol.
        let fns = unsafe {
            SharingFns {
                get_device_ids: resolve(raw, c"clGetDeviceIDsFromD3D11KHR")
                    .ok_or_else(|| missing("clGetDeviceIDsFromD3D11KHR"))?,
                create_from_texture2d: resolve(raw, c"clCreateFromD3D11Texture2DKHR")
                    .ok_or_else(|| missing("clCreateFromD3D11Texture2DKHR"))?,
                acquire: resolve(raw, c"clEnqueueAcquireD3D11ObjectsKHR")
                    .ok_or_else(|| missing("clEnqueueAcquireD3D11ObjectsKHR"))?,
                release: resolve(raw, c"clEnqueueReleaseD3D11ObjectsKHR")
                    .ok_or_else(|| missing("clEnqueueReleaseD3D11ObjectsKHR"))?,
            }
        };
        self.fns().insert(platform, fns);
        Ok(())
    }

    fn device_for_graphics(
        &self,
        platform: PlatformId,
        graphics: GraphicsDevice,
    ) -> ComputeResult<DeviceId> {
        let call = "clGetDeviceIDsFromD3D11KHR";
        let fns = self
            .sharing_for(platform)
            .ok_or_else(|| ComputeError::ExtensionUnavailable {
                platform: format!("{:#x}", platform.raw()),
                function: call.into(),
            })?;
        let mut device: cl_device_id = ptr::null_mut();
        let mut count: cl_uint = 0;
        // SAFETY: one output slot; graphics is the caller's ID3D11Device.
        let code = unsafe {
            (fns.get_device_ids)(
                platform.as_ptr() as cl_platform_id,
                CL_D3D11_DEVICE_KHR,
                graphics.as_raw(),
                CL_PREFERRED_DEVICES_FOR_D3D11_KHR,
                1,
                &mut device,
                &mut count,
            )
        };
        check(call, code).map_err(ComputeError::DeviceBindingFailed)?;
        if count == 0 || device.is_null() {
            return Err(ComputeError::DeviceBindingFailed(format!(
                "{} failed: {}",
                call, CL_DEVICE_NOT_FOUND
            )));
        }
        Ok(DeviceId::from_ptr(device as *mut c_void))
    }

    fn create_context(
        &self,
        platform: PlatformId,
        device: DeviceId,
        graphics: GraphicsDevice,
    ) -> ComputeResult<ContextId> {
        let props: [cl_context_properties; 7] = [
            CL_CONTEXT_PLATFORM as cl_context_properties,
            platform.raw() as cl_context_properties,
            CL_CONTEXT_D3D11_DEVICE_KHR,
            graphics.id() as cl_context_properties,
            CL_CONTEXT_INTEROP_USER_SYNC,
            CL_FALSE as cl_context_properties,
            0,
        ];
        let devices = [device.as_ptr() as cl_device_id];
        let mut err: cl_int = CL_SUCCESS;
        // SAFETY: props is zero-terminated; one device.
        let context = unsafe {
            clCreateContext(props.as_ptr(), 1, devices.as_ptr(), None, ptr::null_mut(), &mut err)
        };
        check("clCreateContext", err).map_err(ComputeError::DeviceBindingFailed)?;
        Ok(ContextId::from_ptr(context as *mut c_void))
    }

    #[allow(deprecated)]
    fn create_queue(&self, context: ContextId, device: DeviceId) -> ComputeResult<QueueId> {
        let mut err: cl_int = CL_SUCCESS;
        // SAFETY: in-order queue, no properties.
        let queue = unsafe {
            opencl_sys::clCreateCommandQueue(
                context.as_ptr() as cl_context,
                device.as_ptr() as cl_device_id,
                0,
                &mut err,
            )
        };
        check("clCreateCommandQueue", err).map_err(ComputeError::DeviceBindingFailed)?;
        Ok(QueueId::from_ptr(queue as *mut c_void))
    }

    fn host_unified_memory(&self, device: DeviceId) -> ComputeResult<bool> {
        let mut unified: cl_bool = CL_FALSE;
        // SAFETY: cl_bool-sized output.
        let code = unsafe {
            clGetDeviceInfo(
                device.as_ptr() as cl_device_id,
                CL_DEVICE_HOST_UNIFIED_MEMORY,
                std::mem::size_of::<cl_bool>(),
                &mut unified as *mut cl_bool as *mut c_void,
                ptr::null_mut(),
            )
        };
        check("clGetDeviceInfo", code).map_err(ComputeError::DeviceBindingFailed)?;
        Ok(unified != CL_FALSE)
    }

    fn import_surface(
        &self,
        platform: PlatformId,
        context: ContextId,
        surface: SurfaceHandle,
        plane: Plane,
        access: MemAccess,
    ) -> ComputeResult<MemId> {
        let fail = |reason: String| ComputeError::SurfaceImportFailed {
            surface: format!("{}[{}]", surface, plane.index()),
            reason,
        };
        let fns = self
            .sharing_for(platform)
            .ok_or_else(|| fail("sharing extension not resolved".into()))?;
        let mut err: cl_int = CL_SUCCESS;
        // SAFETY: surface is the caller's ID3D11Texture2D; subresource is the plane.
        let mem = unsafe {
            (fns.create_from_texture2d)(
                context.as_ptr() as cl_context,
                mem_flags(access),
                surface.as_raw(),
                plane.index(),
                &mut err,
            )
        };
        check("clCreateFromD3D11Texture2DKHR", err).map_err(fail)?;
        debug!(%surface, plane = plane.index(), "clCreateFromD3D11Texture2DKHR");
        Ok(MemId::from_ptr(mem as *mut c_void))
    }

    fn create_buffer(
        &self,
        context: ContextId,
        bytes: usize,
        access: MemAccess,
    ) -> ComputeResult<MemId> {
        let mut err: cl_int = CL_SUCCESS;
        // SAFETY: no host pointer.
        let mem = unsafe {
            clCreateBuffer(
                context.as_ptr() as cl_context,
                mem_flags(access),
                bytes,
                ptr::null_mut(),
                &mut err,
            )
        };
        check("clCreateBuffer", err).map_err(ComputeError::BufferCreateFailed)?;
        Ok(MemId::from_ptr(mem as *mut c_void))
    }

    fn build_program(
        &self,
        context: ContextId,
        device: DeviceId,
        source: &str,
        options: &str,
    ) -> ComputeResult<ProgramId> {
        let compile = |log: String| ComputeError::Compile { log };
        let src = CString::new(source).map_err(|e| compile(e.to_string()))?;
        let opts = CString::new(options).map_err(|e| compile(e.to_string()))?;
        let strings = [src.as_ptr()];
        let mut err: cl_int = CL_SUCCESS;
        // SAFETY: one NUL-terminated string, lengths null.
        let program = unsafe {
            clCreateProgramWithSource(
                context.as_ptr() as cl_context,
                1,
                strings.as_ptr(),
                ptr::null(),
                &mut err,
            )
        };
        check("clCreateProgramWithSource", err).map_err(compile)?;

        let devices = [device.as_ptr() as cl_device_id];
        // SAFETY: synchronous build for one device.
        let code = unsafe {
            clBuildProgram(program, 1, devices.as_ptr(), opts.as_ptr(), None, ptr::null_mut())
        };
        if code != CL_SUCCESS {
            let mut log = Self::build_log(program, devices[0]);
            if log.is_empty() {
                log = format!("clBuildProgram failed: {}", code);
            }
            // SAFETY: program was created above and is not shared.
            unsafe { clReleaseProgram(program) };
            return Err(compile(log));
        }
        Ok(ProgramId::from_ptr(program as *mut c_void))
    }

    fn create_kernel(&self, program: ProgramId, name: &str) -> ComputeResult<KernelId> {
        let fail = |reason: String| ComputeError::KernelCreateFailed {
            name: name.to_string(),
            reason,
        };
        let cname = CString::new(name).map_err(|e| fail(e.to_string()))?;
        let mut err: cl_int = CL_SUCCESS;
        // SAFETY: NUL-terminated entry point name.
        let kernel = unsafe {
            clCreateKernel(program.as_ptr() as opencl_sys::cl_program, cname.as_ptr(), &mut err)
        };
        check("clCreateKernel", err).map_err(fail)?;
        Ok(KernelId::from_ptr(kernel as *mut c_void))
    }

    fn set_kernel_arg(&self, kernel: KernelId, index: u32, value: &ArgValue) -> ComputeResult<()> {
        let bytes = value.as_bytes();
        // SAFETY: bytes is the exact size of the scalar or cl_mem.
        let code = unsafe {
            clSetKernelArg(
                kernel.as_ptr() as opencl_sys::cl_kernel,
                index,
                bytes.len(),
                bytes.as_ptr() as *const c_void,
            )
        };
        check("clSetKernelArg", code).map_err(|reason| ComputeError::ArgumentBindFailed { index, reason })
    }

    fn enqueue_acquire(
        &self,
        platform: PlatformId,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let call = "clEnqueueAcquireD3D11ObjectsKHR";
        let fns = self
            .sharing_for(platform)
            .ok_or_else(|| ComputeError::SyncFailed(format!("{} not resolved", call)))?;
        Self::enqueue_objects(fns.acquire, call, queue, mems, wait)
    }

    fn enqueue_release(
        &self,
        platform: PlatformId,
        queue: QueueId,
        mems: &[MemId],
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let call = "clEnqueueReleaseD3D11ObjectsKHR";
        let fns = self
            .sharing_for(platform)
            .ok_or_else(|| ComputeError::SyncFailed(format!("{} not resolved", call)))?;
        Self::enqueue_objects(fns.release, call, queue, mems, wait)
    }

    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        work: &WorkSize,
        wait: &[EventId],
    ) -> ComputeResult<EventId> {
        let events = raw_events(wait);
        let mut event: cl_event = ptr::null_mut();
        // SAFETY: 2-D sizes; slices outlive the call.
        let code = unsafe {
            clEnqueueNDRangeKernel(
                queue.as_ptr() as cl_command_queue,
                kernel.as_ptr() as opencl_sys::cl_kernel,
                2,
                ptr::null(),
                work.global.as_ptr(),
                work.local.as_ptr(),
                events.len() as cl_uint,
                list_ptr(&events),
                &mut event,
            )
        };
        check("clEnqueueNDRangeKernel", code).map_err(ComputeError::DispatchFailed)?;
        trace!(global = ?work.global, local = ?work.local, "clEnqueueNDRangeKernel");
        Ok(EventId::from_ptr(event as *mut c_void))
    }

    fn flush(&self, queue: QueueId) -> ComputeResult<()> {
        // SAFETY: queue is live.
        check("clFlush", unsafe { clFlush(queue.as_ptr() as cl_command_queue) })
            .map_err(ComputeError::SyncFailed)
    }

    fn finish(&self, queue: QueueId) -> ComputeResult<()> {
        // SAFETY: queue is live.
        check("clFinish", unsafe { clFinish(queue.as_ptr() as cl_command_queue) })
            .map_err(ComputeError::SyncFailed)
    }

    fn wait_for_events(&self, events: &[EventId]) -> ComputeResult<()> {
        let raw = raw_events(events);
        // SAFETY: raw holds `len` live events.
        check("clWaitForEvents", unsafe {
            clWaitForEvents(raw.len() as cl_uint, list_ptr(&raw))
        })
        .map_err(ComputeError::SyncFailed)
    }

    unsafe fn release_event(&self, event: EventId) {
        // SAFETY: the caller owns one reference and gives it up here.
        unsafe { clReleaseEvent(event.as_ptr() as cl_event) };
    }

    unsafe fn release_mem(&self, mem: MemId) {
        // SAFETY: as above.
        unsafe { clReleaseMemObject(mem.as_ptr() as cl_mem) };
    }

    unsafe fn release_kernel(&self, kernel: KernelId) {
        // SAFETY: as above.
        unsafe { clReleaseKernel(kernel.as_ptr() as opencl_sys::cl_kernel) };
    }

    unsafe fn release_program(&self, program: ProgramId) {
        // SAFETY: as above.
        unsafe { clReleaseProgram(program.as_ptr() as opencl_sys::cl_program) };
    }

    unsafe fn release_queue(&self, queue: QueueId) {
        // SAFETY: as above.
        unsafe { clReleaseCommandQueue(queue.as_ptr() as cl_command_queue) };
    }

    unsafe fn release_context(&self, context: ContextId) {
        // SAFETY: as above.
        unsafe { clReleaseContext(context.as_ptr() as cl_context) };
    }
}
