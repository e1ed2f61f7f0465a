//! Discovery and binding tests for surfbridge-compute.

use std::sync::Arc;

use surfbridge_compute::backend::{DriverCall, Fault, MockPlatform};
use surfbridge_compute::{
    Backend, ComputeDriver, ComputeError, DeviceClass, GraphicsDevice, InteropRuntime,
    RecordingDriver, RuntimeConfig, SurfaceHandle, create_driver, describe_backends,
    detect_backends,
};

fn runtime(driver: &Arc<RecordingDriver>, config: &RuntimeConfig) -> Result<InteropRuntime, ComputeError> {
    let dyn_driver: Arc<dyn ComputeDriver> = driver.clone();
    InteropRuntime::discover(dyn_driver, config)
}

#[test]
fn test_recording_backend_available() {
    assert!(Backend::Recording.is_available());
    let driver = create_driver(Backend::Recording).unwrap();
    assert_eq!(driver.name(), "recording");
}

#[test]
fn test_describe_backends() {
    let desc = describe_backends();
    assert!(desc.contains("[+] Recording"), "{}", desc);
    assert!(detect_backends().iter().any(|b| b.backend == Backend::Recording && b.available));
}

#[cfg(not(feature = "opencl"))]
#[test]
fn test_opencl_backend_needs_feature() {
    assert!(!Backend::OpenCl.is_available());
    assert!(matches!(
        create_driver(Backend::OpenCl),
        Err(ComputeError::BackendNotAvailable(_))
    ));
}

#[test]
fn test_discovery_skips_platforms_without_interop() {
    let driver = Arc::new(RecordingDriver::with_platforms(vec![
        MockPlatform::named("Legacy", "Acme").without_interop(),
        MockPlatform::named("pocl", "The pocl project").cpu_only(),
        MockPlatform::intel(),
    ]));
    let rt = runtime(&driver, &RuntimeConfig::default()).unwrap();
    let names: Vec<&str> = rt.candidates().iter().map(|p| p.info().name.as_str()).collect();
    assert_eq!(names, vec!["Intel(R) OpenCL HD Graphics"]);
}

#[test]
fn test_discovery_fails_without_candidates() {
    let driver = Arc::new(RecordingDriver::with_platforms(vec![
        MockPlatform::intel().without_interop(),
    ]));
    let err = runtime(&driver, &RuntimeConfig::default()).unwrap_err();
    assert!(matches!(err, ComputeError::PlatformDiscoveryFailed(_)));

    let driver = Arc::new(RecordingDriver::with_platforms(Vec::new()));
    let err = runtime(&driver, &RuntimeConfig::default()).unwrap_err();
    assert!(matches!(err, ComputeError::PlatformDiscoveryFailed(_)));

    let driver = Arc::new(RecordingDriver::new());
    driver.inject(Fault::Platforms);
    assert!(runtime(&driver, &RuntimeConfig::default()).is_err());
}

#[test]
fn test_vendor_filter() {
    let driver = Arc::new(RecordingDriver::with_platforms(vec![
        MockPlatform::named("NVIDIA CUDA", "NVIDIA Corporation"),
        MockPlatform::intel(),
    ]));
    let rt = runtime(&driver, &RuntimeConfig::intel_only()).unwrap();
    assert_eq!(rt.candidates().len(), 1);
    assert_eq!(rt.candidates()[0].info().vendor, "Intel(R) Corporation");
}

#[test]
fn test_environment_falls_through_candidates() {
    let first = GraphicsDevice::from_id(0x10);
    let second = GraphicsDevice::from_id(0x20);
    let driver = Arc::new(RecordingDriver::with_platforms(vec![
        MockPlatform::named("Discrete", "Vendor A").bound_to(first).discrete(),
        MockPlatform::intel().bound_to(second),
    ]));
    let rt = runtime(&driver, &RuntimeConfig::default()).unwrap();

    let env = rt.environment_for(second).unwrap();
    assert_eq!(env.platform().name, "Intel(R) OpenCL HD Graphics");
    assert_eq!(env.device_class(), DeviceClass::Integrated);

    let env = rt.environment_for(first).unwrap();
    assert_eq!(env.device_class(), DeviceClass::Discrete);

    let err = rt.environment_for(GraphicsDevice::from_id(0x30)).unwrap_err();
    assert!(matches!(err, ComputeError::DeviceBindingFailed(_)));
}

#[test]
fn test_environment_cached_per_device() {
    let driver = Arc::new(RecordingDriver::new());
    let rt = runtime(&driver, &RuntimeConfig::default()).unwrap();
    let graphics = GraphicsDevice::from_id(0xd3d);

    let a = rt.environment_for(graphics).unwrap();
    let b = rt.environment_for(graphics).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    let contexts = driver
        .calls()
        .iter()
        .filter(|c| matches!(c, DriverCall::CreateContext { .. }))
        .count();
    assert_eq!(contexts, 1);
}

#[test]
fn test_null_graphics_device_rejected() {
    let driver = Arc::new(RecordingDriver::new());
    let rt = runtime(&driver, &RuntimeConfig::default()).unwrap();
    let err = rt.environment_for(GraphicsDevice::from_id(0)).unwrap_err();
    assert!(matches!(err, ComputeError::DeviceBindingFailed(_)));
    assert_eq!(driver.live_contexts(), 0);
}

#[test]
fn test_shared_surface_import_failure_not_cached() {
    let driver = Arc::new(RecordingDriver::new());
    let rt = runtime(&driver, &RuntimeConfig::default()).unwrap();
    let env = rt.environment_for(GraphicsDevice::from_id(0xd3d)).unwrap();
    let surface = SurfaceHandle::from_id(0x77);

    driver.inject(Fault::Import);
    let err = env
        .create_shared_surface(surface, surfbridge_compute::Plane::Luma, true)
        .unwrap_err();
    assert!(matches!(err, ComputeError::SurfaceImportFailed { .. }));
    assert_eq!(env.shared_surface_count().unwrap(), 0);

    let mem = env
        .create_shared_surface(surface, surfbridge_compute::Plane::Luma, true)
        .unwrap();
    assert_eq!(
        env.create_shared_surface(surface, surfbridge_compute::Plane::Luma, true)
            .unwrap(),
        mem
    );
    assert_eq!(driver.import_count(), 1);
}
