//! Filter tests for surfbridge-compute, run on the recording driver.

use std::sync::Arc;

use surfbridge_compute::backend::{ArgValue, DriverCall, Fault};
use surfbridge_compute::{
    ComputeBuffer, ComputeDriver, ComputeEnvironment, ComputeError, ConversionDirection, Extent, FilterChain,
    FilterStore, GraphicsDevice, InferenceInput, InteropRuntime, KernelKind, KernelState, MemAccess,
    PixelLayout, RecordingDriver, RuntimeConfig, SurfaceHandle,
};

const SRC: SurfaceHandle = SurfaceHandle::from_id(0x1000);
const DST: SurfaceHandle = SurfaceHandle::from_id(0x2000);

fn setup() -> (Arc<RecordingDriver>, Arc<ComputeEnvironment>, FilterStore) {
    let driver = Arc::new(RecordingDriver::new());
    let dyn_driver: Arc<dyn ComputeDriver> = driver.clone();
    let runtime = InteropRuntime::discover(dyn_driver, &RuntimeConfig::default()).unwrap();
    let env = runtime.environment_for(GraphicsDevice::from_id(0xd3d)).unwrap();
    let store = FilterStore::with_default_kernels(env.clone()).unwrap();
    (driver, env, store)
}

fn rgb_buffer(env: &ComputeEnvironment, extent: Extent) -> Arc<ComputeBuffer> {
    let bytes = PixelLayout::RgbPlanarF32.frame_bytes(extent) as usize;
    Arc::new(env.create_buffer(bytes, MemAccess::ReadWrite).unwrap())
}

/// Calls recorded between the acquire and the release of the last run.
fn run_calls(driver: &RecordingDriver) -> Vec<DriverCall> {
    driver
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(
                c,
                DriverCall::Acquire { .. } | DriverCall::Dispatch { .. } | DriverCall::Release { .. }
            )
        })
        .collect()
}

// =============================================================================
// Border padding
// =============================================================================

#[test]
fn test_border_pad_geometry() {
    let (driver, _env, store) = setup();
    let mut filter = store.create(KernelKind::BorderPad).unwrap();
    let pad = filter.as_border_pad_mut().unwrap();
    pad.set_arguments(SRC, DST, Extent::new(640, 480), 16).unwrap();

    assert_eq!(pad.luma_work().global, [640, 480]);
    assert_eq!(pad.luma_work().local, [8, 8]);
    assert_eq!(pad.chroma_work().global, [320, 240]);
    assert_eq!(pad.chroma_work().local, [8, 8]);

    let (luma, chroma) = pad.kernels();
    let (luma, chroma) = (luma.id(), chroma.id());
    filter.run().unwrap();

    assert_eq!(driver.kernel_arg(luma, 2), Some(ArgValue::Int(480)));
    assert_eq!(driver.kernel_arg(luma, 3), Some(ArgValue::Int(640)));
    assert_eq!(driver.kernel_arg(luma, 4), Some(ArgValue::Int(16)));
    assert_eq!(driver.kernel_arg(chroma, 2), Some(ArgValue::Int(240)));
    assert_eq!(driver.kernel_arg(chroma, 3), Some(ArgValue::Int(320)));
    assert_eq!(driver.kernel_arg(chroma, 4), Some(ArgValue::Int(8)));
}

#[test]
fn test_border_pad_event_ordering() {
    let (driver, _env, store) = setup();
    let mut filter = store.create_kernel("copyMakeBorder").unwrap();
    filter
        .as_border_pad_mut()
        .unwrap()
        .set_arguments(SRC, DST, Extent::new(64, 32), 4)
        .unwrap();
    driver.clear_calls();
    filter.run().unwrap();

    let calls = run_calls(&driver);
    assert_eq!(calls.len(), 4, "{:?}", calls);
    let acquire = match &calls[0] {
        DriverCall::Acquire { event, mems, wait } => {
            assert_eq!(mems.len(), 4);
            assert!(wait.is_empty());
            *event
        }
        other => panic!("expected acquire, got {:?}", other),
    };
    let mut dispatched = Vec::new();
    for call in &calls[1..3] {
        match call {
            DriverCall::Dispatch { event, name, wait, .. } => {
                assert_eq!(name, "copyMakeBorder");
                assert_eq!(wait, &vec![acquire]);
                dispatched.push(*event);
            }
            other => panic!("expected dispatch, got {:?}", other),
        }
    }
    match &calls[3] {
        DriverCall::Release { mems, wait, .. } => {
            assert_eq!(mems.len(), 4);
            assert_eq!(wait, &dispatched);
        }
        other => panic!("expected release, got {:?}", other),
    }

    assert!(driver.acquired().is_empty());
    assert_eq!(driver.live_events(), 0);
    assert_eq!(filter.state(), KernelState::Executed);
}

#[test]
fn test_surfaces_imported_once() {
    let (driver, env, store) = setup();
    let mut filter = store.create(KernelKind::BorderPad).unwrap();
    let pad = filter.as_border_pad_mut().unwrap();

    pad.set_arguments(SRC, DST, Extent::new(64, 32), 4).unwrap();
    let first = pad.luma_args().clone();
    assert_eq!(driver.import_count(), 4);

    pad.set_arguments(SRC, DST, Extent::new(64, 32), 4).unwrap();
    assert_eq!(pad.state(), KernelState::Configured);
    assert_eq!(pad.luma_args(), &first);
    assert_eq!(driver.import_count(), 4);
    assert_eq!(env.shared_surface_count().unwrap(), 4);

    filter.run().unwrap();
    filter.run().unwrap();
    assert_eq!(driver.import_count(), 4);
}

#[test]
fn test_border_pad_rejects_bad_geometry() {
    let (driver, _env, store) = setup();
    let mut filter = store.create(KernelKind::BorderPad).unwrap();
    let pad = filter.as_border_pad_mut().unwrap();

    for (extent, border) in [
        (Extent::new(0, 480), 16),
        (Extent::new(641, 480), 16),
        (Extent::new(640, 480), 0),
        (Extent::new(640, 480), 3),
    ] {
        let err = pad.set_arguments(SRC, DST, extent, border).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidArgument(_)), "{:?}", err);
    }
    let err = pad
        .set_arguments(SurfaceHandle::from_id(0), DST, Extent::new(8, 8), 2)
        .unwrap_err();
    assert!(matches!(err, ComputeError::InvalidArgument(_)));

    assert_eq!(pad.state(), KernelState::Unconfigured);
    assert_eq!(driver.import_count(), 0);
    assert!(matches!(filter.run(), Err(ComputeError::NotConfigured("copyMakeBorder"))));
}

#[test]
fn test_dispatch_failure_releases_surfaces() {
    let (driver, _env, store) = setup();
    let mut filter = store.create(KernelKind::BorderPad).unwrap();
    filter
        .as_border_pad_mut()
        .unwrap()
        .set_arguments(SRC, DST, Extent::new(16, 16), 2)
        .unwrap();
    driver.inject(Fault::Dispatch);

    let err = filter.run().unwrap_err();
    assert!(matches!(err, ComputeError::DispatchFailed(_)), "{:?}", err);
    assert!(driver.acquired().is_empty());
    assert_eq!(driver.live_events(), 0);
    assert_eq!(filter.state(), KernelState::Configured);

    filter.run().unwrap();
    assert_eq!(filter.state(), KernelState::Executed);
}

#[test]
fn test_acquire_failure_reported() {
    let (driver, _env, store) = setup();
    let mut filter = store.create(KernelKind::BorderPad).unwrap();
    filter
        .as_border_pad_mut()
        .unwrap()
        .set_arguments(SRC, DST, Extent::new(16, 16), 2)
        .unwrap();
    driver.inject(Fault::Acquire);
    driver.clear_calls();

    assert!(matches!(filter.run(), Err(ComputeError::SyncFailed(_))));
    assert!(run_calls(&driver).is_empty());
}

// =============================================================================
// Format conversion
// =============================================================================

#[test]
fn test_conversion_blocking_order() {
    let (driver, env, store) = setup();
    let extent = Extent::new(64, 32);
    let rgb = rgb_buffer(&env, extent);
    let mut filter = store.create_kernel("fmtConversion").unwrap();
    let conv = filter.as_format_conversion_mut().unwrap();
    conv.set_arguments_nv12_to_rgb(SRC, &rgb, extent).unwrap();

    assert_eq!(conv.direction(), ConversionDirection::Nv12ToRgb);
    assert_eq!(conv.work().global, [32, 16]);
    let kernel = conv.active_kernel().id();

    driver.clear_calls();
    filter.run().unwrap();

    let calls = driver.calls();
    let position = |f: &dyn Fn(&DriverCall) -> bool| calls.iter().position(f).unwrap();
    let acquire = position(&|c| matches!(c, DriverCall::Acquire { .. }));
    let dispatch = position(&|c| matches!(c, DriverCall::Dispatch { .. }));
    let release = position(&|c| matches!(c, DriverCall::Release { .. }));
    let finishes: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, DriverCall::Finish { .. }))
        .map(|(i, _)| i)
        .collect();
    assert!(acquire < finishes[0] && finishes[0] < dispatch);
    assert!(dispatch < release && release < finishes[1]);

    assert_eq!(driver.kernel_arg(kernel, 2), Some(ArgValue::Mem(rgb.mem())));
    assert_eq!(driver.kernel_arg(kernel, 3), Some(ArgValue::Int(64)));
    assert_eq!(driver.kernel_arg(kernel, 4), Some(ArgValue::Int(64 * 32)));
    assert!(driver.acquired().is_empty());
}

#[test]
fn test_conversion_handoff() {
    let (_driver, env, store) = setup();
    let extent = Extent::new(16, 8);
    let rgb = rgb_buffer(&env, extent);
    let mut filter = store.create(KernelKind::FormatConversion).unwrap();
    let conv = filter.as_format_conversion_mut().unwrap();

    conv.set_arguments_nv12_to_rgb(SRC, &rgb, extent).unwrap();
    assert!(conv.handoff().is_err());
    conv.run().unwrap();
    assert_eq!(
        conv.handoff().unwrap(),
        InferenceInput::ComputeBuffer {
            mem: rgb.mem(),
            layout: PixelLayout::RgbPlanarF32,
            extent,
        }
    );

    conv.set_arguments_rgb_to_nv12(&rgb, DST, extent).unwrap();
    conv.run().unwrap();
    let back = conv.handoff().unwrap();
    assert_eq!(back.layout(), PixelLayout::Nv12);
    assert!(matches!(back, InferenceInput::SharedSurface { surface, .. } if surface == DST));
}

#[test]
fn test_conversion_keeps_output_buffer_alive() {
    let (driver, env, store) = setup();
    let extent = Extent::new(16, 8);
    let rgb = rgb_buffer(&env, extent);
    let mem = rgb.mem();
    let mut filter = store.create(KernelKind::FormatConversion).unwrap();
    let conv = filter.as_format_conversion_mut().unwrap();
    conv.set_arguments_nv12_to_rgb(SRC, &rgb, extent).unwrap();
    let live = driver.live_mems();

    drop(rgb);
    assert_eq!(driver.live_mems(), live);
    conv.run().unwrap();
    assert_eq!(conv.state(), KernelState::Executed);
    assert!(matches!(
        conv.handoff().unwrap(),
        InferenceInput::ComputeBuffer { mem: out, .. } if out == mem
    ));

    // The reverse direction reads the buffer; a temporary survives the run.
    conv.set_arguments_rgb_to_nv12(&rgb_buffer(&env, extent), SRC, extent)
        .unwrap();
    assert_eq!(driver.live_mems(), live);
    conv.run().unwrap();

    drop(filter);
    assert_eq!(driver.live_mems(), live - 1);
}

#[test]
fn test_conversion_buffer_too_small() {
    let (_driver, env, store) = setup();
    let extent = Extent::new(16, 8);
    let small = Arc::new(env.create_buffer(16, MemAccess::ReadWrite).unwrap());
    let mut filter = store.create(KernelKind::FormatConversion).unwrap();
    let err = filter
        .as_format_conversion_mut()
        .unwrap()
        .set_arguments_nv12_to_rgb(SRC, &small, extent)
        .unwrap_err();
    assert!(matches!(err, ComputeError::InvalidArgument(_)));
}

// =============================================================================
// Source repack
// =============================================================================

#[test]
fn test_repack_order_and_scale() {
    let (driver, env, store) = setup();
    let extent = Extent::new(32, 16);
    let rgb = rgb_buffer(&env, extent);
    let mut filter = store.create_kernel("srcConversion").unwrap();
    let repack = filter.as_source_repack_mut().unwrap();
    repack
        .set_arguments_scaled(SRC, &rgb, extent, 1.0 / 255.0)
        .unwrap();
    let kernel = repack.kernel().id();

    driver.clear_calls();
    filter.run().unwrap();

    let calls = run_calls(&driver);
    assert!(matches!(calls[0], DriverCall::Acquire { .. }));
    assert!(matches!(calls[1], DriverCall::Dispatch { .. }));
    assert!(matches!(calls[2], DriverCall::Release { .. }));
    assert_eq!(calls.len(), 3);

    match driver.kernel_arg(kernel, 4) {
        Some(ArgValue::Float(scale)) => approx::assert_relative_eq!(scale, 1.0 / 255.0),
        other => panic!("unexpected scale argument {:?}", other),
    }
    assert_eq!(driver.kernel_arg(kernel, 2), Some(ArgValue::Int(32)));
    assert_eq!(driver.kernel_arg(kernel, 3), Some(ArgValue::Int(16)));

    let input = filter.as_source_repack_mut().unwrap().handoff().unwrap();
    assert!(input.is_device_resident());
    assert_eq!(input.extent(), extent);
}

#[test]
fn test_repack_keeps_output_buffer_alive() {
    let (driver, env, store) = setup();
    let extent = Extent::new(8, 8);
    let rgb = rgb_buffer(&env, extent);
    let mut filter = store.create(KernelKind::SourceRepack).unwrap();
    filter
        .as_source_repack_mut()
        .unwrap()
        .set_arguments(SRC, &rgb, extent)
        .unwrap();
    let live = driver.live_mems();

    drop(rgb);
    filter.run().unwrap();
    assert_eq!(driver.live_mems(), live);
    assert!(filter.as_source_repack_mut().unwrap().handoff().is_ok());

    drop(filter);
    assert_eq!(driver.live_mems(), live - 1);
}

#[test]
fn test_repack_rejects_non_finite_scale() {
    let (_driver, env, store) = setup();
    let extent = Extent::new(8, 8);
    let rgb = rgb_buffer(&env, extent);
    let mut filter = store.create(KernelKind::SourceRepack).unwrap();
    let err = filter
        .as_source_repack_mut()
        .unwrap()
        .set_arguments_scaled(SRC, &rgb, extent, f32::NAN)
        .unwrap_err();
    assert!(matches!(err, ComputeError::InvalidArgument(_)));
}

// =============================================================================
// Store and chain
// =============================================================================

#[test]
fn test_unknown_kernel_makes_no_native_calls() {
    let (driver, _env, store) = setup();
    let before = driver.call_count();
    let err = store.create_kernel("unknown_filter").unwrap_err();
    assert!(matches!(err, ComputeError::UnknownKernel(ref name) if name == "unknown_filter"));
    assert_eq!(driver.call_count(), before);
}

#[test]
fn test_invalid_source_reports_log() {
    let (driver, env, _store) = setup();
    let programs = driver.live_programs();
    let err = FilterStore::build(env, "__kernel void broken(int a) {").unwrap_err();
    match err {
        ComputeError::Compile { log } => assert!(!log.is_empty()),
        other => panic!("expected compile error, got {:?}", other),
    }
    assert_eq!(driver.live_programs(), programs);
}

#[test]
fn test_chain_reports_failing_stage() {
    let (driver, env, store) = setup();
    let extent = Extent::new(32, 16);
    let rgb = rgb_buffer(&env, extent);

    let mut pad = store.create(KernelKind::BorderPad).unwrap();
    pad.as_border_pad_mut()
        .unwrap()
        .set_arguments(SRC, DST, extent, 4)
        .unwrap();
    let mut conv = store.create(KernelKind::FormatConversion).unwrap();
    conv.as_format_conversion_mut()
        .unwrap()
        .set_arguments_nv12_to_rgb(DST, &rgb, extent.padded(4))
        .unwrap_err();

    let mut chain = FilterChain::new();
    chain.push(pad).push(conv);
    assert_eq!(chain.len(), 2);

    let err = chain.run().unwrap_err();
    match err {
        ComputeError::StageFailed { index, kernel, source } => {
            assert_eq!(index, 1);
            assert_eq!(kernel, "fmtConversion");
            assert!(matches!(*source, ComputeError::NotConfigured(_)));
        }
        other => panic!("expected stage failure, got {:?}", other),
    }
    assert_eq!(chain.stage(0).unwrap().state(), KernelState::Executed);
    assert!(driver.acquired().is_empty());
}

#[test]
fn test_teardown_releases_everything() {
    let driver = {
        let (driver, env, store) = setup();
        let mut filter = store.create(KernelKind::BorderPad).unwrap();
        filter
            .as_border_pad_mut()
            .unwrap()
            .set_arguments(SRC, DST, Extent::new(16, 16), 2)
            .unwrap();
        filter.run().unwrap();
        drop(filter);
        drop(store);
        drop(env);
        driver
    };
    // The runtime's cache was dropped with the environment's last owner.
    assert_eq!(driver.live_kernels(), 0);
    assert_eq!(driver.live_programs(), 0);
    assert_eq!(driver.live_mems(), 0);
    assert_eq!(driver.live_queues(), 0);
    assert_eq!(driver.live_contexts(), 0);
}
