//! Exercises the C entry points against the process-global registry.
//!
//! Everything here shares one registry, so the tests serialize on a lock
//! and never assert absolute handle values, only signs and relationships.

use std::ffi::CString;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

use adad_ffi::{
    adad_read_buffer, adad_register, adad_unregister, adad_write_buffer, clear_pipeline,
    global_registry, install_pipeline, AdadCtlFn, EnginePipeline,
};
use adad_protocol::{DeviceError, DeviceId, InstanceId};

static ABI_LOCK: Mutex<()> = Mutex::new(());

static NEXT_INSTANCE: AtomicI32 = AtomicI32::new(1);
static CALLS: Mutex<Vec<(i16, i16, i32)>> = Mutex::new(Vec::new());

extern "C" fn obliging_ctl(device: i16, instance: i16, op: i32, _extra: usize) -> i32 {
    CALLS.lock().push((device, instance, op));
    if op == 1 {
        NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
    } else {
        0
    }
}

extern "C" fn refusing_ctl(_device: i16, _instance: i16, _op: i32, _extra: usize) -> i32 {
    -6
}

struct EchoPipeline;

impl EnginePipeline for EchoPipeline {
    fn accept_capture(
        &self,
        _device: DeviceId,
        _instance: InstanceId,
        samples: &[i16],
    ) -> Result<usize, DeviceError> {
        Ok(samples.len())
    }

    fn provide_playback(
        &self,
        _device: DeviceId,
        _instance: InstanceId,
        samples: &mut [i16],
    ) -> Result<usize, DeviceError> {
        samples.fill(7);
        Ok(samples.len())
    }
}

struct PanickyPipeline;

impl EnginePipeline for PanickyPipeline {
    fn accept_capture(
        &self,
        _device: DeviceId,
        _instance: InstanceId,
        _samples: &[i16],
    ) -> Result<usize, DeviceError> {
        panic!("capture path blew up");
    }

    fn provide_playback(
        &self,
        _device: DeviceId,
        _instance: InstanceId,
        _samples: &mut [i16],
    ) -> Result<usize, DeviceError> {
        panic!("playback path blew up");
    }
}

fn descriptor(name: &str, direction: u8) -> CString {
    CString::new(format!(
        r#"{{"name":"{name}","samplingRate":16000,"msPerBuffer":60,"channels":1,"direction":{direction}}}"#
    ))
    .unwrap()
}

fn register(json: &CString, ctl: AdadCtlFn) -> i16 {
    unsafe { adad_register(json.as_ptr(), Some(ctl)) }
}

fn write(device: i16, instance: i16, samples: &[i16]) -> i16 {
    unsafe { adad_write_buffer(device, instance, samples.as_ptr(), samples.len()) }
}

fn read(device: i16, instance: i16, samples: &mut [i16]) -> i16 {
    unsafe { adad_read_buffer(device, instance, samples.as_mut_ptr(), samples.len()) }
}

#[test]
fn register_rejects_unusable_input() {
    let _serial = ABI_LOCK.lock();

    assert_eq!(unsafe { adad_register(std::ptr::null(), Some(obliging_ctl)) }, -2);

    let valid = descriptor("mic", 1);
    assert_eq!(unsafe { adad_register(valid.as_ptr(), None) }, -2);

    let garbled = CString::new([0xffu8, 0xfe]).unwrap();
    assert_eq!(register(&garbled, obliging_ctl), -2);

    let malformed = CString::new("{\"samplingRate\":").unwrap();
    assert_eq!(register(&malformed, obliging_ctl), -2);

    let directionless = CString::new(r#"{"samplingRate":16000,"msPerBuffer":60,"channels":1}"#).unwrap();
    assert_eq!(register(&directionless, obliging_ctl), -2);
}

#[test]
fn register_and_unregister_round_trip() {
    let _serial = ABI_LOCK.lock();

    let first = register(&descriptor("mic", 1), obliging_ctl);
    let second = register(&descriptor("speaker", 2), obliging_ctl);
    assert!(first > 0);
    assert!(second > 0);
    assert_ne!(first, second);

    assert_eq!(adad_unregister(first), 0);
    assert_eq!(adad_unregister(second), 0);
    assert_eq!(adad_unregister(first), -3);
    assert_eq!(adad_unregister(0), -3);
    assert_eq!(adad_unregister(-7), -3);
}

#[test]
fn operations_reach_the_callback_as_wire_codes() {
    let _serial = ABI_LOCK.lock();

    let raw = register(&descriptor("mic", 1), obliging_ctl);
    assert!(raw > 0);
    let device = DeviceId::new(raw).unwrap();
    let registry = global_registry();

    CALLS.lock().clear();
    let instance = registry.create_instance(device).unwrap();
    registry.start(device, instance).unwrap();
    registry.pause(device, instance).unwrap();
    registry.resume(device, instance).unwrap();
    registry.stop(device, instance).unwrap();
    registry.reset(device, instance).unwrap();
    registry.restart(device, instance).unwrap();
    registry.destroy_instance(device, instance).unwrap();

    let observed = CALLS.lock().clone();
    let inst = instance.get();
    assert_eq!(
        observed,
        vec![
            (raw, 0, 1),
            (raw, inst, 3),
            (raw, inst, 5),
            (raw, inst, 6),
            (raw, inst, 4),
            (raw, inst, 7),
            (raw, inst, 8),
            (raw, inst, 2),
        ]
    );

    assert_eq!(adad_unregister(raw), 0);
}

#[test]
fn buffer_calls_validate_handles_in_order() {
    let _serial = ABI_LOCK.lock();
    clear_pipeline();

    let registry = global_registry();
    let mic = register(&descriptor("mic", 1), obliging_ctl);
    let speaker = register(&descriptor("speaker", 2), obliging_ctl);
    let instance = registry.create_instance(DeviceId::new(mic).unwrap()).unwrap();
    let inst = instance.get();

    let samples = [0i16; 16];
    assert_eq!(write(30_000, inst, &samples), -3);
    assert_eq!(write(0, inst, &samples), -3);
    assert_eq!(write(mic, 0, &samples), -4);
    assert_eq!(write(mic, -9, &samples), -4);

    let ghost = registry.create_instance(DeviceId::new(speaker).unwrap()).unwrap();
    registry
        .destroy_instance(DeviceId::new(speaker).unwrap(), ghost)
        .unwrap();
    assert_eq!(write(speaker, ghost.get(), &samples), -4);
    assert_eq!(write(speaker, inst, &samples), -5);

    assert_eq!(unsafe { adad_write_buffer(mic, inst, std::ptr::null(), 16) }, -1);
    assert_eq!(unsafe { adad_read_buffer(mic, inst, std::ptr::null_mut(), 16) }, -1);

    // handles check out but no pipeline is installed
    assert_eq!(write(mic, inst, &samples), -1);
    let mut sink = [0i16; 16];
    assert_eq!(read(mic, inst, &mut sink), -1);

    registry.destroy_instance(DeviceId::new(mic).unwrap(), instance).unwrap();
    assert_eq!(adad_unregister(mic), 0);
    assert_eq!(adad_unregister(speaker), 0);
}

#[test]
fn pipeline_round_trip_clamps_oversized_requests() {
    let _serial = ABI_LOCK.lock();
    install_pipeline(Box::new(EchoPipeline));

    let registry = global_registry();
    let raw = register(&descriptor("duplex", 3), obliging_ctl);
    let device = DeviceId::new(raw).unwrap();
    let instance = registry.create_instance(device).unwrap();
    let inst = instance.get();

    let small = [5i16; 960];
    assert_eq!(write(raw, inst, &small), 960);

    let huge = vec![5i16; 100_000];
    assert_eq!(write(raw, inst, &huge), i16::MAX);

    let mut out = vec![0i16; 960];
    assert_eq!(read(raw, inst, &mut out), 960);
    assert!(out.iter().all(|&s| s == 7));

    let mut big_out = vec![0i16; 100_000];
    assert_eq!(read(raw, inst, &mut big_out), i16::MAX);
    assert_eq!(big_out[i16::MAX as usize - 1], 7);
    assert_eq!(big_out[i16::MAX as usize], 0);

    registry.destroy_instance(device, instance).unwrap();
    assert_eq!(adad_unregister(raw), 0);
    clear_pipeline();
}

#[test]
fn panics_stop_at_the_boundary() {
    let _serial = ABI_LOCK.lock();
    install_pipeline(Box::new(PanickyPipeline));

    let registry = global_registry();
    let raw = register(&descriptor("volatile", 3), obliging_ctl);
    let device = DeviceId::new(raw).unwrap();
    let instance = registry.create_instance(device).unwrap();
    let inst = instance.get();

    let samples = [1i16; 8];
    assert_eq!(write(raw, inst, &samples), -1);
    let mut sink = [0i16; 8];
    assert_eq!(read(raw, inst, &mut sink), -1);

    registry.destroy_instance(device, instance).unwrap();
    assert_eq!(adad_unregister(raw), 0);
    clear_pipeline();
}

#[test]
fn application_refusal_passes_through_typed() {
    let _serial = ABI_LOCK.lock();

    let raw = register(&descriptor("reluctant", 2), obliging_ctl);
    let refused = register(&descriptor("reluctant-too", 2), refusing_ctl);
    assert!(raw > 0 && refused > 0);

    let registry = global_registry();
    let outcome = registry.create_instance(DeviceId::new(refused).unwrap());
    assert_eq!(outcome, Err(DeviceError::InvalidOperation));

    assert_eq!(adad_unregister(raw), 0);
    assert_eq!(adad_unregister(refused), 0);
}
