//! C surface of the device protocol.
//!
//! Exposes the four engine entry points C applications link against:
//! [`adad_register`], [`adad_unregister`], [`adad_write_buffer`] and
//! [`adad_read_buffer`]. They operate on one process-global
//! [`DeviceRegistry`]; the engine embedding this library plugs its audio
//! core in with [`install_pipeline`]. Handles, operation codes and status
//! codes are the protocol's 16-bit wire values throughout.
//!
//! Every entry point catches panics; nothing unwinds across the boundary.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use tracing::error;

use adad_protocol::{
    BufferExchange, ControlChannel, CtlOp, DeviceError, DeviceId, InstanceId, RESULT_OK,
};

pub use adad_host::{DeviceRegistry, EnginePipeline};

/// Most samples one ABI call will move. Oversized requests are clamped so
/// the transfer count always fits the `int16_t` return.
pub const MAX_TRANSFER_SAMPLES: usize = i16::MAX as usize;

/// Application control callback registered alongside a device descriptor.
///
/// `instance_id` is `0` for [`CtlOp::CreateInstance`]; the reply then
/// carries the new positive instance id. All other operations reply `0` on
/// success or a negative status code.
pub type AdadCtlFn =
    extern "C" fn(device_id: i16, instance_id: i16, op: i32, extra: usize) -> i32;

static PIPELINE: ArcSwapOption<Box<dyn EnginePipeline>> = ArcSwapOption::const_empty();

static REGISTRY: Lazy<DeviceRegistry> =
    Lazy::new(|| DeviceRegistry::new(Arc::new(InstalledPipeline)));

/// Indirection between the global registry and whatever pipeline the host
/// engine has installed. Traffic with no pipeline fails as `General`.
struct InstalledPipeline;

impl EnginePipeline for InstalledPipeline {
    fn accept_capture(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &[i16],
    ) -> Result<usize, DeviceError> {
        match PIPELINE.load_full() {
            Some(pipeline) => pipeline.accept_capture(device, instance, samples),
            None => Err(DeviceError::General),
        }
    }

    fn provide_playback(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &mut [i16],
    ) -> Result<usize, DeviceError> {
        match PIPELINE.load_full() {
            Some(pipeline) => pipeline.provide_playback(device, instance, samples),
            None => Err(DeviceError::General),
        }
    }
}

/// Adapter presenting a C callback as the registry's [`ControlChannel`].
struct FfiControlChannel {
    ctl: AdadCtlFn,
}

impl ControlChannel for FfiControlChannel {
    fn control(
        &self,
        device: DeviceId,
        instance: Option<InstanceId>,
        op: CtlOp,
        extra: usize,
    ) -> i32 {
        (self.ctl)(device.get(), instance.map_or(0, InstanceId::get), op.raw(), extra)
    }
}

/// Installs the engine's audio core behind the C surface. Replaces any
/// previously installed pipeline; live workers pick the new one up on their
/// next tick.
pub fn install_pipeline(pipeline: Box<dyn EnginePipeline>) {
    PIPELINE.store(Some(Arc::new(pipeline)));
}

/// Removes the installed pipeline. Subsequent buffer traffic fails with
/// `General` until another one is installed.
pub fn clear_pipeline() {
    PIPELINE.store(None);
}

/// The registry behind the C entry points, for engines that also drive
/// devices from Rust.
pub fn global_registry() -> &'static DeviceRegistry {
    &REGISTRY
}

fn guarded(entry: &'static str, f: impl FnOnce() -> i16) -> i16 {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(code) => code,
        Err(_) => {
            error!(entry, "panic caught at the C boundary");
            DeviceError::General.code()
        }
    }
}

fn resolve_handles(device_id: i16, instance_id: i16) -> Result<(DeviceId, InstanceId), i16> {
    let device = DeviceId::new(device_id).ok_or(DeviceError::InvalidDeviceId.code())?;
    let instance = InstanceId::new(instance_id).ok_or(DeviceError::InvalidInstanceId.code())?;
    Ok((device, instance))
}

/// Registers a device from its JSON descriptor and control callback.
///
/// `descriptor_json` must be a nul-terminated UTF-8 string; it is copied
/// before this returns. Replies with the new positive device id, or
/// `-2` when the descriptor or callback is unusable.
#[no_mangle]
pub unsafe extern "C" fn adad_register(
    descriptor_json: *const c_char,
    ctl: Option<AdadCtlFn>,
) -> i16 {
    let Some(ctl) = ctl else {
        return DeviceError::InvalidConfiguration.code();
    };
    if descriptor_json.is_null() {
        return DeviceError::InvalidConfiguration.code();
    }
    let json = match CStr::from_ptr(descriptor_json).to_str() {
        Ok(json) => json.to_owned(),
        Err(_) => return DeviceError::InvalidConfiguration.code(),
    };

    guarded("adad_register", move || {
        match REGISTRY.register_json(&json, Arc::new(FfiControlChannel { ctl })) {
            Ok(device) => device.get(),
            Err(err) => err.code(),
        }
    })
}

/// Unregisters a device, force-destroying any instances still alive.
#[no_mangle]
pub extern "C" fn adad_unregister(device_id: i16) -> i16 {
    let Some(device) = DeviceId::new(device_id) else {
        return DeviceError::InvalidDeviceId.code();
    };
    guarded("adad_unregister", move || match REGISTRY.unregister(device) {
        Ok(()) => RESULT_OK,
        Err(err) => err.code(),
    })
}

/// Delivers captured samples from an input instance to the engine.
///
/// `samples` must point at `count` readable `int16_t` values. Replies with
/// the number of samples accepted, possibly fewer than offered, or a
/// negative status code.
#[no_mangle]
pub unsafe extern "C" fn adad_write_buffer(
    device_id: i16,
    instance_id: i16,
    samples: *const i16,
    count: usize,
) -> i16 {
    let (device, instance) = match resolve_handles(device_id, instance_id) {
        Ok(handles) => handles,
        Err(code) => return code,
    };
    if samples.is_null() {
        return DeviceError::General.code();
    }
    let buffer = std::slice::from_raw_parts(samples, count.min(MAX_TRANSFER_SAMPLES));

    guarded("adad_write_buffer", || {
        match REGISTRY.write_buffer(device, instance, buffer) {
            Ok(accepted) => i16::try_from(accepted).unwrap_or(i16::MAX),
            Err(err) => err.code(),
        }
    })
}

/// Fetches playback samples from the engine for an output instance.
///
/// `samples` must point at `count` writable `int16_t` values. Replies with
/// the number of samples produced, possibly fewer than requested, or a
/// negative status code.
#[no_mangle]
pub unsafe extern "C" fn adad_read_buffer(
    device_id: i16,
    instance_id: i16,
    samples: *mut i16,
    count: usize,
) -> i16 {
    let (device, instance) = match resolve_handles(device_id, instance_id) {
        Ok(handles) => handles,
        Err(code) => return code,
    };
    if samples.is_null() {
        return DeviceError::General.code();
    }
    let buffer = std::slice::from_raw_parts_mut(samples, count.min(MAX_TRANSFER_SAMPLES));

    guarded("adad_read_buffer", || {
        match REGISTRY.read_buffer(device, instance, buffer) {
            Ok(produced) => i16::try_from(produced).unwrap_or(i16::MAX),
            Err(err) => err.code(),
        }
    })
}
