//! Boundary between the device registry and the engine's audio core.

use adad_protocol::{DeviceError, DeviceId, InstanceId};

/// Audio core behind the registry.
///
/// [`DeviceRegistry`] forwards validated buffer traffic here, one call per
/// instance worker tick. Returning fewer samples than offered or requested
/// is a partial transfer, not an error; workers note the shortfall and stay
/// on cadence.
///
/// [`DeviceRegistry`]: crate::DeviceRegistry
pub trait EnginePipeline: Send + Sync {
    /// Consumes captured samples arriving from an input instance; returns
    /// how many were accepted.
    fn accept_capture(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &[i16],
    ) -> Result<usize, DeviceError>;

    /// Produces playback samples for an output instance; returns how many
    /// were written into `samples`.
    fn provide_playback(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &mut [i16],
    ) -> Result<usize, DeviceError>;
}

/// Pipeline that swallows capture and plays silence. Useful for tests and
/// for hosts that bring devices up before their audio core.
pub struct SilentPipeline;

impl EnginePipeline for SilentPipeline {
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
        samples.fill(0);
        Ok(samples.len())
    }
}
