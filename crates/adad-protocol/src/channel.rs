//! Control and data planes of the device protocol.

use crate::error::DeviceError;
use crate::id::{DeviceId, InstanceId};

/// Lifecycle operations the engine requests over the control channel.
///
/// Discriminants are the wire values shared with the C surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CtlOp {
    /// Create a fresh instance of the device; the reply carries its id.
    CreateInstance = 1,
    /// Tear the instance down and release everything it holds.
    DestroyInstance = 2,
    /// Launch the buffer-exchange worker.
    Start = 3,
    /// Halt the worker and wait for it to exit.
    Stop = 4,
    /// Keep the worker on cadence but stop moving samples.
    Pause = 5,
    /// Resume sample movement after a pause.
    Resume = 6,
    /// Return a stopped instance to its just-created state.
    Reset = 7,
    /// Stop followed by start in one request.
    Restart = 8,
}

impl CtlOp {
    /// Decodes a wire discriminant.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            1 => Some(CtlOp::CreateInstance),
            2 => Some(CtlOp::DestroyInstance),
            3 => Some(CtlOp::Start),
            4 => Some(CtlOp::Stop),
            5 => Some(CtlOp::Pause),
            6 => Some(CtlOp::Resume),
            7 => Some(CtlOp::Reset),
            8 => Some(CtlOp::Restart),
            _ => None,
        }
    }

    /// Wire discriminant of the operation.
    pub fn raw(self) -> i32 {
        self as i32
    }
}

/// Application-side callback the engine drives lifecycle transitions
/// through.
///
/// Replies are raw wire codes: [`CtlOp::CreateInstance`] answers with the
/// positive id of the new instance, every other operation with `0` on
/// success, and failures with a negative [`DeviceError`] code. `extra` is
/// reserved for operation-specific payloads and is currently always `0`.
///
/// The registry drops its internal lock before invoking this, so
/// implementations may safely call back into registry operations.
pub trait ControlChannel: Send + Sync {
    fn control(
        &self,
        device: DeviceId,
        instance: Option<InstanceId>,
        op: CtlOp,
        extra: usize,
    ) -> i32;
}

/// Engine-facing sample plane used by instance workers.
///
/// Transfers are counted in interleaved `i16` samples. Moving fewer samples
/// than requested is a partial transfer, not an error; callers note the
/// shortfall and stay on cadence.
pub trait BufferExchange: Send + Sync {
    /// Pushes captured samples toward the engine, returning how many were
    /// accepted.
    fn write_buffer(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &[i16],
    ) -> Result<usize, DeviceError>;

    /// Pulls playback samples from the engine, returning how many were
    /// written into `samples`.
    fn read_buffer(
        &self,
        device: DeviceId,
        instance: InstanceId,
        samples: &mut [i16],
    ) -> Result<usize, DeviceError>;
}
