use thiserror::Error;

/// Wire status of a successful call.
pub const RESULT_OK: i16 = 0;

/// Protocol failures with stable negative wire codes.
///
/// The codes cross the C boundary unchanged, so the mapping in
/// [`DeviceError::code`] is part of the protocol and must never be
/// renumbered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// Catch-all for failures with no more specific code.
    #[error("general device failure")]
    General,
    /// The descriptor was malformed or missing required fields.
    #[error("invalid device configuration")]
    InvalidConfiguration,
    /// No registered device carries the given id.
    #[error("unknown device id")]
    InvalidDeviceId,
    /// No live instance carries the given id.
    #[error("unknown instance id")]
    InvalidInstanceId,
    /// The instance exists but belongs to a different device.
    #[error("instance not owned by the addressed device")]
    InvalidCombinedId,
    /// The operation is not legal in the instance's current state.
    #[error("operation not legal in the current state")]
    InvalidOperation,
}

impl DeviceError {
    /// Wire code of the error.
    pub fn code(self) -> i16 {
        match self {
            DeviceError::General => -1,
            DeviceError::InvalidConfiguration => -2,
            DeviceError::InvalidDeviceId => -3,
            DeviceError::InvalidInstanceId => -4,
            DeviceError::InvalidCombinedId => -5,
            DeviceError::InvalidOperation => -6,
        }
    }

    /// Decodes a wire status. Non-negative values are successes and decode
    /// to `None`; unrecognized negative values collapse to
    /// [`DeviceError::General`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(DeviceError::General),
            -2 => Some(DeviceError::InvalidConfiguration),
            -3 => Some(DeviceError::InvalidDeviceId),
            -4 => Some(DeviceError::InvalidInstanceId),
            -5 => Some(DeviceError::InvalidCombinedId),
            -6 => Some(DeviceError::InvalidOperation),
            code if code < 0 => Some(DeviceError::General),
            _ => None,
        }
    }
}
