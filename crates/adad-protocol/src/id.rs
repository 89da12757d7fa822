//! Handle newtypes used on both sides of the device boundary.

use std::fmt;

/// Engine-assigned handle of a registered device.
///
/// Valid handles are strictly positive. Zero and the negative range are
/// reserved for status codes on the wire, so a `DeviceId` can never carry
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(i16);

impl DeviceId {
    /// Wraps a raw wire value, refusing the non-positive range.
    pub fn new(raw: i16) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Raw wire value of the handle.
    pub fn get(self) -> i16 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application-assigned handle of a device instance.
///
/// Allocated by the application when it answers a create request and echoed
/// back by the engine on every later call. Like [`DeviceId`], always
/// strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(i16);

impl InstanceId {
    /// Wraps a raw wire value, refusing the non-positive range.
    pub fn new(raw: i16) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Raw wire value of the handle.
    pub fn get(self) -> i16 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_handles() {
        assert!(DeviceId::new(0).is_none());
        assert!(DeviceId::new(-3).is_none());
        assert!(InstanceId::new(0).is_none());
        assert!(InstanceId::new(i16::MIN).is_none());
    }

    #[test]
    fn preserves_raw_value() {
        let id = DeviceId::new(41).unwrap();
        assert_eq!(id.get(), 41);
        assert_eq!(id.to_string(), "41");

        let id = InstanceId::new(i16::MAX).unwrap();
        assert_eq!(id.get(), i16::MAX);
    }
}
