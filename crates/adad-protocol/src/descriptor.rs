//! Device descriptors and their JSON wire form.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// Highest sampling rate a descriptor may declare, in hertz.
pub const MAX_SAMPLING_RATE: i32 = 384_000;
/// Longest exchange cadence a descriptor may declare, in milliseconds.
pub const MAX_MS_PER_BUFFER: i32 = 1_000;
/// Widest channel layout a descriptor may declare.
pub const MAX_CHANNELS: i32 = 32;

/// Transfer direction of a device, seen from the engine.
///
/// The JSON form is the protocol's integer encoding. In-range integers
/// without a meaning decode to [`Direction::Unknown`], which registration
/// rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Direction {
    /// Direction left unspecified.
    #[default]
    Unknown,
    /// Application feeds the engine (microphone-style capture).
    Input,
    /// Engine feeds the application (speaker-style playback).
    Output,
    /// Both legs serviced on every exchange cycle.
    Both,
}

impl From<u8> for Direction {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Direction::Input,
            2 => Direction::Output,
            3 => Direction::Both,
            _ => Direction::Unknown,
        }
    }
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Unknown => 0,
            Direction::Input => 1,
            Direction::Output => 2,
            Direction::Both => 3,
        }
    }
}

impl Direction {
    /// True when the engine reads captured samples from the device.
    pub fn has_capture(self) -> bool {
        matches!(self, Direction::Input | Direction::Both)
    }

    /// True when the engine sends playback samples to the device.
    pub fn has_playback(self) -> bool {
        matches!(self, Direction::Output | Direction::Both)
    }
}

/// Description of an application-defined audio device, as carried in the
/// JSON registration payload.
///
/// Field names follow the engine's configuration schema. Every field is
/// optional on the wire and defaults to zero or empty;
/// [`AudioDeviceDescriptor::validate`] decides whether the result is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioDeviceDescriptor {
    /// Advisory id from the configuration source. The engine assigns its own
    /// handle and ignores this one.
    pub device_id: i32,
    /// Sampling rate in hertz.
    pub sampling_rate: i32,
    /// Cadence of one buffer exchange, in milliseconds.
    pub ms_per_buffer: i32,
    /// Interleaved channel count.
    pub channels: i32,
    /// Transfer direction seen from the engine.
    pub direction: Direction,
    /// Software gain hint in percent; `0` means unity.
    pub boost_percentage: i32,
    /// Marks the device as application-defined.
    pub is_adad: bool,
    /// Human readable device name.
    pub name: String,
    /// Manufacturer string for display purposes.
    pub manufacturer: String,
    /// Model string for display purposes.
    pub model: String,
    /// Platform hardware identifier, if any.
    pub hardware_id: String,
    /// Serial number string, if any.
    pub serial_number: String,
    /// Whether the device should be offered as a default choice.
    pub is_default: bool,
    /// Free-form device category.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque application payload carried alongside the descriptor.
    pub extra: String,
}

impl AudioDeviceDescriptor {
    /// Parses the JSON registration payload.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Checks the fields the exchange cadence and buffer sizing depend on.
    ///
    /// Rates, cadences and channel counts must be positive and within the
    /// `MAX_*` bounds, and the direction must be explicit. Display-only
    /// fields are never validated.
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.sampling_rate <= 0 || self.sampling_rate > MAX_SAMPLING_RATE {
            return Err(DeviceError::InvalidConfiguration);
        }
        if self.ms_per_buffer <= 0 || self.ms_per_buffer > MAX_MS_PER_BUFFER {
            return Err(DeviceError::InvalidConfiguration);
        }
        if self.channels <= 0 || self.channels > MAX_CHANNELS {
            return Err(DeviceError::InvalidConfiguration);
        }
        if self.direction == Direction::Unknown {
            return Err(DeviceError::InvalidConfiguration);
        }
        Ok(())
    }

    /// Frames moved in one exchange cycle.
    pub fn frames_per_buffer(&self) -> usize {
        (self.sampling_rate.max(0) as u64 * self.ms_per_buffer.max(0) as u64 / 1_000) as usize
    }

    /// Interleaved samples moved in one exchange cycle.
    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer() * self.channels.max(0) as usize
    }

    /// Wake cadence of the instance worker.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.ms_per_buffer.max(0) as u64)
    }
}

/// Fuzzing entry point: parse and size an arbitrary descriptor payload.
#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_parse_descriptor(data: &[u8]) {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(descriptor) = AudioDeviceDescriptor::from_json(text) {
        let _ = descriptor.validate();
        let _ = descriptor.samples_per_buffer();
        let _ = descriptor.cadence();
    }
}
