//! Sample endpoints behind a device.
//!
//! A [`DeviceDriver`] stands for whatever real audio the application wraps:
//! a capture handle, a socket, a decoder. Workers open fresh endpoints on
//! every start so a stop/start cycle never sees stale state. The built-in
//! sources and sinks cover tests, demos and devices that are intentionally
//! one-directional.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rand::Rng;

/// Factory for the sample endpoints backing one device.
///
/// One driver serves every instance of its device. The defaults produce
/// silence and discard playback, so a driver only overrides the legs its
/// direction actually uses.
pub trait DeviceDriver: Send + Sync {
    /// Opens the capture endpoint for an input-capable instance.
    fn open_source(&self) -> Box<dyn SampleSource> {
        Box::new(SilenceSource)
    }

    /// Opens the playback endpoint for an output-capable instance.
    fn open_sink(&self) -> Box<dyn SampleSink> {
        Box::new(NullSink)
    }
}

/// Produces the application's captured PCM.
pub trait SampleSource: Send {
    /// Fills the whole of `buffer` with the next samples.
    fn pull(&mut self, buffer: &mut [i16]);
}

/// Consumes the PCM the engine plays through the device.
pub trait SampleSink: Send {
    fn push(&mut self, buffer: &[i16]);
}

/// Source producing digital silence.
pub struct SilenceSource;

impl SampleSource for SilenceSource {
    fn pull(&mut self, buffer: &mut [i16]) {
        buffer.fill(0);
    }
}

/// Sink that discards everything pushed into it.
pub struct NullSink;

impl SampleSink for NullSink {
    fn push(&mut self, _buffer: &[i16]) {}
}

/// Free-running sine oscillator, handy for demos and soak tests.
pub struct SineSource {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl SineSource {
    /// Creates an oscillator at `frequency_hz` for the given sampling rate.
    /// `amplitude` is clamped to `0.0..=1.0` of full scale.
    pub fn new(frequency_hz: f32, sampling_rate: u32, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / sampling_rate.max(1) as f32,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }
}

impl SampleSource for SineSource {
    fn pull(&mut self, buffer: &mut [i16]) {
        for sample in buffer.iter_mut() {
            *sample = (self.phase.sin() * self.amplitude * f32::from(i16::MAX)) as i16;
            self.phase += self.step;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}

/// White noise source.
pub struct NoiseSource {
    amplitude: f32,
}

impl NoiseSource {
    /// Creates a noise source at the given fraction of full scale.
    pub fn new(amplitude: f32) -> Self {
        Self {
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }
}

impl SampleSource for NoiseSource {
    fn pull(&mut self, buffer: &mut [i16]) {
        let mut rng = rand::thread_rng();
        let peak = (self.amplitude * f32::from(i16::MAX)) as i32;
        for sample in buffer.iter_mut() {
            *sample = rng.gen_range(-peak..=peak) as i16;
        }
    }
}

/// Read side of a [`LevelMeterSink`]. Cheap to clone and safe to poll from
/// any thread.
#[derive(Debug, Clone, Default)]
pub struct LevelProbe {
    level: Arc<AtomicU32>,
}

impl LevelProbe {
    /// Mean absolute sample value of the most recent buffer, `0..=32767`.
    pub fn level(&self) -> u16 {
        self.level.load(Ordering::Relaxed) as u16
    }
}

/// Sink that tracks the mean absolute level of each pushed buffer, the way
/// a VU meter would.
pub struct LevelMeterSink {
    probe: LevelProbe,
}

impl LevelMeterSink {
    /// Creates a meter publishing into `probe`.
    pub fn new(probe: LevelProbe) -> Self {
        Self { probe }
    }
}

impl SampleSink for LevelMeterSink {
    fn push(&mut self, buffer: &[i16]) {
        if buffer.is_empty() {
            return;
        }
        let total: u64 = buffer.iter().map(|s| u64::from(s.unsigned_abs())).sum();
        let mean = (total / buffer.len() as u64) as u32;
        self.probe.level.store(mean, Ordering::Relaxed);
    }
}
