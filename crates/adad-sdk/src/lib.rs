//! Application-side runtime for application-defined audio devices.
//!
//! An engine drives device lifecycles through the protocol's
//! [`ControlChannel`]; this crate answers those requests. [`DeviceRuntime`]
//! tracks the instances of every device the application has registered,
//! [`DeviceInstance`] holds the per-instance state machine, and each running
//! instance owns a worker thread that exchanges one buffer of samples per
//! cadence tick through the engine's [`BufferExchange`] surface. Real sample
//! endpoints plug in through [`DeviceDriver`].
//!
//! [`ControlChannel`]: adad_protocol::ControlChannel
//! [`BufferExchange`]: adad_protocol::BufferExchange

pub mod instance;
pub mod io;
pub mod runtime;

mod worker;

pub use instance::{DeviceInstance, InstanceState, InstanceStats};
pub use io::{
    DeviceDriver, LevelMeterSink, LevelProbe, NoiseSource, NullSink, SampleSink, SampleSource,
    SilenceSource, SineSource,
};
pub use runtime::DeviceRuntime;
