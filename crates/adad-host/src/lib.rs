//! Engine-side host for application-defined audio devices.
//!
//! Applications register virtual devices with a [`DeviceRegistry`] and hand
//! it a control callback; the engine then addresses every device and
//! instance purely through 16-bit handles. Sample traffic validated by the
//! registry is forwarded to the engine's audio core through the
//! [`EnginePipeline`] trait.

pub mod pipeline;
pub mod registry;

pub use pipeline::{EnginePipeline, SilentPipeline};
pub use registry::DeviceRegistry;
