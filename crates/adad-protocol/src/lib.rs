//! Shared vocabulary of the application-defined audio device protocol.
//!
//! Both sides of the boundary speak in these types: the engine-side registry
//! (`adad-host`) and the application-side runtime (`adad-sdk`). Everything
//! here is wire-stable; handle values, operation discriminants and error
//! codes survive a C ABI crossing unchanged.

pub mod channel;
pub mod descriptor;
pub mod error;
pub mod id;

pub use channel::{BufferExchange, ControlChannel, CtlOp};
#[cfg(any(test, feature = "fuzzing"))]
pub use descriptor::fuzz_parse_descriptor;
pub use descriptor::{AudioDeviceDescriptor, Direction};
pub use error::{DeviceError, RESULT_OK};
pub use id::{DeviceId, InstanceId};
