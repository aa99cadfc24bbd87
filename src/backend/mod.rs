//! Device backends implementing the driver capability

pub mod device;
pub mod playback;
pub mod sink;

pub use device::{default_output_device, get_output_device, list_output_devices, OutputDevice};
pub use playback::CpalOutput;
pub use sink::PacedSink;
