//! Audio subsystem module

pub mod device;
pub mod frame;
pub mod jitter;
pub mod pool;
pub mod stream;

pub use device::{list_devices, DeviceInfo};
pub use frame::{EncodedFrame, Frame};
pub use jitter::{JitterBuffer, JitterStatus, ReorderBuffer};
pub use pool::{SlotId, SlotPool};
pub use stream::AudioStream;
