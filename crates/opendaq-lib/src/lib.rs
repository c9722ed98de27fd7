//! opendaq-lib — host-side driver for openDAQ serial data-acquisition boards.

pub mod calib;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod protocol;
pub mod transport;

pub use config::DaqConfig;
pub use device::{Color, DeviceInfo, OpenDaq};
pub use error::DaqError;
pub use models::{HwModel, ModelRegistry};
