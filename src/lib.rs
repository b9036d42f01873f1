//! # Tuyaface
//!
//! Client for the Tuya local protocol (v3.1 and v3.3): query and control
//! Tuya-compatible devices over TCP without the cloud.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tuyaface::Device;
//!
//! # async fn run() -> tuyaface::error::Result<()> {
//! let device = Device::new("DEVICE_ID", "192.168.1.20", "DEVICE_LOCAL_KEY", "3.3");
//! let status = device.status().await?;
//! println!("{}", status["dps"]);
//! device.set_state(true).await?;
//! # Ok(())
//! # }
//! ```
//!
#[macro_use]
mod macros;
pub mod crypto;
pub mod device;
pub mod error;
pub mod payload;
pub mod protocol;
pub mod runtime;
mod session;
pub mod sync;

pub use device::{Device, DeviceBuilder, DeviceConfig};
pub use error::TuyaError;
pub use payload::Reply;
pub use protocol::{CommandType, Version};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
