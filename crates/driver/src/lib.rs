//! TEMPer USB thermometer driver
//!
//! Finds TEMPer sensor sticks on the USB bus, takes them over from the
//! kernel HID driver, runs the vendor initialization handshake and reads
//! calibrated temperatures. All USB calls are blocking with a fixed 5 s
//! timeout; callers that need concurrency should run the driver on its own
//! thread.
//!
//! ```no_run
//! use driver::DeviceContext;
//!
//! # fn main() -> driver::Result<()> {
//! let context = DeviceContext::open()?;
//! for device in context.catalog().enumerate()? {
//!     let mut stick = context.handshake(&device)?;
//!     println!("stick {}: {:.2}", stick.index(), stick.read_temperature(0)?);
//! }
//! context.close();
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod codec;
pub mod context;
pub mod error;
mod handshake;
pub mod stick;
pub mod test_utils;
pub mod transport;

pub use catalog::{DeviceCatalog, DeviceIdentity, DeviceRef};
pub use codec::{TemperatureSample, decode, encode_read_command};
pub use context::DeviceContext;
pub use error::{Error, HandshakeStep, Result, TransferFault};
pub use stick::{Stick, StickState};
pub use transport::{StickIo, UsbBus};
