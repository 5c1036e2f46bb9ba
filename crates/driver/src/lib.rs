//! Host-side driver for the USB CAN/LIN adapter
//!
//! Open an adapter through the [`DeviceRegistry`], configure it with the
//! [`ControlChannel`], then exchange traffic through the [`CanChannel`] and
//! [`SerialChannel`]. A [`Session`] is exclusive within the process and
//! releases the adapter when dropped.
//!
//! # Example
//!
//! ```no_run
//! use driver::DeviceRegistry;
//! use protocol::{CanBus, SafetyMode};
//!
//! # fn main() -> common::Result<()> {
//! let registry = DeviceRegistry::usb()?;
//! let mut session = registry.open("")?;
//! session.control().set_safety_mode(SafetyMode::AllOutput)?;
//! session.can().send(0x123, false, &[1, 2, 3], CanBus::Can1)?;
//! for msg in session.can().recv()? {
//!     println!("{:#x} on {}: {:02x?}", msg.address, msg.bus, msg.payload());
//! }
//! # Ok(())
//! # }
//! ```

pub mod can;
pub mod config;
pub mod control;
pub mod health;
pub mod registry;
pub mod serial;
pub mod session;
pub mod usb;
pub mod worker;

pub use can::CanChannel;
pub use config::DriverConfig;
pub use control::ControlChannel;
pub use health::format_health;
pub use registry::{Claim, ClaimTable, DeviceRegistry};
pub use serial::SerialChannel;
pub use session::{Session, SessionState, Timeouts};
pub use worker::spawn_session_worker;
