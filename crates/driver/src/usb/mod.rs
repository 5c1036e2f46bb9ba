//! USB subsystem
//!
//! The production [`common::Transport`] and [`common::Backend`]: adapters are
//! found by vendor and product id, identified by their serial number string,
//! and opened with interface 0 claimed.

pub mod backend;
pub mod device;
pub mod transfers;

pub use backend::RusbBackend;
pub use device::UsbAdapter;
pub use transfers::map_rusb_error;
