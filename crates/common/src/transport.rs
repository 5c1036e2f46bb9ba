//! USB transport seam
//!
//! The driver never talks to a USB library directly. Raw control and bulk
//! transfers go through [`Transport`], and enumeration goes through
//! [`Backend`]. The production implementation is libusb-backed; the firmware
//! emulator in [`crate::test_utils`] implements the same traits.

use protocol::{CanMessage, ControlSetup, UsbError};
use std::time::Duration;

/// An opened adapter: raw transfers on one claimed interface
///
/// Implementations are not required to tolerate concurrent calls; callers
/// hold `&mut` for the duration of each transfer.
pub trait Transport: Send {
    /// Device-to-host control transfer; returns bytes read into `buf`
    fn read_control(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Host-to-device control transfer; returns bytes written
    fn write_control(
        &mut self,
        setup: &ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Bulk IN transfer; returns bytes read into `buf`
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration)
    -> Result<usize, UsbError>;

    /// Bulk OUT transfer; returns bytes the device accepted
    fn write_bulk(&mut self, endpoint: u8, data: &[u8], timeout: Duration)
    -> Result<usize, UsbError>;

    /// Largest payload a single bulk OUT transfer may carry
    fn max_bulk_transfer(&self) -> usize;

    /// Select an alternate setting on the claimed interface
    fn set_alternate_setting(&mut self, setting: u8) -> Result<(), UsbError>;

    /// Currently selected alternate setting
    fn alternate_setting(&mut self) -> Result<u8, UsbError>;
}

/// Enumerates adapters and opens them by serial number
pub trait Backend: Send + Sync {
    /// USB serial numbers of attached adapters, in enumeration order
    fn serial_numbers(&self) -> Result<Vec<String>, UsbError>;

    /// Open and claim the adapter with `serial`
    fn open(&self, serial: &str) -> Result<Box<dyn Transport>, UsbError>;
}

/// Outcome of a cancellable receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome {
    /// At least one record arrived
    Messages(Vec<CanMessage>),
    /// The cancellation token fired first
    Cancelled,
    /// The deadline passed with nothing received
    TimedOut,
}
