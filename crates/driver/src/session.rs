//! Exclusive adapter sessions
//!
//! A [`Session`] owns the transport for one adapter and the claim on its
//! serial number. All I/O goes through one of its channels, each of which
//! borrows the session mutably for the duration of the call.

use crate::can::CanChannel;
use crate::control::ControlChannel;
use crate::registry::Claim;
use crate::serial::SerialChannel;
use common::{Error, Result, Transport};
use protocol::{DeviceDescriptor, UsbError};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-transfer timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Every control transfer
    pub control: Duration,
    /// CAN and serial bulk OUT
    pub bulk_write: Duration,
    /// A single CAN bulk IN read
    pub bulk_read: Duration,
    /// Read slice between cancellation checks in a blocking receive
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_secs(5),
            bulk_write: Duration::from_secs(5),
            bulk_read: Duration::from_millis(100),
            poll: Duration::from_millis(20),
        }
    }
}

/// Lifecycle of a session after it was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// One exclusively opened adapter
pub struct Session {
    descriptor: DeviceDescriptor,
    transport: Option<Box<dyn Transport>>,
    claim: Option<Claim>,
    timeouts: Timeouts,
}

impl Session {
    pub(crate) fn new(
        descriptor: DeviceDescriptor,
        transport: Box<dyn Transport>,
        claim: Claim,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            descriptor,
            transport: Some(transport),
            claim: Some(claim),
            timeouts,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn serial_number(&self) -> &str {
        self.descriptor.serial()
    }

    pub fn state(&self) -> SessionState {
        if self.transport.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.timeouts = timeouts;
    }

    /// Configuration and query requests
    pub fn control(&mut self) -> ControlChannel<'_> {
        ControlChannel::new(self)
    }

    /// CAN framing over the bulk endpoints
    pub fn can(&mut self) -> CanChannel<'_> {
        CanChannel::new(self)
    }

    /// Serial (debug, ESP and LIN) byte streams
    pub fn serial(&mut self) -> SerialChannel<'_> {
        SerialChannel::new(self)
    }

    /// Select an alternate setting on interface 0
    pub fn set_alt_setting(&mut self, setting: u8) -> Result<()> {
        self.transfer(|transport, _| transport.set_alternate_setting(setting))
    }

    /// Current alternate setting of interface 0
    pub fn alt_setting(&mut self) -> Result<u8> {
        self.transfer(|transport, _| transport.alternate_setting())
    }

    /// Largest bulk OUT payload the transport accepts
    pub fn max_bulk_transfer(&self) -> Result<usize> {
        self.transport
            .as_ref()
            .map(|transport| transport.max_bulk_transfer())
            .ok_or(Error::SessionClosed)
    }

    /// Release the USB handle and the claim; later calls fail with `SessionClosed`
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("Closed adapter {}", self.descriptor);
        }
        self.claim.take();
    }

    /// Run one transfer, closing the session if the device is gone
    pub(crate) fn transfer<T>(
        &mut self,
        op: impl FnOnce(&mut dyn Transport, Timeouts) -> std::result::Result<T, UsbError>,
    ) -> Result<T> {
        let transport = self.transport.as_mut().ok_or(Error::SessionClosed)?;
        match op(&mut **transport, self.timeouts) {
            Ok(value) => Ok(value),
            Err(e) if e.is_fatal() => {
                warn!("Adapter {} lost: {}", self.descriptor, e);
                self.close();
                Err(Error::Usb(e))
            }
            Err(e) => {
                debug!("Transfer on {} failed: {}", self.descriptor, e);
                Err(Error::Usb(e))
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("serial", &self.descriptor.serial())
            .field("state", &self.state())
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClaimTable, DeviceRegistry};
    use common::test_utils::MockBackend;

    fn open_one() -> (MockBackend, DeviceRegistry, Session) {
        let backend = MockBackend::with_adapters(1);
        let registry = DeviceRegistry::with_claims(backend.clone(), ClaimTable::new());
        let session = registry.open("").unwrap();
        (backend, registry, session)
    }

    #[test]
    fn test_close_releases_claim() {
        let (_backend, registry, mut session) = open_one();
        assert!(registry.claims().is_claimed(session.serial_number()));

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!registry.claims().is_claimed(session.serial_number()));
    }

    #[test]
    fn test_closed_session_rejects_calls() {
        let (backend, _registry, mut session) = open_one();
        session.close();
        let before = backend.adapters()[0].transfer_count();

        assert!(matches!(session.alt_setting(), Err(Error::SessionClosed)));
        assert!(matches!(session.max_bulk_transfer(), Err(Error::SessionClosed)));
        assert_eq!(backend.adapters()[0].transfer_count(), before);
    }

    #[test]
    fn test_disconnect_closes_session() {
        let (backend, registry, mut session) = open_one();
        backend.adapters()[0].disconnect();

        assert!(matches!(
            session.alt_setting(),
            Err(Error::Usb(UsbError::NoDevice))
        ));
        assert!(!session.is_open());
        assert!(!registry.claims().is_claimed(session.serial_number()));
    }

    #[test]
    fn test_recoverable_error_keeps_session_open() {
        let (backend, _registry, mut session) = open_one();
        backend.adapters()[0].inject_failure(UsbError::Pipe);

        assert!(matches!(session.alt_setting(), Err(Error::Usb(UsbError::Pipe))));
        assert!(session.is_open());
        assert_eq!(session.alt_setting().unwrap(), 0);
    }

    #[test]
    fn test_alt_setting_round_trip() {
        let (_backend, _registry, mut session) = open_one();
        session.set_alt_setting(1).unwrap();
        assert_eq!(session.alt_setting().unwrap(), 1);
    }
}
