//! Adapter discovery and exclusive sessions
//!
//! The [`DeviceRegistry`] lists attached adapters and opens them. Exclusivity
//! within the process is enforced by a [`ClaimTable`]: opening an adapter
//! takes a [`Claim`] on its serial number before the USB handle is opened,
//! and the claim is given back when the session closes or is dropped.

use crate::session::{Session, Timeouts};
use crate::usb::RusbBackend;
use common::{Backend, Error, Result};
use protocol::{DeviceDescriptor, UsbError};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

static CLAIMS: LazyLock<ClaimTable> = LazyLock::new(ClaimTable::new);

/// Serial numbers held by open sessions
///
/// Clones share one table. Outside this crate the only table is the
/// process-wide one returned by [`ClaimTable::global`].
#[derive(Debug, Clone)]
pub struct ClaimTable {
    held: Arc<Mutex<HashSet<String>>>,
}

impl ClaimTable {
    pub(crate) fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The process-wide claim table
    pub fn global() -> Self {
        CLAIMS.clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `serial`, failing if an open session already holds it
    pub fn try_claim(&self, serial: &str) -> Result<Claim> {
        if !self.lock().insert(serial.to_string()) {
            return Err(Error::AlreadyClaimed(serial.to_string()));
        }
        debug!("Claimed {}", serial);
        Ok(Claim {
            table: self.clone(),
            serial: serial.to_string(),
        })
    }

    pub fn is_claimed(&self, serial: &str) -> bool {
        self.lock().contains(serial)
    }

    fn release(&self, serial: &str) {
        if self.lock().remove(serial) {
            debug!("Released {}", serial);
        }
    }
}

/// Exclusive hold on one serial number, released on drop
#[derive(Debug)]
pub struct Claim {
    table: ClaimTable,
    serial: String,
}

impl Claim {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Give the serial number back now
    pub fn release(self) {}
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.table.release(&self.serial);
    }
}

/// Enumerates adapters and opens exclusive sessions on them
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn Backend>,
    claims: ClaimTable,
    timeouts: Timeouts,
}

impl DeviceRegistry {
    /// Registry over `backend` using the process-wide claim table
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::with_claims(backend, ClaimTable::global())
    }

    /// Registry with its own claim table
    pub(crate) fn with_claims(backend: impl Backend + 'static, claims: ClaimTable) -> Self {
        Self {
            backend: Arc::new(backend),
            claims,
            timeouts: Timeouts::default(),
        }
    }

    /// Registry over the host's USB buses
    pub fn usb() -> Result<Self> {
        Ok(Self::new(RusbBackend::new()?))
    }

    /// Timeouts handed to every session this registry opens
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn claims(&self) -> &ClaimTable {
        &self.claims
    }

    /// Attached adapters not held by an open session, in enumeration order
    pub fn list_available(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .connected()?
            .into_iter()
            .filter(|descriptor| !self.claims.is_claimed(descriptor.serial()))
            .collect())
    }

    /// Every attached adapter with a well-formed serial number
    fn connected(&self) -> Result<Vec<DeviceDescriptor>> {
        let serials = self.backend.serial_numbers()?;
        Ok(serials
            .into_iter()
            .filter_map(|serial| match DeviceDescriptor::parse(serial) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    debug!("Ignoring adapter: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Open an exclusive session
    ///
    /// An empty `serial` selects the first available adapter.
    pub fn open(&self, serial: &str) -> Result<Session> {
        let connected = self.connected()?;

        if serial.is_empty() {
            let mut last_error = Error::NoDevice;
            for descriptor in connected {
                match self.open_descriptor(descriptor) {
                    Err(e @ Error::AlreadyClaimed(_)) => last_error = e,
                    other => return other,
                }
            }
            return Err(match last_error {
                // Every adapter was taken
                Error::AlreadyClaimed(_) => Error::NoDevice,
                other => other,
            });
        }

        let descriptor = connected
            .into_iter()
            .find(|descriptor| descriptor.serial() == serial)
            .ok_or(Error::NoDevice)?;
        self.open_descriptor(descriptor)
    }

    fn open_descriptor(&self, descriptor: DeviceDescriptor) -> Result<Session> {
        // Claim first so concurrent opens of one serial cannot both reach the device
        let claim = self.claims.try_claim(descriptor.serial())?;

        let transport = self
            .backend
            .open(descriptor.serial())
            .map_err(|e| match e {
                UsbError::NotFound | UsbError::NoDevice => Error::NoDevice,
                other => Error::Usb(other),
            })?;

        info!("Opened adapter {}", descriptor);
        Ok(Session::new(descriptor, transport, claim, self.timeouts))
    }
}
