//! libusb-backed adapter handle
//!
//! Wraps an opened rusb device handle with interface 0 claimed and
//! implements [`Transport`] on top of it. The interface is released, and any
//! kernel driver we detached is reattached, when the handle is dropped.

use super::transfers::map_rusb_error;
use common::Transport;
use protocol::{ControlSetup, INTERFACE, SERIAL_SEND_ENDPOINT, UsbError};
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType};
use std::time::Duration;
use tracing::{debug, warn};

/// Packet size assumed when the endpoint descriptor cannot be read
const FALLBACK_MAX_PACKET: usize = 64;

/// Standard GET_INTERFACE request
const GET_INTERFACE: u8 = 0x0A;

/// An opened adapter with its interface claimed
pub struct UsbAdapter {
    handle: DeviceHandle<Context>,
    serial: String,
    max_bulk: usize,
    kernel_driver_detached: bool,
}

impl UsbAdapter {
    /// Open `device`, detach any kernel driver and claim interface 0
    pub fn open(device: &Device<Context>, serial: &str) -> Result<Self, UsbError> {
        let handle = device.open().map_err(|e| {
            warn!("Failed to open adapter {}: {}", serial, e);
            map_rusb_error(e)
        })?;

        let kernel_driver_detached = match handle.kernel_driver_active(INTERFACE) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", INTERFACE);
                handle.detach_kernel_driver(INTERFACE).map_err(map_rusb_error)?;
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("Could not check kernel driver status: {}", e);
                false
            }
        };

        handle.claim_interface(INTERFACE).map_err(|e| {
            warn!("Failed to claim interface {} on {}: {}", INTERFACE, serial, e);
            map_rusb_error(e)
        })?;

        let max_bulk = serial_endpoint_packet_size(device).unwrap_or(FALLBACK_MAX_PACKET);
        debug!(
            "Claimed interface {} on {} (serial endpoint packet size {})",
            INTERFACE, serial, max_bulk
        );

        Ok(Self {
            handle,
            serial: serial.to_string(),
            max_bulk,
            kernel_driver_detached,
        })
    }
}

/// Max packet size of the serial bulk OUT endpoint in the active config
fn serial_endpoint_packet_size(device: &Device<Context>) -> Option<usize> {
    let config = device.active_config_descriptor().ok()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.address() == SERIAL_SEND_ENDPOINT {
                    return Some(usize::from(endpoint.max_packet_size()));
                }
            }
        }
    }
    None
}

impl Transport for UsbAdapter {
    fn read_control(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                buf,
                timeout,
            )
            .map_err(map_rusb_error)
    }

    fn write_control(
        &mut self,
        setup: &ControlSetup,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                timeout,
            )
            .map_err(map_rusb_error)
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(map_rusb_error)
    }

    fn max_bulk_transfer(&self) -> usize {
        self.max_bulk
    }

    fn set_alternate_setting(&mut self, setting: u8) -> Result<(), UsbError> {
        self.handle
            .set_alternate_setting(INTERFACE, setting)
            .map_err(map_rusb_error)
    }

    fn alternate_setting(&mut self) -> Result<u8, UsbError> {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Standard, Recipient::Interface);
        let mut buf = [0u8; 1];
        let n = self
            .handle
            .read_control(
                request_type,
                GET_INTERFACE,
                0,
                u16::from(INTERFACE),
                &mut buf,
                Duration::from_secs(1),
            )
            .map_err(map_rusb_error)?;
        if n == 0 {
            return Err(UsbError::Io);
        }
        Ok(buf[0])
    }
}

impl Drop for UsbAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(INTERFACE) {
            debug!("Could not release interface on {}: {}", self.serial, e);
        }
        if self.kernel_driver_detached
            && let Err(e) = self.handle.attach_kernel_driver(INTERFACE)
        {
            debug!("Could not reattach kernel driver on {}: {}", self.serial, e);
        }
        debug!("Closed adapter {}", self.serial);
    }
}
