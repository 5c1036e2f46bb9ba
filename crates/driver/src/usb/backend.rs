//! Adapter enumeration over libusb

use super::device::UsbAdapter;
use super::transfers::map_rusb_error;
use common::{Backend, Transport};
use protocol::{PRODUCT_ID, UsbError, VENDOR_ID};
use rusb::{Context, Device, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for reading the serial number string descriptor
const STRING_TIMEOUT: Duration = Duration::from_millis(500);

/// [`Backend`] that finds adapters by vendor/product id on the host's buses
pub struct RusbBackend {
    context: Context,
}

impl RusbBackend {
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self { context })
    }

    /// Attached adapters paired with their serial numbers
    fn adapters(&self) -> Result<Vec<(Device<Context>, String)>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                continue;
            }

            match read_serial(&device) {
                Ok(serial) => found.push((device, serial)),
                Err(e) => warn!(
                    "Skipping adapter on bus {} addr {}: cannot read serial ({})",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        debug!("Enumerated {} adapter(s)", found.len());
        Ok(found)
    }
}

fn read_serial(device: &Device<Context>) -> Result<String, UsbError> {
    let descriptor = device.device_descriptor().map_err(map_rusb_error)?;
    let handle = device.open().map_err(map_rusb_error)?;
    let language = handle
        .read_languages(STRING_TIMEOUT)
        .map_err(map_rusb_error)?
        .into_iter()
        .next()
        .ok_or(UsbError::NotFound)?;
    handle
        .read_serial_number_string(language, &descriptor, STRING_TIMEOUT)
        .map_err(map_rusb_error)
}

impl Backend for RusbBackend {
    fn serial_numbers(&self) -> Result<Vec<String>, UsbError> {
        Ok(self
            .adapters()?
            .into_iter()
            .map(|(_, serial)| serial)
            .collect())
    }

    fn open(&self, serial: &str) -> Result<Box<dyn Transport>, UsbError> {
        let (device, _) = self
            .adapters()?
            .into_iter()
            .find(|(_, candidate)| candidate == serial)
            .ok_or(UsbError::NotFound)?;

        Ok(Box::new(UsbAdapter::open(&device, serial)?))
    }
}
