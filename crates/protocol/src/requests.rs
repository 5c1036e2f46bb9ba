//! Control-transfer request table
//!
//! Every configuration or query operation maps to one fixed
//! (bmRequestType, bRequest, wValue, wIndex, wLength) tuple. The table in
//! [`ControlRequest::setup`] is the device contract and must not drift from
//! the firmware.

use crate::error::{ProtocolError, Result};
use crate::types::{CanBus, CanClearTarget, GmlanTarget, HealthStatus, Parity, SafetyMode, SerialPort};
use serde::{Deserialize, Serialize};

/// Adapter USB vendor ID
pub const VENDOR_ID: u16 = 0xBBAA;
/// Adapter USB product ID
pub const PRODUCT_ID: u16 = 0xDDCC;
/// Interface carrying all endpoints
pub const INTERFACE: u8 = 0;

/// Vendor request, device recipient, device-to-host
pub const REQUEST_IN: u8 = 0xC0;
/// Vendor request, device recipient, host-to-device
pub const REQUEST_OUT: u8 = 0x40;

/// Bulk IN endpoint delivering CAN records
pub const CAN_RECV_ENDPOINT: u8 = 0x81;
/// Bulk OUT endpoint for port-prefixed serial data
pub const SERIAL_SEND_ENDPOINT: u8 = 0x02;
/// Bulk OUT endpoint for CAN records
pub const CAN_SEND_ENDPOINT: u8 = 0x03;

/// Bulk IN buffer for one CAN receive (256 records)
pub const CAN_RECV_BUFFER_SIZE: usize = 0x10 * 256;
/// Largest serial payload per bulk OUT transfer, excluding the port byte
pub const SERIAL_CHUNK_SIZE: usize = 0x20;
/// Serial bytes returned by one read request
pub const SERIAL_READ_SIZE: u16 = 0x40;

const VERSION_SIZE: u16 = 0x40;
const SERIAL_BLOCK_SIZE: u16 = 0x20;
const SECRET_SIZE: u16 = 0x10;

/// Largest CAN speed expressible as kbps * 10 in a u16
pub const MAX_CAN_SPEED_KBPS: u16 = u16::MAX / 10;
/// UART baud rates are sent in units of 300 baud
pub const BAUD_UNIT: u32 = 300;

/// Transfer direction encoded in bit 7 of bmRequestType
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Setup packet for one control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength (response size for IN requests)
    pub length: u16,
}

impl ControlSetup {
    fn input(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: REQUEST_IN,
            request,
            value,
            index,
            length,
        }
    }

    fn output(request: u8, value: u16, index: u16) -> Self {
        Self {
            request_type: REQUEST_OUT,
            request,
            value,
            index,
            length: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Configuration and query operations carried over control transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    GetHealth,
    EnterBootloader,
    GetVersion,
    GetSerial,
    GetSecret,
    SetUsbPower(bool),
    SetEspPower(bool),
    EspReset { bootmode: u16 },
    SetSafetyMode(SafetyMode),
    SetCanForwarding { from: CanBus, to: CanBus },
    SetGmlan(GmlanTarget),
    SetCanLoopback(bool),
    SetCanSpeed { bus: CanBus, kbps: u16 },
    SetUartBaud { port: SerialPort, rate: u32 },
    SetUartParity { port: SerialPort, parity: Parity },
    CanClear(CanClearTarget),
    SerialRead(SerialPort),
    SerialClear(SerialPort),
}

impl ControlRequest {
    /// Check parameters that must fit the 16-bit setup fields
    pub fn validate(&self) -> Result<()> {
        match *self {
            ControlRequest::SetCanSpeed { bus, kbps } => {
                if bus == CanBus::Unknown {
                    return Err(ProtocolError::InvalidBus(bus.code()));
                }
                if kbps == 0 || kbps > MAX_CAN_SPEED_KBPS {
                    return Err(ProtocolError::ParameterOutOfRange(format!(
                        "CAN speed {} kbps (1..={})",
                        kbps, MAX_CAN_SPEED_KBPS
                    )));
                }
            }
            ControlRequest::SetUartBaud { rate, .. } => {
                let units = rate / BAUD_UNIT;
                if units == 0 || units > u32::from(u16::MAX) {
                    return Err(ProtocolError::ParameterOutOfRange(format!(
                        "baud rate {}",
                        rate
                    )));
                }
            }
            ControlRequest::SetCanForwarding { from, to } => {
                for bus in [from, to] {
                    if bus == CanBus::Unknown {
                        return Err(ProtocolError::InvalidBus(bus.code()));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// The wire tuple for this request
    pub fn setup(&self) -> ControlSetup {
        match *self {
            ControlRequest::GetHealth => {
                ControlSetup::input(0xD2, 0, 0, HealthStatus::WIRE_SIZE as u16)
            }
            ControlRequest::EnterBootloader => ControlSetup::output(0xD1, 0, 0),
            ControlRequest::GetVersion => ControlSetup::input(0xD6, 0, 0, VERSION_SIZE),
            ControlRequest::GetSerial => ControlSetup::input(0xD0, 0, 0, SERIAL_BLOCK_SIZE),
            ControlRequest::GetSecret => ControlSetup::input(0xD0, 1, 0, SECRET_SIZE),
            ControlRequest::SetUsbPower(on) => ControlSetup::output(0xE6, u16::from(on), 0),
            ControlRequest::SetEspPower(on) => ControlSetup::output(0xD9, u16::from(on), 0),
            ControlRequest::EspReset { bootmode } => ControlSetup::output(0xDA, bootmode, 0),
            ControlRequest::SetSafetyMode(mode) => ControlSetup::output(0xDC, mode.code(), 0),
            ControlRequest::SetCanForwarding { from, to } => ControlSetup::output(
                0xDD,
                u16::from(from.code()),
                u16::from(to.code()),
            ),
            ControlRequest::SetGmlan(target) => {
                let enable = u16::from(target != GmlanTarget::Clear);
                ControlSetup::output(0xDB, enable, target.code())
            }
            ControlRequest::SetCanLoopback(enable) => {
                ControlSetup::output(0xE5, u16::from(enable), 0)
            }
            ControlRequest::SetCanSpeed { bus, kbps } => ControlSetup::output(
                0xDE,
                u16::from(bus.code()),
                kbps.saturating_mul(10),
            ),
            ControlRequest::SetUartBaud { port, rate } => {
                let units = (rate / BAUD_UNIT).min(u32::from(u16::MAX)) as u16;
                ControlSetup::output(0xE4, u16::from(port.code()), units)
            }
            ControlRequest::SetUartParity { port, parity } => {
                ControlSetup::output(0xE2, u16::from(port.code()), parity.code())
            }
            ControlRequest::CanClear(target) => ControlSetup::output(0xF1, target.code(), 0),
            ControlRequest::SerialRead(port) => {
                ControlSetup::input(0xE0, u16::from(port.code()), 0, SERIAL_READ_SIZE)
            }
            ControlRequest::SerialClear(port) => {
                ControlSetup::output(0xF2, u16::from(port.code()), 0)
            }
        }
    }
}

/// Trim a fixed-size, NUL-padded string block returned by the device
pub fn decode_c_string(block: &[u8]) -> String {
    let end = block.iter().position(|&b| b == 0).unwrap_or(block.len());
    String::from_utf8_lossy(&block[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_request_type() {
        assert_eq!(ControlRequest::GetHealth.setup().direction(), Direction::In);
        assert_eq!(
            ControlRequest::SetCanLoopback(true).setup().direction(),
            Direction::Out
        );
    }

    #[test]
    fn test_can_speed_scaled_by_ten() {
        let setup = ControlRequest::SetCanSpeed {
            bus: CanBus::Can2,
            kbps: 500,
        }
        .setup();
        assert_eq!(setup.value, 1);
        assert_eq!(setup.index, 5000);
    }

    #[test]
    fn test_can_speed_range() {
        let too_fast = ControlRequest::SetCanSpeed {
            bus: CanBus::Can1,
            kbps: MAX_CAN_SPEED_KBPS + 1,
        };
        assert!(matches!(
            too_fast.validate(),
            Err(ProtocolError::ParameterOutOfRange(_))
        ));

        let unknown_bus = ControlRequest::SetCanSpeed {
            bus: CanBus::Unknown,
            kbps: 500,
        };
        assert_eq!(unknown_bus.validate(), Err(ProtocolError::InvalidBus(0xFF)));
    }

    #[test]
    fn test_baud_in_units_of_300() {
        let request = ControlRequest::SetUartBaud {
            port: SerialPort::Lin1,
            rate: 10_500,
        };
        assert!(request.validate().is_ok());
        let setup = request.setup();
        assert_eq!(setup.value, 2);
        assert_eq!(setup.index, 35);

        let too_slow = ControlRequest::SetUartBaud {
            port: SerialPort::Lin1,
            rate: 299,
        };
        assert!(too_slow.validate().is_err());
    }

    #[test]
    fn test_gmlan_clear_disables() {
        let clear = ControlRequest::SetGmlan(GmlanTarget::Clear).setup();
        assert_eq!((clear.value, clear.index), (0, 0));
        let can3 = ControlRequest::SetGmlan(GmlanTarget::Can3).setup();
        assert_eq!((can3.value, can3.index), (1, 2));
    }

    #[test]
    fn test_decode_c_string() {
        assert_eq!(decode_c_string(b"v1.0.3\0\0\0"), "v1.0.3");
        assert_eq!(decode_c_string(b"no-nul"), "no-nul");
        assert_eq!(decode_c_string(&[0u8; 4]), "");
    }
}
