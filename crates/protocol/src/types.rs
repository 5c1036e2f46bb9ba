//! Adapter type definitions
//!
//! Small-integer enumerations shared with the adapter firmware, the device
//! descriptor used for enumeration, the health snapshot, and transport error
//! conditions. Every numeric code here is part of the wire contract.

use crate::error::{ProtocolError, Result};
use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an adapter USB serial number
pub const SERIAL_NUMBER_LEN: usize = 24;

/// Adapter identity as reported by enumeration
///
/// The serial number is the only stable identifier of a physical adapter.
/// It is exactly 24 printable ASCII characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    serial: String,
}

impl DeviceDescriptor {
    /// Validate and wrap a serial number read from the USB string descriptor
    pub fn parse(serial: impl Into<String>) -> Result<Self> {
        let serial = serial.into();
        let printable = serial.bytes().all(|b| (0x20..=0x7E).contains(&b));
        if serial.len() != SERIAL_NUMBER_LEN || !printable {
            return Err(ProtocolError::InvalidSerial(serial));
        }
        Ok(Self { serial })
    }

    /// Serial number string
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serial)
    }
}

/// Device-enforced transmit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyMode {
    /// Transmission disabled (power-on default)
    #[default]
    NoOutput,
    /// Vehicle-specific restricted output
    Honda,
    /// Unrestricted output
    AllOutput,
}

impl SafetyMode {
    /// Firmware code sent as wValue
    pub fn code(self) -> u16 {
        match self {
            SafetyMode::NoOutput => 0x0000,
            SafetyMode::Honda => 0x0001,
            SafetyMode::AllOutput => 0x1337,
        }
    }

    /// Reverse lookup, `None` for codes this driver does not know
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0000 => Some(SafetyMode::NoOutput),
            0x0001 => Some(SafetyMode::Honda),
            0x1337 => Some(SafetyMode::AllOutput),
            _ => None,
        }
    }
}

/// Logical CAN bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanBus {
    Can1,
    Can2,
    Can3,
    /// Bus code outside the known range
    Unknown,
}

impl CanBus {
    /// Buses a message can be sent on
    pub const ALL: [CanBus; 3] = [CanBus::Can1, CanBus::Can2, CanBus::Can3];

    pub fn code(self) -> u8 {
        match self {
            CanBus::Can1 => 0,
            CanBus::Can2 => 1,
            CanBus::Can3 => 2,
            CanBus::Unknown => 0xFF,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => CanBus::Can1,
            1 => CanBus::Can2,
            2 => CanBus::Can3,
            _ => CanBus::Unknown,
        }
    }
}

impl fmt::Display for CanBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanBus::Can1 => f.write_str("can1"),
            CanBus::Can2 => f.write_str("can2"),
            CanBus::Can3 => f.write_str("can3"),
            CanBus::Unknown => f.write_str("unknown"),
        }
    }
}

/// Queue selected by a CAN clear request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CanClearTarget {
    Can1Tx,
    Can2Tx,
    Can3Tx,
    /// Global receive queue
    Rx,
}

impl CanClearTarget {
    pub fn code(self) -> u16 {
        match self {
            CanClearTarget::Can1Tx => 0,
            CanClearTarget::Can2Tx => 1,
            CanClearTarget::Can3Tx => 2,
            CanClearTarget::Rx => 0xFFFF,
        }
    }

    /// Transmit queue of `bus`, `None` for an unknown bus
    pub fn tx(bus: CanBus) -> Option<Self> {
        match bus {
            CanBus::Can1 => Some(CanClearTarget::Can1Tx),
            CanBus::Can2 => Some(CanClearTarget::Can2Tx),
            CanBus::Can3 => Some(CanClearTarget::Can3Tx),
            CanBus::Unknown => None,
        }
    }
}

/// Serial port on the adapter, each with its own device-side buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerialPort {
    Debug,
    /// Auxiliary (ESP) UART
    Esp,
    Lin1,
    Lin2,
}

impl SerialPort {
    pub const ALL: [SerialPort; 4] = [
        SerialPort::Debug,
        SerialPort::Esp,
        SerialPort::Lin1,
        SerialPort::Lin2,
    ];

    pub fn code(self) -> u8 {
        match self {
            SerialPort::Debug => 0,
            SerialPort::Esp => 1,
            SerialPort::Lin1 => 2,
            SerialPort::Lin2 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|port| port.code() == code)
    }
}

/// UART parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parity {
    #[default]
    Off,
    Even,
    Odd,
}

impl Parity {
    pub fn code(self) -> u16 {
        match self {
            Parity::Off => 0,
            Parity::Even => 1,
            Parity::Odd => 2,
        }
    }
}

/// GMLAN routing selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GmlanTarget {
    /// Routing disabled
    Clear,
    Can2,
    Can3,
}

impl GmlanTarget {
    pub fn code(self) -> u16 {
        match self {
            GmlanTarget::Clear => 0,
            GmlanTarget::Can2 => 1,
            GmlanTarget::Can3 => 2,
        }
    }
}

/// Point-in-time adapter health snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Supply voltage in millivolts
    pub voltage: u32,
    /// Current draw in milliamps
    pub current: u32,
    pub started: bool,
    pub controls_allowed: bool,
    pub gas_interceptor_detected: bool,
    pub started_signal_detected: bool,
    pub started_alt: bool,
}

impl HealthStatus {
    /// Size of the health record on the wire
    pub const WIRE_SIZE: usize = 13;

    /// Decode the packed little-endian health record
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::WIRE_SIZE,
                available: buf.len(),
            });
        }

        Ok(Self {
            voltage: buf.get_u32_le(),
            current: buf.get_u32_le(),
            started: buf.get_u8() != 0,
            controls_allowed: buf.get_u8() != 0,
            gas_interceptor_detected: buf.get_u8() != 0,
            started_signal_detected: buf.get_u8() != 0,
            started_alt: buf.get_u8() != 0,
        })
    }

    /// Supply voltage in volts
    pub fn voltage_volts(&self) -> f32 {
        self.voltage as f32 / 1000.0
    }
}

/// USB transport error conditions
///
/// Mirrors the libusb error set so the driver can react to a disconnected
/// device without depending on the USB library in this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsbError {
    /// Transfer timed out
    Timeout,
    /// Pipe error (endpoint halted)
    Pipe,
    /// Device disconnected
    NoDevice,
    /// Entity not found
    NotFound,
    /// Resource busy (interface claimed elsewhere)
    Busy,
    /// Buffer overflow
    Overflow,
    /// I/O error
    Io,
    /// Invalid parameter
    InvalidParam,
    /// Access denied (permissions)
    Access,
    /// Other error with message
    Other { message: String },
}

impl UsbError {
    /// Whether the device is gone and the session cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, UsbError::NoDevice)
    }
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::Timeout => write!(f, "transfer timed out"),
            UsbError::Pipe => write!(f, "endpoint halted"),
            UsbError::NoDevice => write!(f, "device disconnected"),
            UsbError::NotFound => write!(f, "entity not found"),
            UsbError::Busy => write!(f, "resource busy"),
            UsbError::Overflow => write!(f, "buffer overflow"),
            UsbError::Io => write!(f, "I/O error"),
            UsbError::InvalidParam => write!(f, "invalid parameter"),
            UsbError::Access => write!(f, "access denied"),
            UsbError::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for UsbError {}
