//! CAN record framing
//!
//! The adapter exchanges CAN messages as contiguous 16-byte records on the
//! bulk endpoints. Layout (little-endian):
//!
//! ```text
//! offset 0  u32 rir   standard: address << 21
//!                     extended: (address << 3) | 0x4
//!                     bit 0 set on host-to-device records (transmit request)
//! offset 4  u32 f2    bits 0..4   payload length
//!                     bits 4..12  bus byte (bit 7 = transmit receipt)
//!                     bits 16..32 receive timestamp
//! offset 8  [u8; 8]   payload
//! ```
//!
//! Records are packed back to back with no padding between them.

use crate::error::{ProtocolError, Result};
use crate::types::CanBus;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of one record on the wire
pub const CAN_RECORD_SIZE: usize = 16;
/// Classic CAN payload limit
pub const CAN_MAX_PAYLOAD: usize = 8;
/// 11-bit identifier mask
pub const STANDARD_ID_MASK: u32 = 0x0000_07FF;
/// 29-bit identifier mask
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

const TRANSMIT_REQUEST: u32 = 0x1;
const EXTENDED_FLAG: u32 = 0x4;
const RECEIPT_FLAG: u8 = 0x80;
const LENGTH_MASK: u32 = 0xF;

/// One CAN message as seen by the host
///
/// Bytes of `data` past `len` are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanMessage {
    /// 11- or 29-bit identifier
    pub address: u32,
    /// 29-bit identifier
    pub extended: bool,
    pub bus: CanBus,
    pub data: [u8; CAN_MAX_PAYLOAD],
    pub len: u8,
    /// Device timestamp of reception (free-running, wraps)
    pub recv_time: u16,
    /// Transmit confirmation of our own send rather than a bus receive
    pub is_receipt: bool,
}

impl CanMessage {
    /// Build an outgoing message, validating payload length, identifier
    /// range and bus
    pub fn new(address: u32, extended: bool, payload: &[u8], bus: CanBus) -> Result<Self> {
        if payload.len() > CAN_MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLong {
                len: payload.len(),
                max: CAN_MAX_PAYLOAD,
            });
        }
        let mask = if extended {
            EXTENDED_ID_MASK
        } else {
            STANDARD_ID_MASK
        };
        if address & !mask != 0 {
            return Err(ProtocolError::InvalidAddress { address, extended });
        }
        if bus == CanBus::Unknown {
            return Err(ProtocolError::InvalidBus(bus.code()));
        }

        let mut data = [0u8; CAN_MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);

        Ok(Self {
            address,
            extended,
            bus,
            data,
            len: payload.len() as u8,
            recv_time: 0,
            is_receipt: false,
        })
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(CAN_MAX_PAYLOAD)]
    }

    /// Re-check the invariants of a message built by hand
    pub fn validate(&self) -> Result<()> {
        Self::new(self.address, self.extended, self.payload(), self.bus).map(|_| ())?;
        if usize::from(self.len) > CAN_MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLong {
                len: usize::from(self.len),
                max: CAN_MAX_PAYLOAD,
            });
        }
        Ok(())
    }

    /// Append the host-to-device record for this message
    pub fn encode_into(&self, buf: &mut impl BufMut) {
        let rir = if self.extended {
            (self.address << 3) | EXTENDED_FLAG | TRANSMIT_REQUEST
        } else {
            (self.address << 21) | TRANSMIT_REQUEST
        };
        let f2 = u32::from(self.len) | (u32::from(self.bus.code()) << 4);

        let mut data = [0u8; CAN_MAX_PAYLOAD];
        data[..self.payload().len()].copy_from_slice(self.payload());

        buf.put_u32_le(rir);
        buf.put_u32_le(f2);
        buf.put_slice(&data);
    }

    /// Decode one device-to-host record
    pub fn decode(mut record: &[u8]) -> Result<Self> {
        if record.len() < CAN_RECORD_SIZE {
            return Err(ProtocolError::IncompleteRecord {
                expected: CAN_RECORD_SIZE,
                actual: record.len(),
            });
        }

        let rir = record.get_u32_le();
        let f2 = record.get_u32_le();

        let len = (f2 & LENGTH_MASK) as u8;
        if usize::from(len) > CAN_MAX_PAYLOAD {
            return Err(ProtocolError::InvalidLength(len));
        }

        let extended = rir & EXTENDED_FLAG != 0;
        let address = if extended { rir >> 3 } else { rir >> 21 };
        let bus_byte = ((f2 >> 4) & 0xFF) as u8;

        // Residual bytes past `len` are never carried over
        let mut data = [0u8; CAN_MAX_PAYLOAD];
        data[..usize::from(len)].copy_from_slice(&record[..usize::from(len)]);

        Ok(Self {
            address,
            extended,
            bus: CanBus::from_code(bus_byte & !RECEIPT_FLAG),
            data,
            len,
            recv_time: (f2 >> 16) as u16,
            is_receipt: bus_byte & RECEIPT_FLAG != 0,
        })
    }
}

/// Frame a batch of messages back to back for a single bulk transfer
///
/// The whole batch is rejected if any message is invalid.
pub fn encode_batch(messages: &[CanMessage]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(messages.len() * CAN_RECORD_SIZE);
    for message in messages {
        message.validate()?;
        message.encode_into(&mut buf);
    }
    Ok(buf.freeze())
}

/// Result of decoding one bulk IN transfer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedRecords {
    /// Records decoded before any failure
    pub messages: Vec<CanMessage>,
    /// Why decoding stopped early, if it did
    pub error: Option<ProtocolError>,
}

/// Decode a bulk IN payload into messages
///
/// Decoding stops at the first malformed or truncated record; everything
/// after it is dropped and the records before it are kept.
pub fn decode_records(buf: &[u8]) -> DecodedRecords {
    let mut decoded = DecodedRecords {
        messages: Vec::with_capacity(buf.len() / CAN_RECORD_SIZE),
        error: None,
    };

    for record in buf.chunks(CAN_RECORD_SIZE) {
        match CanMessage::decode(record) {
            Ok(message) => decoded.messages.push(message),
            Err(e) => {
                decoded.error = Some(e);
                break;
            }
        }
    }

    decoded
}
