//! Protocol error types

use thiserror::Error;

/// Wire-level encoding, decoding and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// CAN payload longer than a classic frame allows
    #[error("CAN payload too long: {len} bytes (max: {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// Identifier does not fit in 11 (standard) or 29 (extended) bits
    #[error("CAN address {address:#x} out of range for {} identifier", id_width(.extended))]
    InvalidAddress { address: u32, extended: bool },

    /// Bus cannot be used as a transmit target
    #[error("Invalid CAN bus code: {0:#04x}")]
    InvalidBus(u8),

    /// Record claims more payload bytes than the record carries
    #[error("Invalid CAN record length: {0}")]
    InvalidLength(u8),

    /// Trailing bytes that do not form a complete record
    #[error("Incomplete record: expected {expected} bytes, got {actual}")]
    IncompleteRecord { expected: usize, actual: usize },

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Serial number is not 24 printable characters
    #[error("Invalid adapter serial number: {0:?}")]
    InvalidSerial(String),

    /// Parameter cannot be represented in the 16-bit control fields
    #[error("Parameter out of range: {0}")]
    ParameterOutOfRange(String),
}

fn id_width(extended: &bool) -> &'static str {
    if *extended { "29-bit" } else { "11-bit" }
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PayloadTooLong { len: 9, max: 8 };
        let msg = format!("{}", err);
        assert!(msg.contains("9 bytes"));
        assert!(msg.contains("max: 8"));
    }

    #[test]
    fn test_invalid_address_names_width() {
        let std_err = ProtocolError::InvalidAddress {
            address: 0x800,
            extended: false,
        };
        assert!(format!("{}", std_err).contains("11-bit"));

        let ext_err = ProtocolError::InvalidAddress {
            address: 0x2000_0000,
            extended: true,
        };
        assert!(format!("{}", ext_err).contains("29-bit"));
    }
}
