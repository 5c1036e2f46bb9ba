//! Wire protocol for the USB CAN/LIN adapter
//!
//! This crate defines everything the host and the adapter firmware must agree
//! on bit for bit: the control-transfer request table, the 16-byte CAN record
//! layout, the health record, and the small-integer enumerations shared by
//! both sides. It has no USB dependency; transports live in the driver.
//!
//! # Example
//!
//! ```
//! use protocol::{CanBus, CanMessage, decode_records, encode_batch};
//!
//! let msg = CanMessage::new(0xAA, false, &[1, 2, 3], CanBus::Can1).unwrap();
//! let wire = encode_batch(&[msg]).unwrap();
//! assert_eq!(wire.len(), protocol::CAN_RECORD_SIZE);
//!
//! let decoded = decode_records(&wire);
//! assert_eq!(decoded.messages[0].payload(), &[1, 2, 3]);
//! ```

pub mod can;
pub mod error;
pub mod requests;
pub mod types;

pub use can::{
    CAN_MAX_PAYLOAD, CAN_RECORD_SIZE, CanMessage, DecodedRecords, EXTENDED_ID_MASK,
    STANDARD_ID_MASK, decode_records, encode_batch,
};
pub use error::{ProtocolError, Result};
pub use requests::{
    CAN_RECV_BUFFER_SIZE, CAN_RECV_ENDPOINT, CAN_SEND_ENDPOINT, ControlRequest, ControlSetup,
    Direction, INTERFACE, PRODUCT_ID, REQUEST_IN, REQUEST_OUT, SERIAL_CHUNK_SIZE,
    SERIAL_READ_SIZE, SERIAL_SEND_ENDPOINT, VENDOR_ID, decode_c_string,
};
pub use types::{
    CanBus, CanClearTarget, DeviceDescriptor, GmlanTarget, HealthStatus, Parity, SERIAL_NUMBER_LEN,
    SafetyMode, SerialPort, UsbError,
};
