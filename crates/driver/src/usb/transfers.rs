//! Error mapping for libusb transfers

use protocol::UsbError;

/// Map rusb::Error to protocol::UsbError
///
/// Keeps the driver's error type free of the USB library; only
/// `UsbError::NoDevice` ends a session.
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Busy), UsbError::Busy);
        assert_eq!(map_rusb_error(rusb::Error::Access), UsbError::Access);
    }

    #[test]
    fn test_unmapped_errors_keep_their_message() {
        match map_rusb_error(rusb::Error::Interrupted) {
            UsbError::Other { message } => assert!(!message.is_empty()),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_only_disconnect_is_fatal() {
        assert!(map_rusb_error(rusb::Error::NoDevice).is_fatal());
        assert!(!map_rusb_error(rusb::Error::Timeout).is_fatal());
        assert!(!map_rusb_error(rusb::Error::Pipe).is_fatal());
    }
}
