//! Common error types

use protocol::{ProtocolError, UsbError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No attached adapter matches the request
    #[error("No matching adapter available")]
    NoDevice,

    /// Adapter is held by another session in this process
    #[error("Adapter {0} is already claimed by an open session")]
    AlreadyClaimed(String),

    /// Session was closed explicitly or after a fatal transport error
    #[error("Session is closed")]
    SessionClosed,

    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
