//! Common utilities for the adapter driver
//!
//! This crate provides the pieces shared by the driver and its tests: the
//! driver-level error type, logging setup, the USB transport seam, the async
//! bridge to a session worker thread, and a firmware emulator for tests.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod transport;

pub use channel::{SessionBridge, SessionCommand, SessionWorker, create_session_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use tokio_util::sync::CancellationToken;
pub use transport::{Backend, RecvOutcome, Transport};
