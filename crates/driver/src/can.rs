//! CAN message I/O
//!
//! Outgoing messages are framed as 16-byte records and written to the CAN
//! bulk OUT endpoint in one transfer. Incoming records are read from the CAN
//! bulk IN endpoint; with loopback enabled every send comes back twice, first
//! as a transmit receipt and then as an echo.

use crate::session::Session;
use common::{CancellationToken, Error, RecvOutcome, Result};
use protocol::{
    CAN_RECV_BUFFER_SIZE, CAN_RECV_ENDPOINT, CAN_SEND_ENDPOINT, CanBus, CanClearTarget,
    CanMessage, ControlRequest, UsbError, decode_records, encode_batch,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shortest read slice; libusb treats a zero timeout as "wait forever"
const MIN_READ_SLICE: Duration = Duration::from_millis(1);

pub struct CanChannel<'a> {
    session: &'a mut Session,
}

impl<'a> CanChannel<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Send one message; invalid input is rejected before any transfer
    pub fn send(&mut self, address: u32, extended: bool, payload: &[u8], bus: CanBus) -> Result<()> {
        let message = CanMessage::new(address, extended, payload, bus)?;
        self.send_many(std::slice::from_ref(&message))
    }

    /// Send a batch back to back in a single bulk transfer
    pub fn send_many(&mut self, messages: &[CanMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let wire = encode_batch(messages)?;

        let written = self.session.transfer(|transport, timeouts| {
            transport.write_bulk(CAN_SEND_ENDPOINT, &wire, timeouts.bulk_write)
        })?;
        if written != wire.len() {
            return Err(Error::Usb(UsbError::Other {
                message: format!("short CAN write: {} of {} bytes", written, wire.len()),
            }));
        }

        debug!("Sent {} CAN message(s)", messages.len());
        Ok(())
    }

    /// One bulk read of whatever the device has queued
    ///
    /// A read timeout means nothing is pending and yields an empty vector. A
    /// corrupt or truncated record is logged; the records before it are kept.
    pub fn recv(&mut self) -> Result<Vec<CanMessage>> {
        let mut buf = vec![0u8; CAN_RECV_BUFFER_SIZE];
        let timeout = self.session.timeouts().bulk_read;
        self.read_records(&mut buf, timeout)
    }

    /// Block until records arrive, `cancel` fires, or `timeout` passes
    ///
    /// Reads are issued in slices of the session's poll interval and the token
    /// is checked between them; a read in flight is never aborted.
    pub fn recv_until(
        &mut self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<RecvOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let poll = self.session.timeouts().poll;
        let mut buf = vec![0u8; CAN_RECV_BUFFER_SIZE];

        loop {
            if cancel.is_cancelled() {
                return Ok(RecvOutcome::Cancelled);
            }

            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(RecvOutcome::TimedOut);
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };

            let messages = self.read_records(&mut buf, slice.max(MIN_READ_SLICE))?;
            if !messages.is_empty() {
                return Ok(RecvOutcome::Messages(messages));
            }
        }
    }

    /// Flush the receive queue or one bus's transmit queue
    pub fn clear(&mut self, target: CanClearTarget) -> Result<()> {
        self.session
            .control()
            .request(ControlRequest::CanClear(target))
            .map(drop)
    }

    fn read_records(&mut self, buf: &mut [u8], timeout: Duration) -> Result<Vec<CanMessage>> {
        let read = self
            .session
            .transfer(|transport, _| transport.read_bulk(CAN_RECV_ENDPOINT, buf, timeout));
        let n = match read {
            Ok(n) => n,
            Err(Error::Usb(UsbError::Timeout)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let decoded = decode_records(&buf[..n]);
        if let Some(error) = decoded.error {
            warn!(
                "CAN decode stopped after {} record(s) of {} bytes: {}",
                decoded.messages.len(),
                n,
                error
            );
        }
        Ok(decoded.messages)
    }
}
