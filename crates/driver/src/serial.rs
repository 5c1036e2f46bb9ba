//! Serial port byte streams (debug console, ESP, LIN1, LIN2)
//!
//! Writes go to the shared serial bulk OUT endpoint, each transfer prefixed
//! with the port number. Reads drain the device-side buffer with repeated
//! control requests.

use crate::session::Session;
use common::{Error, Result};
use protocol::{
    ControlRequest, ProtocolError, SERIAL_CHUNK_SIZE, SERIAL_READ_SIZE, SERIAL_SEND_ENDPOINT,
    SerialPort, UsbError,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound on read requests per call so a chatty port cannot stall it
const MAX_READ_CHUNKS: usize = 256;

pub struct SerialChannel<'a> {
    session: &'a mut Session,
}

impl<'a> SerialChannel<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Write as much of `data` as the device accepts
    ///
    /// Returns the number of payload bytes written. Stops early at the first
    /// transfer the device does not take in full.
    pub fn write(&mut self, port: SerialPort, data: &[u8]) -> Result<usize> {
        let max_bulk = self.session.max_bulk_transfer()?;
        let chunk_size = SERIAL_CHUNK_SIZE.min(max_bulk.saturating_sub(1));
        if chunk_size == 0 {
            return Err(Error::Protocol(ProtocolError::ParameterOutOfRange(format!(
                "bulk transfer limit {} leaves no room for serial payload",
                max_bulk
            ))));
        }

        let mut frame = Vec::with_capacity(chunk_size + 1);
        let mut written = 0;
        for chunk in data.chunks(chunk_size) {
            frame.clear();
            frame.push(port.code());
            frame.extend_from_slice(chunk);

            let sent = self.session.transfer(|transport, timeouts| {
                transport.write_bulk(SERIAL_SEND_ENDPOINT, &frame, timeouts.bulk_write)
            })?;
            let accepted = sent.saturating_sub(1).min(chunk.len());
            written += accepted;
            if accepted < chunk.len() {
                debug!(
                    "Short serial write on {:?}: {} of {} bytes",
                    port,
                    accepted,
                    chunk.len()
                );
                break;
            }
        }
        Ok(written)
    }

    /// Keep writing until every byte is accepted or `timeout` passes
    pub fn write_all(&mut self, port: SerialPort, data: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let poll = self.session.timeouts().poll;
        let mut remaining = data;

        while !remaining.is_empty() {
            let written = self.write(port, remaining)?;
            remaining = &remaining[written..];
            if remaining.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Usb(UsbError::Timeout));
            }
            if written == 0 {
                std::thread::sleep(poll);
            }
        }
        Ok(())
    }

    /// Drain the port's buffered input; empty means nothing pending
    ///
    /// Each request removes bytes from the device, so a failure after some
    /// bytes arrived ends the read with what was collected. The error is
    /// only returned when nothing was read.
    pub fn read(&mut self, port: SerialPort) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for _ in 0..MAX_READ_CHUNKS {
            let chunk = match self
                .session
                .control()
                .request(ControlRequest::SerialRead(port))
            {
                Ok(chunk) => chunk,
                Err(e) if data.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        "Serial read on {:?} failed after {} bytes: {}",
                        port,
                        data.len(),
                        e
                    );
                    return Ok(data);
                }
            };
            data.extend_from_slice(&chunk);
            // A short chunk means the device buffer is empty
            if chunk.len() < usize::from(SERIAL_READ_SIZE) {
                return Ok(data);
            }
        }
        debug!("Serial read on {:?} stopped after {} bytes", port, data.len());
        Ok(data)
    }

    /// Discard the port's buffered input
    pub fn clear(&mut self, port: SerialPort) -> Result<()> {
        self.session
            .control()
            .request(ControlRequest::SerialClear(port))
            .map(drop)
    }
}
