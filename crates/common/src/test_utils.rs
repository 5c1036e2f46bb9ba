//! Test utilities for the adapter driver
//!
//! [`MockAdapter`] emulates the adapter firmware behind the [`Transport`]
//! seam: it answers the control-request table, keeps a CAN receive queue with
//! transmit receipts and loopback echoes, echoes LIN traffic into the port
//! buffers, and counts every transfer so tests can assert that nothing was
//! sent. [`MockBackend`] enumerates a set of emulated adapters.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockAdapter, MockBackend};
//! use common::Backend;
//!
//! let adapter = MockAdapter::new();
//! let backend = MockBackend::new(vec![adapter.clone()]);
//! assert_eq!(backend.serial_numbers().unwrap(), vec![adapter.serial().to_string()]);
//! ```

use crate::transport::{Backend, Transport};
use protocol::{
    CAN_RECORD_SIZE, CAN_RECV_ENDPOINT, CAN_SEND_ENDPOINT, CanMessage, ControlSetup,
    HealthStatus, SERIAL_SEND_ENDPOINT, SafetyMode, SerialPort, UsbError,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bulk OUT limit reported by the emulator (full-speed packet size)
pub const MOCK_MAX_BULK: usize = 64;

/// Longest the emulator blocks on an empty bulk IN read
const EMPTY_READ_WAIT: Duration = Duration::from_millis(2);

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A 24-character serial number unique within this process
pub fn unique_serial() -> String {
    let n = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
    format!("{:08X}{:016X}", std::process::id(), n)
}

/// Device-side state of an emulated adapter
///
/// Tests may inspect and mutate it through [`MockAdapter::state`].
#[derive(Debug)]
pub struct AdapterState {
    pub safety_mode: SafetyMode,
    pub loopback: bool,
    /// Per-bus speed in kbps, indexed by bus code
    pub can_speeds_kbps: [u16; 3],
    /// Last forwarding request as (from, to) bus codes
    pub forwarding: Option<(u16, u16)>,
    /// Last GMLAN request as (wValue, wIndex)
    pub gmlan: (u16, u16),
    pub usb_power: bool,
    pub esp_power: bool,
    pub esp_bootmode: Option<u16>,
    pub in_bootloader: bool,
    /// Per-port baud rate in units of 300, indexed by port code
    pub uart_baud_units: [u16; 4],
    /// Per-port parity code
    pub uart_parity: [u16; 4],
    pub health: HealthStatus,
    pub version: String,
    pub hw_serial: String,
    pub secret: [u8; 16],
    /// Device-to-host CAN byte stream
    pub can_rx: VecDeque<u8>,
    /// Number of TX clear requests per bus
    pub tx_clears: [u32; 3],
    /// Bytes waiting to be read, per port
    pub serial_rx: [VecDeque<u8>; 4],
    /// Bytes transmitted on the non-LIN ports, per port
    pub serial_tx: [Vec<u8>; 4],
    /// Bytes accepted per serial bulk transfer, port byte included
    pub serial_write_limit: Option<usize>,
    pub max_bulk: usize,
    pub alt_setting: u8,
    /// Returned (once) by the next transfer
    pub fail_next: Option<UsbError>,
    /// Returned (once) after the given number of further transfers succeed
    pub fail_after: Option<(usize, UsbError)>,
    /// Returned (once) by the next open
    pub fail_open: Option<UsbError>,
    pub disconnected: bool,
    /// Transfers issued by the host
    pub transfers: usize,
    pub opens: usize,
    pub last_control: Option<ControlSetup>,
    clock: u16,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            safety_mode: SafetyMode::NoOutput,
            loopback: false,
            can_speeds_kbps: [500; 3],
            forwarding: None,
            gmlan: (0, 0),
            usb_power: false,
            esp_power: false,
            esp_bootmode: None,
            in_bootloader: false,
            uart_baud_units: [384; 4],
            uart_parity: [0; 4],
            health: HealthStatus {
                voltage: 12_000,
                current: 150,
                ..HealthStatus::default()
            },
            version: "DEV-mock-v1".to_string(),
            hw_serial: "mockhwserial0001".to_string(),
            secret: *b"mocksecret000000",
            can_rx: VecDeque::new(),
            tx_clears: [0; 3],
            serial_rx: Default::default(),
            serial_tx: Default::default(),
            serial_write_limit: None,
            max_bulk: MOCK_MAX_BULK,
            alt_setting: 0,
            fail_next: None,
            fail_after: None,
            fail_open: None,
            disconnected: false,
            transfers: 0,
            opens: 0,
            last_control: None,
            clock: 0,
        }
    }
}

impl AdapterState {
    /// Queue a device-to-host record built from a host-to-device record
    fn queue_record(&mut self, rir: u32, len: u8, bus_byte: u8, data: &[u8]) {
        self.clock = self.clock.wrapping_add(1);
        let f2 = u32::from(len) | (u32::from(bus_byte) << 4) | (u32::from(self.clock) << 16);
        self.can_rx.extend((rir & !0x1).to_le_bytes());
        self.can_rx.extend(f2.to_le_bytes());
        self.can_rx.extend(data.iter().copied());
    }

    fn transmit(&mut self, record: &[u8]) {
        let rir = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let f2 = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        let len = (f2 & 0xF) as u8;
        let bus = ((f2 >> 4) & 0x7F) as u8;

        // Real firmware drops frames the safety policy rejects
        if self.safety_mode == SafetyMode::NoOutput {
            return;
        }
        self.queue_record(rir, len, bus | 0x80, &record[8..16]);
        if self.loopback {
            self.queue_record(rir, len, bus, &record[8..16]);
        }
    }

    fn serial_block(&self) -> Vec<u8> {
        let mut block = vec![0u8; 0x20];
        let serial = self.hw_serial.as_bytes();
        let n = serial.len().min(0x10);
        block[..n].copy_from_slice(&serial[..n]);
        block[0x10..0x1A].copy_from_slice(&self.secret[..10]);
        block
    }

    fn health_record(&self) -> Vec<u8> {
        let h = &self.health;
        let mut record = Vec::with_capacity(HealthStatus::WIRE_SIZE);
        record.extend(h.voltage.to_le_bytes());
        record.extend(h.current.to_le_bytes());
        record.extend([
            u8::from(h.started),
            u8::from(h.controls_allowed),
            u8::from(h.gas_interceptor_detected),
            u8::from(h.started_signal_detected),
            u8::from(h.started_alt),
        ]);
        record
    }
}

/// Handle to one emulated adapter; clones share the same device state
#[derive(Debug, Clone)]
pub struct MockAdapter {
    serial: String,
    state: Arc<Mutex<AdapterState>>,
}

impl MockAdapter {
    /// Emulated adapter with a process-unique serial number
    pub fn new() -> Self {
        Self::with_serial(unique_serial())
    }

    pub fn with_serial(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            state: Arc::new(Mutex::new(AdapterState::default())),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Lock the device state for inspection or fault injection
    pub fn state(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transfer_count(&self) -> usize {
        self.state().transfers
    }

    /// Make the next transfer fail with `error`
    pub fn inject_failure(&self, error: UsbError) {
        self.state().fail_next = Some(error);
    }

    /// Let `skip` transfers through, then fail the next one with `error`
    pub fn inject_failure_after(&self, skip: usize, error: UsbError) {
        self.state().fail_after = Some((skip, error));
    }

    /// Simulate unplugging the adapter
    pub fn disconnect(&self) {
        self.state().disconnected = true;
    }

    /// Queue a genuine bus receive
    pub fn push_bus_message(&self, message: &CanMessage) {
        let mut record = Vec::with_capacity(CAN_RECORD_SIZE);
        message.encode_into(&mut record);
        let rir = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        self.state()
            .queue_record(rir, message.len, message.bus.code(), &record[8..16]);
    }

    /// Queue raw bytes on the CAN receive endpoint
    pub fn push_raw_can(&self, bytes: &[u8]) {
        self.state().can_rx.extend(bytes.iter().copied());
    }

    /// Queue bytes as if received on a serial port
    pub fn push_serial(&self, port: SerialPort, bytes: &[u8]) {
        self.state().serial_rx[usize::from(port.code())].extend(bytes.iter().copied());
    }

    /// A transport bound to this adapter, bypassing enumeration
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Transport`] over an emulated adapter
pub struct MockTransport {
    state: Arc<Mutex<AdapterState>>,
}

impl MockTransport {
    fn begin(&self) -> Result<MutexGuard<'_, AdapterState>, UsbError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.disconnected {
            return Err(UsbError::NoDevice);
        }
        state.transfers += 1;
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        match state.fail_after.take() {
            Some((0, error)) => return Err(error),
            Some((skip, error)) => state.fail_after = Some((skip - 1, error)),
            None => {}
        }
        Ok(state)
    }
}

impl Transport for MockTransport {
    fn read_control(
        &mut self,
        setup: &ControlSetup,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut state = self.begin()?;
        state.last_control = Some(*setup);

        let response = match setup.request {
            0xD2 => state.health_record(),
            0xD6 => state.version.as_bytes().to_vec(),
            0xD0 if setup.value == 0 => state.serial_block(),
            0xD0 => state.secret.to_vec(),
            0xE0 => {
                let port = usize::from(setup.value);
                let queue = state.serial_rx.get_mut(port).ok_or(UsbError::Pipe)?;
                let n = queue.len().min(usize::from(setup.length));
                queue.drain(..n).collect()
            }
            _ => return Err(UsbError::Pipe),
        };

        let n = response.len().min(buf.len());
        buf[..n].copy_from_slice(&response[..n]);
        Ok(n)
    }

    fn write_control(
        &mut self,
        setup: &ControlSetup,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut state = self.begin()?;
        state.last_control = Some(*setup);

        let (value, index) = (setup.value, setup.index);
        match setup.request {
            0xD1 => state.in_bootloader = true,
            0xE6 => state.usb_power = value != 0,
            0xD9 => state.esp_power = value != 0,
            0xDA => state.esp_bootmode = Some(value),
            0xDC => state.safety_mode = SafetyMode::from_code(value).ok_or(UsbError::Pipe)?,
            0xDD => state.forwarding = Some((value, index)),
            0xDB => state.gmlan = (value, index),
            0xE5 => state.loopback = value != 0,
            0xDE => {
                let speed = state
                    .can_speeds_kbps
                    .get_mut(usize::from(value))
                    .ok_or(UsbError::Pipe)?;
                *speed = index / 10;
            }
            0xE4 => {
                let baud = state
                    .uart_baud_units
                    .get_mut(usize::from(value))
                    .ok_or(UsbError::Pipe)?;
                *baud = index;
            }
            0xE2 => {
                let parity = state
                    .uart_parity
                    .get_mut(usize::from(value))
                    .ok_or(UsbError::Pipe)?;
                *parity = index;
            }
            0xF1 if value == 0xFFFF => state.can_rx.clear(),
            0xF1 => {
                let clears = state
                    .tx_clears
                    .get_mut(usize::from(value))
                    .ok_or(UsbError::Pipe)?;
                *clears += 1;
            }
            0xF2 => state
                .serial_rx
                .get_mut(usize::from(value))
                .ok_or(UsbError::Pipe)?
                .clear(),
            _ => return Err(UsbError::Pipe),
        }
        Ok(data.len())
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError> {
        if endpoint != CAN_RECV_ENDPOINT {
            return Err(UsbError::InvalidParam);
        }
        let mut state = self.begin()?;

        if state.can_rx.is_empty() {
            drop(state);
            std::thread::sleep(timeout.min(EMPTY_READ_WAIT));
            return Err(UsbError::Timeout);
        }

        // Deliver whole records unless everything fits
        let n = if state.can_rx.len() <= buf.len() {
            state.can_rx.len()
        } else {
            buf.len() / CAN_RECORD_SIZE * CAN_RECORD_SIZE
        };
        for (slot, byte) in buf.iter_mut().zip(state.can_rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let mut state = self.begin()?;

        match endpoint {
            CAN_SEND_ENDPOINT => {
                if data.len() % CAN_RECORD_SIZE != 0 {
                    return Err(UsbError::Io);
                }
                for record in data.chunks(CAN_RECORD_SIZE) {
                    state.transmit(record);
                }
                Ok(data.len())
            }
            SERIAL_SEND_ENDPOINT => {
                if data.len() > state.max_bulk {
                    return Err(UsbError::Overflow);
                }
                let port = data
                    .first()
                    .and_then(|&code| SerialPort::from_code(code))
                    .ok_or(UsbError::InvalidParam)?;
                let accepted = data.len().min(state.serial_write_limit.unwrap_or(usize::MAX));
                let payload = &data[1.min(accepted)..accepted];

                let slot = usize::from(port.code());
                match port {
                    // The LIN transceiver reads back its own transmission
                    SerialPort::Lin1 | SerialPort::Lin2 => {
                        state.serial_rx[slot].extend(payload.iter().copied())
                    }
                    SerialPort::Debug | SerialPort::Esp => {
                        state.serial_tx[slot].extend_from_slice(payload)
                    }
                }
                Ok(accepted)
            }
            _ => Err(UsbError::InvalidParam),
        }
    }

    fn max_bulk_transfer(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .max_bulk
    }

    fn set_alternate_setting(&mut self, setting: u8) -> Result<(), UsbError> {
        let mut state = self.begin()?;
        state.alt_setting = setting;
        Ok(())
    }

    fn alternate_setting(&mut self) -> Result<u8, UsbError> {
        let state = self.begin()?;
        Ok(state.alt_setting)
    }
}

/// [`Backend`] enumerating a fixed set of emulated adapters
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    adapters: Vec<MockAdapter>,
}

impl MockBackend {
    pub fn new(adapters: Vec<MockAdapter>) -> Self {
        Self { adapters }
    }

    /// Backend with `count` fresh adapters
    pub fn with_adapters(count: usize) -> Self {
        Self::new((0..count).map(|_| MockAdapter::new()).collect())
    }

    pub fn adapters(&self) -> &[MockAdapter] {
        &self.adapters
    }
}

impl Backend for MockBackend {
    fn serial_numbers(&self) -> Result<Vec<String>, UsbError> {
        Ok(self
            .adapters
            .iter()
            .filter(|adapter| !adapter.state().disconnected)
            .map(|adapter| adapter.serial().to_string())
            .collect())
    }

    fn open(&self, serial: &str) -> Result<Box<dyn Transport>, UsbError> {
        let adapter = self
            .adapters
            .iter()
            .find(|adapter| adapter.serial() == serial)
            .ok_or(UsbError::NotFound)?;

        {
            let mut state = adapter.state();
            if state.disconnected {
                return Err(UsbError::NoDevice);
            }
            if let Some(error) = state.fail_open.take() {
                return Err(error);
            }
            state.opens += 1;
        }

        Ok(Box::new(adapter.transport()))
    }
}

/// Run an async test future with a timeout
///
/// # Example
/// ```
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
/// assert_eq!(result, 42);
/// # }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
