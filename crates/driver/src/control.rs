//! Configuration and query requests over control transfers

use crate::session::Session;
use common::Result;
use protocol::{
    CanBus, ControlRequest, Direction, GmlanTarget, HealthStatus, Parity, SafetyMode, SerialPort,
    decode_c_string,
};
use tracing::debug;

/// Bytes of the serial block that hold the hardware serial string
const HW_SERIAL_LEN: usize = 0x10;

/// Control-transfer requests on an open session
///
/// Every call is exactly one transfer bounded by the session's control
/// timeout. Nothing is cached.
pub struct ControlChannel<'a> {
    session: &'a mut Session,
}

impl<'a> ControlChannel<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// Issue any request; IN requests return the bytes the device sent
    ///
    /// Parameters that do not fit the setup packet are rejected before any
    /// transfer is made.
    pub fn request(&mut self, request: ControlRequest) -> Result<Vec<u8>> {
        request.validate()?;
        let setup = request.setup();
        debug!(
            "Control {:?}: request={:#x} value={:#x} index={:#x}",
            request, setup.request, setup.value, setup.index
        );

        self.session
            .transfer(|transport, timeouts| match setup.direction() {
                Direction::In => {
                    let mut buf = vec![0u8; usize::from(setup.length)];
                    let n = transport.read_control(&setup, &mut buf, timeouts.control)?;
                    buf.truncate(n);
                    Ok(buf)
                }
                Direction::Out => {
                    transport.write_control(&setup, &[], timeouts.control)?;
                    Ok(Vec::new())
                }
            })
    }

    fn send(&mut self, request: ControlRequest) -> Result<()> {
        self.request(request).map(drop)
    }

    pub fn get_health(&mut self) -> Result<HealthStatus> {
        let record = self.request(ControlRequest::GetHealth)?;
        Ok(HealthStatus::decode(&record)?)
    }

    /// Reboot into the bootloader; the device re-enumerates afterwards
    pub fn enter_bootloader(&mut self) -> Result<()> {
        self.send(ControlRequest::EnterBootloader)
    }

    pub fn get_version(&mut self) -> Result<String> {
        let block = self.request(ControlRequest::GetVersion)?;
        Ok(decode_c_string(&block))
    }

    /// Hardware serial string from the device's serial block
    pub fn get_serial(&mut self) -> Result<String> {
        let block = self.request(ControlRequest::GetSerial)?;
        let end = block.len().min(HW_SERIAL_LEN);
        Ok(decode_c_string(&block[..end]))
    }

    pub fn get_secret(&mut self) -> Result<Vec<u8>> {
        self.request(ControlRequest::GetSecret)
    }

    pub fn set_usb_power(&mut self, on: bool) -> Result<()> {
        self.send(ControlRequest::SetUsbPower(on))
    }

    pub fn set_esp_power(&mut self, on: bool) -> Result<()> {
        self.send(ControlRequest::SetEspPower(on))
    }

    pub fn esp_reset(&mut self, bootmode: u16) -> Result<()> {
        self.send(ControlRequest::EspReset { bootmode })
    }

    pub fn set_safety_mode(&mut self, mode: SafetyMode) -> Result<()> {
        self.send(ControlRequest::SetSafetyMode(mode))
    }

    pub fn set_can_forwarding(&mut self, from: CanBus, to: CanBus) -> Result<()> {
        self.send(ControlRequest::SetCanForwarding { from, to })
    }

    pub fn set_gmlan(&mut self, target: GmlanTarget) -> Result<()> {
        self.send(ControlRequest::SetGmlan(target))
    }

    pub fn set_can_loopback(&mut self, enable: bool) -> Result<()> {
        self.send(ControlRequest::SetCanLoopback(enable))
    }

    pub fn set_can_speed_kbps(&mut self, bus: CanBus, kbps: u16) -> Result<()> {
        self.send(ControlRequest::SetCanSpeed { bus, kbps })
    }

    pub fn set_uart_baud(&mut self, port: SerialPort, rate: u32) -> Result<()> {
        self.send(ControlRequest::SetUartBaud { port, rate })
    }

    pub fn set_uart_parity(&mut self, port: SerialPort, parity: Parity) -> Result<()> {
        self.send(ControlRequest::SetUartParity { port, parity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClaimTable, DeviceRegistry};
    use common::Error;
    use common::test_utils::{MockAdapter, MockBackend};
    use protocol::{ProtocolError, UsbError};

    fn open(adapter: &MockAdapter) -> Session {
        DeviceRegistry::with_claims(MockBackend::new(vec![adapter.clone()]), ClaimTable::new())
            .open(adapter.serial())
            .unwrap()
    }

    #[test]
    fn test_queries_decode_device_blocks() {
        let adapter = MockAdapter::new();
        let mut session = open(&adapter);
        let mut control = session.control();

        assert_eq!(control.get_version().unwrap(), "DEV-mock-v1");
        assert_eq!(control.get_serial().unwrap(), "mockhwserial0001");
        assert_eq!(control.get_secret().unwrap(), b"mocksecret000000".to_vec());
        assert_eq!(control.get_health().unwrap().voltage, 12_000);
    }

    #[test]
    fn test_setters_reach_the_device() {
        let adapter = MockAdapter::new();
        let mut session = open(&adapter);
        let mut control = session.control();

        control.set_safety_mode(SafetyMode::AllOutput).unwrap();
        control.set_can_loopback(true).unwrap();
        control.set_can_speed_kbps(CanBus::Can2, 250).unwrap();
        control.set_uart_baud(SerialPort::Lin1, 10_500).unwrap();
        control.set_uart_parity(SerialPort::Lin1, Parity::Even).unwrap();
        control.set_can_forwarding(CanBus::Can1, CanBus::Can3).unwrap();
        control.set_gmlan(GmlanTarget::Can3).unwrap();
        control.esp_reset(1).unwrap();
        control.enter_bootloader().unwrap();

        let state = adapter.state();
        assert_eq!(state.safety_mode, SafetyMode::AllOutput);
        assert!(state.loopback);
        assert_eq!(state.can_speeds_kbps[1], 250);
        assert_eq!(state.uart_baud_units[2], 35);
        assert_eq!(state.uart_parity[2], 1);
        assert_eq!(state.forwarding, Some((0, 2)));
        assert_eq!(state.gmlan, (1, 2));
        assert_eq!(state.esp_bootmode, Some(1));
        assert!(state.in_bootloader);
    }

    #[test]
    fn test_unrepresentable_speed_issues_no_transfer() {
        let adapter = MockAdapter::new();
        let mut session = open(&adapter);
        let before = adapter.transfer_count();

        let result = session.control().set_can_speed_kbps(CanBus::Can1, 7000);
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::ParameterOutOfRange(_)))
        ));
        assert_eq!(adapter.transfer_count(), before);
    }

    #[test]
    fn test_stall_is_reported_not_fatal() {
        let adapter = MockAdapter::new();
        let mut session = open(&adapter);
        adapter.inject_failure(UsbError::Pipe);

        assert!(matches!(
            session.control().set_usb_power(true),
            Err(Error::Usb(UsbError::Pipe))
        ));
        session.control().set_usb_power(true).unwrap();
        assert!(adapter.state().usb_power);
    }
}
