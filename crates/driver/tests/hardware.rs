//! Tests against a real adapter
//!
//! Ignored by default. Run with an adapter attached:
//!
//! ```text
//! cargo test -p driver --test hardware -- --ignored --test-threads=1
//! ```

use driver::DeviceRegistry;
use protocol::{CanBus, CanClearTarget, SERIAL_NUMBER_LEN, SafetyMode, SerialPort};
use rand::Rng;

fn registry() -> DeviceRegistry {
    DeviceRegistry::usb().expect("USB context")
}

#[test]
#[ignore = "requires an attached adapter"]
fn test_hardware_listing_and_exclusive_open() {
    let registry = registry();
    let listed = registry.list_available().unwrap();
    assert!(!listed.is_empty());
    assert!(listed.iter().all(|d| d.serial().len() == SERIAL_NUMBER_LEN));

    let session = registry.open("").unwrap();
    assert_eq!(session.serial_number(), listed[0].serial());
    assert!(registry.open(session.serial_number()).is_err());
}

#[test]
#[ignore = "requires an attached adapter"]
fn test_hardware_loopback_receipt_then_echo() {
    let registry = registry();
    let mut session = registry.open("").unwrap();
    session.control().set_safety_mode(SafetyMode::AllOutput).unwrap();
    session.control().set_can_loopback(true).unwrap();
    session.can().clear(CanClearTarget::Rx).unwrap();

    for bus in CanBus::ALL {
        session.can().send(0xAA, false, &[1, 2, 3, 4], bus).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        let received = session.can().recv().unwrap();
        assert_eq!(received.len(), 2);
        assert!(received[0].is_receipt);
        assert!(!received[1].is_receipt);
        assert!(received.iter().all(|m| m.bus == bus && m.payload() == [1, 2, 3, 4]));
    }

    session.control().set_can_loopback(false).unwrap();
    session.control().set_safety_mode(SafetyMode::NoOutput).unwrap();
}

#[test]
#[ignore = "requires an attached adapter"]
fn test_hardware_lin_echo() {
    let registry = registry();
    let mut session = registry.open("").unwrap();
    let mut rng = rand::rng();

    for port in [SerialPort::Lin1, SerialPort::Lin2] {
        session.control().set_uart_baud(port, 10_400).unwrap();
        session.serial().clear(port).unwrap();
        for _ in 0..10 {
            let len = rng.random_range(1..=10usize);
            let sent: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            session.serial().write(port, &sent).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert_eq!(session.serial().read(port).unwrap(), sent);
        }
    }
}
