//! Integration tests for the async session bridge
//!
//! A session is moved onto its worker thread and driven from Tokio.

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockAdapter, MockBackend, with_timeout};
use common::{CancellationToken, RecvOutcome, SessionBridge, create_session_bridge};
use driver::{DeviceRegistry, spawn_session_worker};
use protocol::{CanBus, CanMessage, ControlRequest, SafetyMode, SerialPort};
use std::thread::JoinHandle;
use std::time::Duration;

fn start() -> (MockAdapter, DeviceRegistry, SessionBridge, JoinHandle<()>) {
    let adapter = MockAdapter::new();
    let registry = DeviceRegistry::new(MockBackend::new(vec![adapter.clone()]));
    let session = registry.open(adapter.serial()).unwrap();
    let (bridge, worker) = create_session_bridge();
    let handle = spawn_session_worker(session, worker).unwrap();
    (adapter, registry, bridge, handle)
}

#[tokio::test]
async fn test_queries_through_bridge() {
    let (_adapter, _registry, bridge, handle) = start();

    let health = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.health())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(health.voltage, 12_000);
    assert_eq!(bridge.version().await.unwrap(), "DEV-mock-v1");

    bridge.shutdown().await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_can_round_trip_through_bridge() {
    let (_adapter, _registry, bridge, handle) = start();

    bridge
        .control(ControlRequest::SetSafetyMode(SafetyMode::AllOutput))
        .await
        .unwrap();
    bridge
        .control(ControlRequest::SetCanLoopback(true))
        .await
        .unwrap();
    let msg = CanMessage::new(0x321, false, &[1, 2, 3], CanBus::Can2).unwrap();
    bridge.can_send(vec![msg]).await.unwrap();

    let outcome = bridge
        .can_recv(Some(Duration::from_secs(1)), CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        RecvOutcome::Messages(messages) => {
            assert_eq!(messages.len(), 2);
            assert!(messages[0].is_receipt);
            assert_eq!(messages[1].payload(), &[1, 2, 3]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    bridge.shutdown().await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_cancel_interrupts_blocked_receive() {
    let (_adapter, _registry, bridge, handle) = start();
    let token = CancellationToken::new();

    let recv = {
        let bridge = bridge.clone();
        let token = token.clone();
        tokio::spawn(async move { bridge.can_recv(None, token).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();

    let outcome = with_timeout(DEFAULT_TEST_TIMEOUT, recv)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RecvOutcome::Cancelled);

    bridge.shutdown().await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_serial_through_bridge() {
    let (_adapter, _registry, bridge, handle) = start();

    let written = bridge
        .serial_write(SerialPort::Lin1, b"ping".to_vec())
        .await
        .unwrap();
    assert_eq!(written, 4);
    assert_eq!(bridge.serial_read(SerialPort::Lin1).await.unwrap(), b"ping");

    bridge.serial_clear(SerialPort::Lin1).await.unwrap();
    bridge.shutdown().await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_worker_exit_releases_adapter() {
    let (adapter, registry, bridge, handle) = start();

    drop(bridge);
    handle.join().unwrap();

    assert!(registry.open(adapter.serial()).is_ok());
}
