//! Session bridge integration tests
//!
//! Drives the async bridge against a minimal worker thread that serves
//! commands straight from the firmware emulator's transport.
//!
//! Run with: `cargo test -p common --test bridge_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockAdapter, with_timeout};
use common::{SessionCommand, SessionWorker, Transport, create_session_bridge};
use protocol::{ControlRequest, HealthStatus, UsbError, decode_c_string};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Serve health and version until shutdown; returns the commands handled
fn serve(worker: SessionWorker, adapter: MockAdapter) -> usize {
    let mut transport = adapter.transport();
    let mut handled = 0;

    while let Ok(cmd) = worker.recv_command() {
        match cmd {
            SessionCommand::Health { response } => {
                let setup = ControlRequest::GetHealth.setup();
                let mut buf = [0u8; HealthStatus::WIRE_SIZE];
                let result = transport
                    .read_control(&setup, &mut buf, DEFAULT_TEST_TIMEOUT)
                    .map_err(common::Error::from)
                    .and_then(|_| HealthStatus::decode(&buf).map_err(common::Error::from));
                let _ = response.send(result);
            }
            SessionCommand::Version { response } => {
                let setup = ControlRequest::GetVersion.setup();
                let mut buf = [0u8; 0x40];
                let result = transport
                    .read_control(&setup, &mut buf, DEFAULT_TEST_TIMEOUT)
                    .map(|n| decode_c_string(&buf[..n]))
                    .map_err(common::Error::from);
                let _ = response.send(result);
            }
            SessionCommand::Shutdown => break,
            _ => continue,
        }
        handled += 1;
    }
    handled
}

#[tokio::test]
async fn test_requests_reach_the_device() {
    let adapter = MockAdapter::new();
    let (bridge, worker) = create_session_bridge();
    let handle = {
        let adapter = adapter.clone();
        thread::spawn(move || serve(worker, adapter))
    };

    let health = with_timeout(DEFAULT_TEST_TIMEOUT, bridge.health())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(health.voltage, 12_000);
    assert_eq!(bridge.version().await.unwrap(), "DEV-mock-v1");

    bridge.shutdown().await.unwrap();
    assert_eq!(handle.join().unwrap(), 2);
    assert_eq!(adapter.transfer_count(), 2);
}

#[tokio::test]
async fn test_device_errors_come_back_through_the_reply() {
    let adapter = MockAdapter::new();
    let (bridge, worker) = create_session_bridge();
    let handle = {
        let adapter = adapter.clone();
        thread::spawn(move || serve(worker, adapter))
    };

    adapter.inject_failure(UsbError::Pipe);
    let err = bridge.health().await.unwrap_err();
    assert!(matches!(err, common::Error::Usb(UsbError::Pipe)));
    assert!(bridge.health().await.is_ok());

    bridge.shutdown().await.unwrap();
    handle.join().unwrap();
}

#[tokio::test]
async fn test_cloned_bridges_share_one_worker() {
    let adapter = MockAdapter::new();
    let (bridge, worker) = create_session_bridge();
    let handle = {
        let adapter = adapter.clone();
        thread::spawn(move || serve(worker, adapter))
    };

    let completed = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let bridge = bridge.clone();
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                bridge.health().await.unwrap();
                completed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 10);

    // Dropping the last bridge ends the worker loop
    drop(bridge);
    assert_eq!(handle.join().unwrap(), 10);
}

#[tokio::test]
async fn test_commands_after_worker_exit_fail() {
    let (bridge, worker) = create_session_bridge();
    let handle = thread::spawn(move || serve(worker, MockAdapter::new()));

    bridge.shutdown().await.unwrap();
    handle.join().unwrap();

    assert!(matches!(
        bridge.version().await,
        Err(common::Error::Channel(_))
    ));
}
