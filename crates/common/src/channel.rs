//! Async channel bridge between Tokio callers and a session worker thread
//!
//! A session is not safe for concurrent use, so async code never touches it
//! directly. Commands travel over a bounded channel to the one thread that
//! owns the session, and each command carries a oneshot for its reply.

use crate::transport::RecvOutcome;
use crate::{Error, Result};
use async_channel::{Receiver, Sender, bounded};
use protocol::{CanClearTarget, CanMessage, ControlRequest, HealthStatus, SerialPort};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Commands from async callers to the session worker
#[derive(Debug)]
pub enum SessionCommand {
    /// Read a health snapshot
    Health {
        response: oneshot::Sender<Result<HealthStatus>>,
    },

    /// Read the firmware version string
    Version {
        response: oneshot::Sender<Result<String>>,
    },

    /// Issue an arbitrary control request; IN requests reply with the payload
    Control {
        request: ControlRequest,
        response: oneshot::Sender<Result<Vec<u8>>>,
    },

    /// Send a batch of CAN messages in one transfer
    CanSend {
        messages: Vec<CanMessage>,
        response: oneshot::Sender<Result<()>>,
    },

    /// Block until CAN records arrive, the token fires, or the timeout passes
    CanRecv {
        timeout: Option<Duration>,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<RecvOutcome>>,
    },

    /// Flush the receive queue or one bus's transmit queue
    CanClear {
        target: CanClearTarget,
        response: oneshot::Sender<Result<()>>,
    },

    /// Write bytes to a serial port; replies with the count accepted
    SerialWrite {
        port: SerialPort,
        data: Vec<u8>,
        response: oneshot::Sender<Result<usize>>,
    },

    /// Drain a serial port's device-side buffer
    SerialRead {
        port: SerialPort,
        response: oneshot::Sender<Result<Vec<u8>>>,
    },

    /// Discard a serial port's device-side buffer
    SerialClear {
        port: SerialPort,
        response: oneshot::Sender<Result<()>>,
    },

    /// Stop the worker and release the session
    Shutdown,
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct SessionBridge {
    cmd_tx: Sender<SessionCommand>,
}

impl SessionBridge {
    /// Send a command to the session worker
    pub async fn send_command(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.send_command(make(tx)).await?;
        rx.await.map_err(|e| Error::Channel(e.to_string()))?
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.call(|response| SessionCommand::Health { response })
            .await
    }

    pub async fn version(&self) -> Result<String> {
        self.call(|response| SessionCommand::Version { response })
            .await
    }

    pub async fn control(&self, request: ControlRequest) -> Result<Vec<u8>> {
        self.call(|response| SessionCommand::Control { request, response })
            .await
    }

    pub async fn can_send(&self, messages: Vec<CanMessage>) -> Result<()> {
        self.call(|response| SessionCommand::CanSend { messages, response })
            .await
    }

    pub async fn can_recv(
        &self,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<RecvOutcome> {
        self.call(|response| SessionCommand::CanRecv {
            timeout,
            cancel,
            response,
        })
        .await
    }

    pub async fn can_clear(&self, target: CanClearTarget) -> Result<()> {
        self.call(|response| SessionCommand::CanClear { target, response })
            .await
    }

    pub async fn serial_write(&self, port: SerialPort, data: Vec<u8>) -> Result<usize> {
        self.call(|response| SessionCommand::SerialWrite {
            port,
            data,
            response,
        })
        .await
    }

    pub async fn serial_read(&self, port: SerialPort) -> Result<Vec<u8>> {
        self.call(|response| SessionCommand::SerialRead { port, response })
            .await
    }

    pub async fn serial_clear(&self, port: SerialPort) -> Result<()> {
        self.call(|response| SessionCommand::SerialClear { port, response })
            .await
    }

    /// Ask the worker to stop; the session is released when it exits
    pub async fn shutdown(&self) -> Result<()> {
        self.send_command(SessionCommand::Shutdown).await
    }
}

/// Handle for the session worker thread (blocking)
pub struct SessionWorker {
    cmd_rx: Receiver<SessionCommand>,
}

impl SessionWorker {
    /// Receive a command (blocking); fails once every bridge is dropped
    pub fn recv_command(&self) -> Result<SessionCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<SessionCommand> {
        self.cmd_rx.try_recv().ok()
    }
}

/// Create the channel bridge between Tokio and a session worker
///
/// Returns (SessionBridge for Tokio, SessionWorker for the worker thread)
pub fn create_session_bridge() -> (SessionBridge, SessionWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    (SessionBridge { cmd_tx }, SessionWorker { cmd_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_session_bridge();

        let handle = std::thread::spawn(move || match worker.recv_command().unwrap() {
            SessionCommand::Version { response } => {
                let _ = response.send(Ok("v9".to_string()));
                true
            }
            _ => false,
        });

        assert_eq!(bridge.version().await.unwrap(), "v9");
        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn test_dropped_worker_surfaces_channel_error() {
        let (bridge, worker) = create_session_bridge();
        drop(worker);

        let err = bridge.health().await.unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
    }

    #[test]
    fn test_worker_sees_closed_bridge() {
        let (bridge, worker) = create_session_bridge();
        drop(bridge);
        assert!(worker.recv_command().is_err());
        assert!(worker.try_recv_command().is_none());
    }
}
