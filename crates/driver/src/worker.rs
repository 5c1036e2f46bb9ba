//! Session worker thread
//!
//! Owns one [`Session`] on a dedicated OS thread and serves
//! [`SessionCommand`]s from async callers. The thread exits on `Shutdown` or
//! once every [`common::SessionBridge`] is dropped; the session, and with it
//! the claim on the adapter, is dropped on the way out.

use crate::session::Session;
use common::{Error, Result, SessionCommand, SessionWorker};
use std::thread::JoinHandle;
use tracing::{debug, info};

/// Serves bridge commands against one session
pub struct SessionWorkerThread {
    session: Session,
    worker: SessionWorker,
}

impl SessionWorkerThread {
    pub fn new(session: Session, worker: SessionWorker) -> Self {
        Self { session, worker }
    }

    /// Run until shutdown or until every bridge is gone
    pub fn run(mut self) {
        info!("Session worker for {} started", self.session.serial_number());

        loop {
            match self.worker.recv_command() {
                Ok(SessionCommand::Shutdown) => {
                    info!("Session worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => {
                    debug!("All session bridges dropped");
                    break;
                }
            }
        }

        info!("Session worker for {} stopped", self.session.serial_number());
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        let session = &mut self.session;
        match cmd {
            SessionCommand::Health { response } => {
                let _ = response.send(session.health());
            }
            SessionCommand::Version { response } => {
                let _ = response.send(session.control().get_version());
            }
            SessionCommand::Control { request, response } => {
                let _ = response.send(session.control().request(request));
            }
            SessionCommand::CanSend { messages, response } => {
                debug!("Sending {} CAN message(s)", messages.len());
                let _ = response.send(session.can().send_many(&messages));
            }
            SessionCommand::CanRecv {
                timeout,
                cancel,
                response,
            } => {
                let _ = response.send(session.can().recv_until(&cancel, timeout));
            }
            SessionCommand::CanClear { target, response } => {
                let _ = response.send(session.can().clear(target));
            }
            SessionCommand::SerialWrite {
                port,
                data,
                response,
            } => {
                let _ = response.send(session.serial().write(port, &data));
            }
            SessionCommand::SerialRead { port, response } => {
                let _ = response.send(session.serial().read(port));
            }
            SessionCommand::SerialClear { port, response } => {
                let _ = response.send(session.serial().clear(port));
            }
            SessionCommand::Shutdown => {
                // Handled in run()
            }
        }
    }
}

/// Spawn the worker thread for `session`
pub fn spawn_session_worker(session: Session, worker: SessionWorker) -> Result<JoinHandle<()>> {
    let name = format!("session-{}", session.serial_number());
    std::thread::Builder::new()
        .name(name)
        .spawn(move || SessionWorkerThread::new(session, worker).run())
        .map_err(Error::Io)
}
