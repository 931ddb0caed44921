// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Serving one accepted connection: accepted hook, protocol handler, then cleanup.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use socket2::SockAddr;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::error::NetworkError;
use crate::server::Shared;

/// Closes and unregisters one connection, exactly once: when [`Cleanup::run`] is called or when
/// the value is dropped, whichever comes first.
pub struct Cleanup {
    shared: Arc<Shared>,
    connection: Arc<Connection>,
    done: bool,
}

impl Cleanup {
    pub(crate) fn new(shared: Arc<Shared>, connection: Arc<Connection>) -> Self {
        Self {
            shared,
            connection,
            done: false,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn run(mut self) {
        self.perform();
    }

    fn perform(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let ip = self.connection.peer_ip();
        self.connection.close();
        self.shared.registry.remove(ip, &self.connection);
        debug!(id = self.connection.id(), ip, "Connection cleaned up");
        self.shared.protocol.on_disconnect(&self.connection, ip);
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        self.perform();
    }
}

/// What a protocol handler gets to work with for one connection.
pub struct Session {
    connection: Arc<Connection>,
    cleanup: Option<Cleanup>,
}

impl Session {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn peer_ip(&self) -> &str {
        self.connection.peer_ip()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    pub fn raw_peer_addr(&self) -> &SockAddr {
        self.connection.raw_peer_addr()
    }

    pub fn send_all(&self, buf: &[u8]) -> Result<usize, NetworkError> {
        self.connection.send_all(buf)
    }

    pub fn receive_all(&self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        self.connection.receive_all(buf)
    }

    /// Take ownership of closing and unregistering this connection. The server will no longer
    /// do it when the handler returns; the returned value does it when run or dropped.
    pub fn take_cleanup(&mut self) -> Option<Cleanup> {
        self.cleanup.take()
    }

    pub fn owns_cleanup(&self) -> bool {
        self.cleanup.is_some()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Run a registered connection through the protocol. Failures and panics in the handler stay
/// here; cleanup happens regardless.
pub(crate) fn serve(shared: &Arc<Shared>, connection: Arc<Connection>) {
    let protocol = shared.protocol.clone();
    let mut session = Session {
        connection: connection.clone(),
        cleanup: Some(Cleanup::new(shared.clone(), connection.clone())),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        protocol.on_connection_accepted(&connection);
        protocol.handle_connection(&mut session)
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => match e.downcast_ref::<NetworkError>() {
            Some(network) if network.is_disconnect() => {
                debug!(
                    id = connection.id(),
                    ip = connection.peer_ip(),
                    error = %network,
                    "Connection ended"
                );
            }
            _ => {
                warn!(
                    id = connection.id(),
                    ip = connection.peer_ip(),
                    error = ?e,
                    "Connection handler failed"
                );
            }
        },
        Err(payload) => {
            error!(
                id = connection.id(),
                ip = connection.peer_ip(),
                panic = panic_message(payload.as_ref()),
                "Connection handler panicked"
            );
        }
    }

    // Runs the cleanup unless the handler claimed it.
    drop(session);
}
