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

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socket2::{SockAddr, Socket};
use tracing::{debug, trace};

use crate::error::NetworkError;
use crate::listener;
use crate::transfer;

/// One accepted TCP connection.
///
/// Closing a connection shuts the socket down in both directions and marks it closed; the
/// descriptor itself is released once the last owner drops it, so a thread still holding the
/// connection sees a closed-socket failure rather than a recycled descriptor.
pub struct Connection {
    id: u64,
    socket: Socket,
    raw_peer: SockAddr,
    peer: SocketAddr,
    ip: String,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        socket: Socket,
        raw_peer: SockAddr,
        peer: SocketAddr,
        ip: String,
    ) -> Self {
        Self {
            id,
            socket,
            raw_peer,
            peer,
            ip,
            closed: AtomicBool::new(false),
        }
    }

    /// Server-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registry key of the peer (dotted-quad IPv4).
    pub fn peer_ip(&self) -> &str {
        &self.ip
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn raw_peer_addr(&self) -> &SockAddr {
        &self.raw_peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|source| NetworkError::Configure {
                option: "local address",
                source,
            })?
            .as_socket()
            .ok_or(NetworkError::Closed)
    }

    /// The underlying socket, for protocols that need options beyond what this type exposes.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the connection down. Returns true if this call performed the close.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        match self.socket.shutdown(Shutdown::Both) {
            Ok(()) => trace!(id = self.id, ip = %self.ip, "Connection shut down"),
            // Already torn down by the peer.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => debug!(id = self.id, ip = %self.ip, error = ?e, "Shutdown failed"),
        }
        true
    }

    /// Replace the send and receive timeouts for the rest of this connection.
    pub fn set_timeouts(&self, timeout: Option<Duration>) -> Result<(), NetworkError> {
        listener::set_timeouts(&self.socket, timeout)
    }

    pub fn is_blocking(&self) -> Result<bool, NetworkError> {
        #[cfg(unix)]
        {
            self.socket
                .nonblocking()
                .map(|nonblocking| !nonblocking)
                .map_err(|source| NetworkError::Configure {
                    option: "blocking mode",
                    source,
                })
        }
        #[cfg(not(unix))]
        {
            Err(NetworkError::Configure {
                option: "blocking mode",
                source: io::ErrorKind::Unsupported.into(),
            })
        }
    }

    /// Send all of `buf`. Fails with [`NetworkError::Closed`] once the connection has been
    /// closed from the server side, and returns a short count if the peer stopped accepting
    /// data.
    pub fn send_all(&self, buf: &[u8]) -> Result<usize, NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }
        let mut stream = &self.socket;
        let result = transfer::send_all(&mut stream, buf);
        self.closed_or(buf.len(), result)
    }

    /// Fill `buf`. Fails with [`NetworkError::Closed`] once the connection has been closed from
    /// the server side, and returns a short count if the peer closed first.
    pub fn receive_all(&self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }
        let mut stream = &self.socket;
        let result = transfer::receive_all(&mut stream, buf);
        self.closed_or(buf.len(), result)
    }

    fn closed_or(
        &self,
        requested: usize,
        result: Result<usize, NetworkError>,
    ) -> Result<usize, NetworkError> {
        // A kick racing the transfer surfaces as a short count or an OS error; report it as the
        // close it was.
        match result {
            Ok(n) if n == requested => Ok(n),
            _ if self.is_closed() => Err(NetworkError::Closed),
            other => other,
        }
    }

    fn closed_io_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, NetworkError::Closed)
    }
}

impl Read for &Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(Connection::closed_io_error());
        }
        (&self.socket).read(buf)
    }
}

impl Write for &Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(Connection::closed_io_error());
        }
        (&self.socket).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&self.socket).flush()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
