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

//! Listen socket creation and per-connection socket options.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::config::{BlockingMode, ServerConfig};
use crate::error::NetworkError;

/// Requested backlog; the kernel clamps it to its configured maximum (SOMAXCONN).
const MAX_BACKLOG: i32 = i32::MAX;

fn is_wildcard(host: &str) -> bool {
    host.is_empty() || host == "*"
}

/// Resolve `host`:`service` to one IPv4 address suitable for binding. An empty host or `*`
/// means the wildcard address.
pub fn resolve_ipv4(host: &str, service: &str) -> Result<SocketAddrV4, NetworkError> {
    let port: u16 = service.trim().parse().map_err(|_| NetworkError::Resolve {
        host: host.to_string(),
        service: service.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "service is not a port number"),
    })?;
    if is_wildcard(host) {
        return Ok(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    }
    let mut candidates = (host, port)
        .to_socket_addrs()
        .map_err(|source| NetworkError::Resolve {
            host: host.to_string(),
            service: service.to_string(),
            source,
        })?;
    candidates
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| NetworkError::NoAddress {
            host: host.to_string(),
            service: service.to_string(),
        })
}

fn set_blocking(socket: &Socket, mode: BlockingMode) -> Result<(), NetworkError> {
    socket
        .set_nonblocking(!mode.is_blocking())
        .map_err(|source| NetworkError::Configure {
            option: "blocking mode",
            source,
        })
}

/// Create the listen socket: resolve, create, apply the listen blocking mode, bind and listen.
/// Nothing is retried; on failure any socket created so far is closed before returning.
pub fn bind_listener(config: &ServerConfig) -> Result<Socket, NetworkError> {
    let addr = resolve_ipv4(&config.bind_address, &config.port)?;
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(NetworkError::CreateSocket)?;
    set_blocking(&socket, config.listen_blocking)?;
    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(|source| NetworkError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    socket
        .listen(MAX_BACKLOG)
        .map_err(|source| NetworkError::Listen {
            addr: addr.to_string(),
            source,
        })?;
    debug!(%addr, blocking = config.listen_blocking.is_blocking(), "Listen socket ready");
    Ok(socket)
}

/// The address a listen socket actually bound to.
pub fn bound_addr(socket: &Socket) -> Option<SocketAddrV4> {
    socket.local_addr().ok()?.as_socket_ipv4()
}

/// Apply send/receive timeouts and the blocking mode to a freshly accepted socket.
pub fn configure_accepted(
    socket: &Socket,
    timeout: Option<Duration>,
    mode: BlockingMode,
) -> Result<(), NetworkError> {
    set_timeouts(socket, timeout)?;
    set_blocking(socket, mode)
}

/// Apply `timeout` to both directions of `socket`; `None` waits indefinitely.
pub(crate) fn set_timeouts(
    socket: &Socket,
    timeout: Option<Duration>,
) -> Result<(), NetworkError> {
    socket
        .set_write_timeout(timeout)
        .map_err(|source| NetworkError::Configure {
            option: "send timeout",
            source,
        })?;
    socket
        .set_read_timeout(timeout)
        .map_err(|source| NetworkError::Configure {
            option: "receive timeout",
            source,
        })
}
