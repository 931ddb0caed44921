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

//! Address helpers: textual IPv4 and numeric port from raw socket addresses.

use std::net::{SocketAddr, SocketAddrV4};

use socket2::SockAddr;

/// The IPv4 part of a raw socket address, if it is an IPv4 address.
pub fn ipv4_of(addr: &SockAddr) -> Option<SocketAddrV4> {
    addr.as_socket_ipv4()
}

/// Dotted-quad text for a raw IPv4 socket address.
pub fn ipv4_text(addr: &SockAddr) -> Option<String> {
    ipv4_of(addr).map(|v4| v4.ip().to_string())
}

/// Port in host byte order for a raw IPv4 socket address.
pub fn port_of(addr: &SockAddr) -> Option<u16> {
    ipv4_of(addr).map(|v4| v4.port())
}

/// Registry key for a peer: its dotted-quad IPv4 address, or the full textual address for
/// anything that isn't IPv4.
pub fn peer_key(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.ip().to_string(),
        },
    }
}
