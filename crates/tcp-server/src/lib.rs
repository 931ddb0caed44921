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

//! A reusable base for blocking TCP servers.
//!
//! [`TcpServer`] owns the listen socket and an accept loop running on its own thread. Every
//! accepted connection is registered under its peer's IPv4 address and handed to a
//! [`Protocol`], either on a thread of its own or inline on the accept thread, depending on
//! the configured [`DispatchPolicy`]. When the handler returns the connection is closed and
//! unregistered. `stop` closes the listen socket, kicks every remaining connection and waits
//! for connection threads to wind down.
//!
//! The core carries opaque bytes; the wire protocol is entirely up to the [`Protocol`]
//! implementation, which gets full-length [`Connection::send_all`] and
//! [`Connection::receive_all`] to work with.

pub mod address;
mod config;
mod connection;
mod dispatch;
mod error;
mod lifecycle;
pub mod listener;
pub mod platform;
mod protocol;
mod registry;
mod server;
pub mod transfer;

pub use config::{ANY_ADDRESS, BlockingMode, DispatchPolicy, ServerConfig};
pub use connection::Connection;
pub use dispatch::{Cleanup, Session};
pub use error::{NetworkError, ServerError};
pub use protocol::Protocol;
pub use registry::ClientRegistry;
pub use server::TcpServer;
