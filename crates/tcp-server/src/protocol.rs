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

use crate::connection::Connection;
use crate::dispatch::Session;
use crate::error::NetworkError;

/// The application protocol a [`crate::TcpServer`] serves.
///
/// Only [`Protocol::handle_connection`] is required. The hooks default to doing nothing.
pub trait Protocol: Send + Sync + 'static {
    /// Speak the protocol over one accepted connection. Once this returns, the connection is
    /// closed and unregistered, unless the handler took the session's cleanup for itself.
    ///
    /// Errors are local to the connection: they are logged and never stop the server.
    fn handle_connection(&self, session: &mut Session) -> eyre::Result<()>;

    /// Called on the accept thread once the server is live, before the first accept.
    fn on_start(&self) {}

    /// Called for every registered connection right before `handle_connection`, on the thread
    /// that will serve it.
    fn on_connection_accepted(&self, _connection: &Connection) {}

    /// Called when accept fails, or an accepted socket can't be configured, while the server is
    /// running. The accept loop keeps going.
    fn on_invalid_accept(&self, _error: &NetworkError) {}

    /// Called exactly once per connection, after it has been closed and unregistered.
    fn on_disconnect(&self, _connection: &Connection, _ip: &str) {}
}
