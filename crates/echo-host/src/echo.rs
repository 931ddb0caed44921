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

//! The echo protocol: a 4-byte little-endian length, then that many bytes of payload. The
//! reply is framed the same way and carries the payload followed by [`ECHO_SUFFIX`]. Frames
//! are answered until the client closes the connection.

use eyre::bail;
use tcpbase_server::{Connection, Protocol, Session};
use tracing::{debug, info};

pub const ECHO_SUFFIX: &[u8] = b" from echo server";

pub struct EchoProtocol {
    max_message_bytes: u32,
}

impl EchoProtocol {
    pub fn new(max_message_bytes: u32) -> Self {
        Self { max_message_bytes }
    }
}

impl Protocol for EchoProtocol {
    fn handle_connection(&self, session: &mut Session) -> eyre::Result<()> {
        let mut frames = 0usize;
        loop {
            let mut header = [0u8; 4];
            match session.receive_all(&mut header)? {
                0 => break,
                4 => {}
                n => bail!("peer closed mid-header after {n} bytes"),
            }
            let length = u32::from_le_bytes(header);
            if length > self.max_message_bytes {
                bail!(
                    "message of {length} bytes exceeds limit of {}",
                    self.max_message_bytes
                );
            }

            let mut message = vec![0u8; length as usize];
            let received = session.receive_all(&mut message)?;
            if received < message.len() {
                bail!("peer closed after {received} of {length} payload bytes");
            }

            message.extend_from_slice(ECHO_SUFFIX);
            let reply_length = u32::try_from(message.len())?;
            session.send_all(&reply_length.to_le_bytes())?;
            session.send_all(&message)?;
            frames += 1;
        }
        debug!(peer = %session.peer_addr(), frames, "Echo session finished");
        Ok(())
    }

    fn on_start(&self) {
        info!("Echo server ready");
    }

    fn on_connection_accepted(&self, connection: &Connection) {
        info!(peer = %connection.peer_addr(), id = connection.id(), "Client connected");
    }

    fn on_disconnect(&self, connection: &Connection, ip: &str) {
        info!(ip, id = connection.id(), "Client disconnected");
    }
}
