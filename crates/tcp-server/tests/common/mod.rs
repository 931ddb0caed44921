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

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tcpbase_server::{
    Connection, NetworkError, Protocol, ServerConfig, Session, TcpServer,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn loopback_config() -> ServerConfig {
    ServerConfig::new("0").with_bind_address("127.0.0.1")
}

pub fn server_addr(server: &TcpServer) -> SocketAddr {
    SocketAddr::V4(server.local_addr().expect("server is not bound"))
}

pub fn connect(server: &TcpServer) -> TcpStream {
    let stream = TcpStream::connect(server_addr(server)).expect("connect failed");
    stream
        .set_read_timeout(Some(WAIT))
        .expect("set_read_timeout failed");
    stream
}

/// Read until `buf` is full or the peer closes; returns bytes read.
pub fn read_fully(stream: &mut TcpStream, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

/// True if the server side has closed `stream`: EOF, or a reset.
pub fn observes_close(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(stream.read(&mut buf), Ok(0) | Err(_))
}

pub fn send(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).expect("client write failed");
}

/// Counts hook invocations.
#[derive(Default)]
pub struct Hooks {
    pub started: AtomicUsize,
    pub accepted: AtomicUsize,
    pub invalid: AtomicUsize,
    pub disconnected: AtomicUsize,
    pub disconnected_ids: Mutex<Vec<u64>>,
}

impl Hooks {
    pub fn started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn accepted(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn invalid(&self) {
        self.invalid.fetch_add(1, Ordering::SeqCst);
    }

    pub fn disconnected(&self, connection: &Connection) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
        self.disconnected_ids.lock().unwrap().push(connection.id());
    }

    pub fn disconnects(&self) -> usize {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Echoes 4-byte frames until the peer closes; records how each session ended.
#[derive(Default)]
pub struct FrameEcho {
    pub hooks: Hooks,
    pub closed_by_server: AtomicUsize,
    pub timeouts: AtomicUsize,
}

impl Protocol for FrameEcho {
    fn handle_connection(&self, session: &mut Session) -> eyre::Result<()> {
        let mut frame = [0u8; 4];
        loop {
            match session.receive_all(&mut frame) {
                Ok(4) => {
                    session.send_all(&frame)?;
                }
                Ok(_) => return Ok(()),
                Err(NetworkError::Closed) => {
                    self.closed_by_server.fetch_add(1, Ordering::SeqCst);
                    return Err(NetworkError::Closed.into());
                }
                Err(e) if e.is_timeout() => {
                    self.timeouts.fetch_add(1, Ordering::SeqCst);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn on_start(&self) {
        self.hooks.started();
    }

    fn on_connection_accepted(&self, _connection: &Connection) {
        self.hooks.accepted();
    }

    fn on_invalid_accept(&self, _error: &NetworkError) {
        self.hooks.invalid();
    }

    fn on_disconnect(&self, connection: &Connection, _ip: &str) {
        self.hooks.disconnected(connection);
    }
}

pub fn echo_server(config: ServerConfig) -> (Arc<FrameEcho>, TcpServer) {
    let protocol = Arc::new(FrameEcho::default());
    let server = TcpServer::new(config, protocol.clone());
    server.start(false).expect("server failed to start");
    (protocol, server)
}
