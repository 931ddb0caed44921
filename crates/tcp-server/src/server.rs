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

//! The server control surface and the accept loop behind it.

use std::cell::Cell;
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use socket2::{SockAddr, Socket};
use tracing::{debug, error, info, warn};

use crate::address::peer_key;
use crate::config::{BlockingMode, DispatchPolicy, ServerConfig};
use crate::connection::Connection;
use crate::dispatch::{self, Cleanup};
use crate::error::{NetworkError, ServerError};
use crate::lifecycle::{Completion, InFlight};
use crate::listener::{bind_listener, bound_addr, configure_accepted};
use crate::platform::PlatformLease;
use crate::protocol::Protocol;
use crate::registry::ClientRegistry;

/// How often a non-blocking listen socket is polled for connections.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pause after a failed accept, so a persistent failure (e.g. out of descriptors) doesn't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);
const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

thread_local! {
    /// Set on accept and connection threads, which must never wait for their own drain.
    static SERVER_THREAD: Cell<bool> = const { Cell::new(false) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the control surface, the accept thread and connection threads.
pub(crate) struct Shared {
    pub(crate) config: ServerConfig,
    pub(crate) registry: ClientRegistry<Arc<Connection>>,
    pub(crate) protocol: Arc<dyn Protocol>,
    running: AtomicBool,
    accepted_blocking: AtomicBool,
    listener: Mutex<Option<Arc<Socket>>>,
    local_addr: Mutex<Option<SocketAddrV4>>,
    accept_loop: Completion,
    in_flight: InFlight,
    next_connection_id: AtomicU64,
    // Serializes start and stop against each other.
    control: Mutex<()>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn accepted_mode(&self) -> BlockingMode {
        BlockingMode::from_blocking(self.accepted_blocking.load(Ordering::Relaxed))
    }

    fn kick(&self, ip: &str) -> usize {
        let connections = self.registry.extract(ip);
        for connection in &connections {
            connection.close();
        }
        if !connections.is_empty() {
            info!(ip, count = connections.len(), "Kicked client");
        }
        connections.len()
    }

    fn kick_all(&self) -> usize {
        let mut kicked = 0;
        for (ip, connections) in self.registry.extract_all() {
            for connection in &connections {
                connection.close();
            }
            debug!(ip, count = connections.len(), "Kicked client");
            kicked += connections.len();
        }
        kicked
    }

    fn accept_loop(self: Arc<Self>, listener: Arc<Socket>) {
        SERVER_THREAD.set(true);
        info!(addr = ?bound_addr(&listener), "Accepting connections");
        self.protocol.on_start();

        while self.is_running() {
            match listener.accept() {
                Ok((socket, raw_peer)) => {
                    if !self.is_running() {
                        debug!("Discarding connection accepted during shutdown");
                        break;
                    }
                    self.admit(socket, raw_peer);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    if !self.is_running() {
                        break;
                    }
                    let error = NetworkError::Accept(e);
                    warn!(%error, "Accept failed");
                    self.protocol.on_invalid_accept(&error);
                    thread::sleep(ACCEPT_ERROR_BACKOFF);
                }
            }
        }

        // Closes the listen socket; `stop` already released its reference.
        drop(listener);
        self.drain();
        self.accept_loop.finish();
    }

    /// Configure, register and dispatch one accepted socket.
    fn admit(self: &Arc<Self>, socket: Socket, raw_peer: SockAddr) {
        let Some(peer) = raw_peer.as_socket() else {
            let error = NetworkError::Accept(io::Error::new(
                io::ErrorKind::InvalidData,
                "accepted connection has no inet peer address",
            ));
            warn!(%error, "Rejecting connection");
            self.protocol.on_invalid_accept(&error);
            return;
        };
        if let Err(error) =
            configure_accepted(&socket, self.config.io_timeout(), self.accepted_mode())
        {
            warn!(%peer, %error, "Could not configure accepted socket, closing it");
            self.protocol.on_invalid_accept(&error);
            return;
        }

        let ip = peer_key(&peer);
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(id, socket, raw_peer, peer, ip.clone()));
        self.registry.add(&ip, connection.clone());
        debug!(id, %peer, "Accepted connection");
        // A stop that kicked everyone between the accept and the registration above would
        // otherwise leave this connection open.
        if !self.is_running() {
            debug!(id, %peer, "Dropping connection accepted during shutdown");
            Cleanup::new(self.clone(), connection).run();
            return;
        }

        match self.config.dispatch {
            DispatchPolicy::Serial => dispatch::serve(self, connection),
            DispatchPolicy::Concurrent => {
                self.in_flight.enter();
                let shared = self.clone();
                let spawned = thread::Builder::new()
                    .name(format!("tcp-conn-{ip}"))
                    .spawn({
                        let connection = connection.clone();
                        move || {
                            SERVER_THREAD.set(true);
                            let _in_flight = shared.in_flight.guard();
                            dispatch::serve(&shared, connection);
                        }
                    });
                if let Err(e) = spawned {
                    error!(
                        id, %peer, error = ?e,
                        "Could not spawn connection thread, dropping connection"
                    );
                    self.in_flight.leave();
                    Cleanup::new(self.clone(), connection).run();
                }
            }
        }
    }

    /// Kick every peer still registered, then give in-flight connection threads up to the
    /// drain timeout to unwind.
    fn drain(&self) {
        let kicked = self.kick_all();
        if kicked > 0 {
            info!(kicked, "Disconnected remaining connections");
        }
        if !self.in_flight.wait_idle(self.config.drain_timeout()) {
            warn!(
                remaining = self.in_flight.count(),
                "Drain timed out with connection threads still running"
            );
        }
        info!("Server stopped");
    }

    /// Unblock an accept in progress on `listener`.
    fn interrupt(listener: &Socket, addr: Option<SocketAddrV4>) {
        // Shutting a listening socket down wakes a blocked accept on Linux; elsewhere a
        // throwaway connection does it.
        let _ = listener.shutdown(Shutdown::Both);
        if let Some(addr) = addr {
            let ip = if addr.ip().is_unspecified() {
                Ipv4Addr::LOCALHOST
            } else {
                *addr.ip()
            };
            let target = SocketAddr::V4(SocketAddrV4::new(ip, addr.port()));
            let _ = TcpStream::connect_timeout(&target, WAKE_CONNECT_TIMEOUT);
        }
    }
}

/// A TCP server: owns the listen socket, runs the accept loop on its own thread, keeps the
/// registry of connected clients and hands every connection to a [`Protocol`].
///
/// Dropping the server stops it and waits for the drain to finish.
pub struct TcpServer {
    shared: Arc<Shared>,
    _platform: PlatformLease,
}

impl TcpServer {
    pub fn new(config: ServerConfig, protocol: Arc<dyn Protocol>) -> Self {
        let platform = PlatformLease::acquire(config.teardown_platform);
        let accepted_blocking = AtomicBool::new(config.accepted_blocking.is_blocking());
        let shared = Arc::new(Shared {
            config,
            registry: ClientRegistry::new(),
            protocol,
            running: AtomicBool::new(false),
            accepted_blocking,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            accept_loop: Completion::new(),
            in_flight: InFlight::new(),
            next_connection_id: AtomicU64::new(1),
            control: Mutex::new(()),
        });
        Self {
            shared,
            _platform: platform,
        }
    }

    /// The library version.
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Bind the listen socket and start accepting on a background thread. A setup failure is
    /// returned here and leaves the server stopped. With `wait`, blocks until the accept loop
    /// has stopped and drained.
    ///
    /// Called from one of the server's own threads while the previous run is still draining,
    /// returns [`ServerError::Draining`] instead of waiting on itself.
    pub fn start(&self, wait: bool) -> Result<(), ServerError> {
        let shared = &self.shared;
        {
            let _control = lock(&shared.control);
            if shared.is_running() {
                return Err(ServerError::AlreadyRunning);
            }
            // A previous run may still be draining. Its own threads can't wait for that.
            if SERVER_THREAD.get() && !shared.accept_loop.is_finished() {
                return Err(ServerError::Draining);
            }
            shared.accept_loop.wait();

            let listener = Arc::new(bind_listener(&shared.config)?);
            let local_addr = bound_addr(&listener);
            *lock(&shared.local_addr) = local_addr;
            *lock(&shared.listener) = Some(listener.clone());
            shared.accept_loop.reset();
            shared.running.store(true, Ordering::Release);

            let spawned = thread::Builder::new().name("tcp-accept".to_string()).spawn({
                let shared = shared.clone();
                move || shared.accept_loop(listener)
            });
            if let Err(e) = spawned {
                shared.running.store(false, Ordering::Release);
                lock(&shared.listener).take();
                lock(&shared.local_addr).take();
                shared.accept_loop.finish();
                return Err(ServerError::Spawn(e));
            }
            info!(addr = ?local_addr, dispatch = ?shared.config.dispatch, "Server started");
        }

        if wait {
            self.wait();
        }
        Ok(())
    }

    /// Stop accepting, close the listen socket and kick every registered connection, then
    /// drain: in-flight connection threads get up to the drain timeout to finish. With `wait`,
    /// blocks until the drain is done. Stopping a stopped server does nothing.
    pub fn stop(&self, wait: bool) {
        let shared = &self.shared;
        {
            let _control = lock(&shared.control);
            if shared.running.swap(false, Ordering::AcqRel) {
                info!("Stopping server");
                let addr = lock(&shared.local_addr).take();
                if let Some(listener) = lock(&shared.listener).take() {
                    Shared::interrupt(&listener, addr);
                }
                // A serial handler runs on the accept thread; closing its connection is what
                // lets the loop see the stop.
                let kicked = shared.kick_all();
                if kicked > 0 {
                    info!(kicked, "Disconnected connections on stop");
                }
            }
        }
        if wait {
            self.wait();
        }
    }

    /// Block until the accept loop has finished draining. Returns immediately on an accept or
    /// connection thread, since those are what the drain waits for.
    fn wait(&self) {
        if SERVER_THREAD.get() {
            debug!("Not waiting for drain from a server thread");
            return;
        }
        self.shared.accept_loop.wait();
    }

    /// Close every connection from `ip`. Handlers using them see a closed-socket failure on
    /// their next transfer. Returns how many connections were closed.
    pub fn kick(&self, ip: &str) -> usize {
        self.shared.kick(ip)
    }

    pub fn kick_all(&self) -> usize {
        self.shared.kick_all()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Number of distinct peers with at least one open connection.
    pub fn client_count(&self) -> usize {
        self.shared.registry.count_clients()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.registry.count_connections()
    }

    /// Point-in-time copy of every peer and its open connections.
    pub fn clients(&self) -> Vec<(String, Vec<Arc<Connection>>)> {
        self.shared.registry.snapshot()
    }

    pub fn connections_for(&self, ip: &str) -> Vec<Arc<Connection>> {
        self.shared.registry.lookup(ip)
    }

    /// Address the listen socket is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        *lock(&self.shared.local_addr)
    }

    pub fn local_ipv4(&self) -> Option<String> {
        self.local_addr().map(|addr| addr.ip().to_string())
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    pub fn listen_blocking(&self) -> bool {
        self.shared.config.listen_blocking.is_blocking()
    }

    pub fn accepted_blocking(&self) -> bool {
        self.shared.accepted_blocking.load(Ordering::Relaxed)
    }

    /// Blocking mode for connections accepted from now on. Open connections keep theirs.
    pub fn set_accepted_blocking(&self, blocking: bool) {
        self.shared
            .accepted_blocking
            .store(blocking, Ordering::Relaxed);
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop(true);
    }
}
