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

use std::io;

use thiserror::Error;

/// A failed operating system network call. Every variant that wraps an `io::Error` carries the
/// originating OS error code, available through [`NetworkError::os_error_code`].
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("could not resolve {host}:{service}: {source}")]
    Resolve {
        host: String,
        service: String,
        #[source]
        source: io::Error,
    },
    #[error("no IPv4 address found for {host}:{service}")]
    NoAddress { host: String, service: String },
    #[error("could not create socket: {0}")]
    CreateSocket(#[source] io::Error),
    #[error("could not configure socket ({option}): {source}")]
    Configure {
        option: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("could not listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
    #[error("send failed after {sent} bytes: {source}")]
    Send {
        sent: usize,
        #[source]
        source: io::Error,
    },
    #[error("receive failed after {received} bytes: {source}")]
    Receive {
        received: usize,
        #[source]
        source: io::Error,
    },
    #[error("connection was closed by the server")]
    Closed,
}

impl NetworkError {
    /// The raw OS error code of the failing call, if the failure came from the OS.
    pub fn os_error_code(&self) -> Option<i32> {
        self.io_error().and_then(io::Error::raw_os_error)
    }

    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            NetworkError::Resolve { source, .. }
            | NetworkError::Configure { source, .. }
            | NetworkError::Bind { source, .. }
            | NetworkError::Listen { source, .. }
            | NetworkError::Send { source, .. }
            | NetworkError::Receive { source, .. } => Some(source),
            NetworkError::CreateSocket(source) | NetworkError::Accept(source) => Some(source),
            NetworkError::NoAddress { .. } | NetworkError::Closed => None,
        }
    }

    /// True if the failure means the peer or the server shut the connection down, as opposed
    /// to a timeout or some other transient condition.
    pub fn is_disconnect(&self) -> bool {
        match self {
            NetworkError::Closed => true,
            _ => matches!(
                self.io_error().map(io::Error::kind),
                Some(
                    io::ErrorKind::BrokenPipe
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::NotConnected
                )
            ),
        }
    }

    /// True if the failure is a per-socket send/receive timeout expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.io_error().map(io::Error::kind),
            Some(io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

/// Errors from the server control surface.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server is still draining its previous run")]
    Draining,
    #[error("could not spawn accept thread: {0}")]
    Spawn(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_error_code_is_preserved() {
        let e = NetworkError::Bind {
            addr: "0.0.0.0:80".to_string(),
            source: io::Error::from_raw_os_error(98),
        };
        assert_eq!(e.os_error_code(), Some(98));
        assert_eq!(NetworkError::Closed.os_error_code(), None);
    }

    #[test]
    fn test_classification() {
        let reset = NetworkError::Receive {
            received: 3,
            source: io::Error::from(io::ErrorKind::ConnectionReset),
        };
        assert!(reset.is_disconnect());
        assert!(!reset.is_timeout());

        let timed_out = NetworkError::Receive {
            received: 0,
            source: io::Error::from(io::ErrorKind::WouldBlock),
        };
        assert!(timed_out.is_timeout());
        assert!(!timed_out.is_disconnect());
        assert!(NetworkError::Closed.is_disconnect());
    }
}
