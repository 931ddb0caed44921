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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The IPv4 wildcard address.
pub const ANY_ADDRESS: &str = "0.0.0.0";

/// How an accepted connection is served.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Each connection runs on its own detached thread; the accept loop moves straight on.
    #[default]
    Concurrent,
    /// The accept loop runs each connection to completion before accepting the next.
    Serial,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingMode {
    #[default]
    Blocking,
    NonBlocking,
}

impl BlockingMode {
    pub fn is_blocking(self) -> bool {
        self == BlockingMode::Blocking
    }

    pub fn from_blocking(blocking: bool) -> Self {
        if blocking {
            BlockingMode::Blocking
        } else {
            BlockingMode::NonBlocking
        }
    }
}

/// Construction-time settings for a [`crate::TcpServer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Textual port to listen on. "0" asks the OS for an ephemeral port.
    pub port: String,
    /// Send and receive timeout applied to every accepted socket, in milliseconds. 0 blocks
    /// indefinitely.
    pub timeout_ms: u64,
    pub dispatch: DispatchPolicy,
    /// Only consulted when the listen socket is created.
    pub listen_blocking: BlockingMode,
    /// Initial mode for accepted sockets; can be changed on a running server.
    pub accepted_blocking: BlockingMode,
    /// Release the platform networking subsystem when the last server using it goes away.
    pub teardown_platform: bool,
    /// How long `stop` waits for in-flight connection threads after kicking every peer, in
    /// milliseconds. 0 waits indefinitely.
    pub drain_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ANY_ADDRESS.to_string(),
            port: "0".to_string(),
            timeout_ms: 0,
            dispatch: DispatchPolicy::default(),
            listen_blocking: BlockingMode::default(),
            accepted_blocking: BlockingMode::default(),
            teardown_platform: true,
            drain_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_listen_blocking(mut self, mode: BlockingMode) -> Self {
        self.listen_blocking = mode;
        self
    }

    pub fn with_accepted_blocking(mut self, mode: BlockingMode) -> Self {
        self.accepted_blocking = mode;
        self
    }

    pub fn with_teardown_platform(mut self, teardown: bool) -> Self {
        self.teardown_platform = teardown;
        self
    }

    pub fn with_drain_timeout_ms(mut self, drain_timeout_ms: u64) -> Self {
        self.drain_timeout_ms = drain_timeout_ms;
        self
    }

    /// The per-socket I/O timeout, `None` meaning block indefinitely.
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.drain_timeout_ms > 0).then(|| Duration::from_millis(self.drain_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Figment;
    use figment::providers::{Format, Serialized, Yaml};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("8080");
        assert_eq!(config.bind_address, ANY_ADDRESS);
        assert_eq!(config.port, "8080");
        assert_eq!(config.io_timeout(), None);
        assert_eq!(config.dispatch, DispatchPolicy::Concurrent);
        assert!(config.listen_blocking.is_blocking());
        assert!(config.accepted_blocking.is_blocking());
        assert_eq!(config.drain_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new("0")
            .with_bind_address("127.0.0.1")
            .with_timeout_ms(1500)
            .with_dispatch(DispatchPolicy::Serial)
            .with_accepted_blocking(BlockingMode::NonBlocking)
            .with_drain_timeout_ms(0);
        assert_eq!(config.io_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.dispatch, DispatchPolicy::Serial);
        assert!(!config.accepted_blocking.is_blocking());
        assert_eq!(config.drain_timeout(), None);
    }

    #[test]
    fn test_layered_yaml_overrides_defaults() {
        let yaml = r#"
port: "7777"
timeout_ms: 250
dispatch: serial
listen_blocking: non_blocking
"#;
        let config: ServerConfig = Figment::new()
            .merge(Serialized::defaults(ServerConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(
            config,
            ServerConfig {
                port: "7777".to_string(),
                timeout_ms: 250,
                dispatch: DispatchPolicy::Serial,
                listen_blocking: BlockingMode::NonBlocking,
                ..ServerConfig::default()
            }
        );
    }
}
