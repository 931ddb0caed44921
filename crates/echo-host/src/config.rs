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

use std::path::{Path, PathBuf};

use clap::builder::ValueHint;
use clap_derive::Parser;
use eyre::bail;
use figment::Figment;
use figment::providers::{Format as ProviderFormat, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tcpbase_server::{DispatchPolicy, ServerConfig};

/// Default cap on a single echo message.
pub const DEFAULT_MAX_MESSAGE_BYTES: u32 = 1 << 20;

#[derive(Parser, Debug)]
pub struct Args {
    #[arg(
        long,
        value_name = "config",
        help = "Path to configuration (YAML) file to use, if any. If not specified, defaults are used.\
                Configuration file values can be overridden by command line arguments.",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_name = "bind-address", help = "Address to listen on")]
    pub bind_address: Option<String>,

    #[arg(short, long, value_name = "port", help = "Port to listen on")]
    pub port: Option<String>,

    #[arg(
        long,
        value_name = "timeout-ms",
        help = "Per-connection send/receive timeout in milliseconds (0 blocks indefinitely)"
    )]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Serve one connection at a time on the accept thread")]
    pub serial: bool,

    #[arg(
        long,
        value_name = "max-message-bytes",
        help = "Largest message a client may send"
    )]
    pub max_message_bytes: Option<u32>,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub server: ServerConfig,
    pub max_message_bytes: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::new("7777"),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl HostConfig {
    /// Defaults, then the YAML file if one was given, then command line arguments.
    pub fn load(args: &Args) -> Result<Self, eyre::Report> {
        let mut config = Self::from_file(args.config_file.as_deref())?;
        config.apply_args(args);
        Ok(config)
    }

    fn from_file(path: Option<&Path>) -> Result<Self, eyre::Report> {
        let mut figment = Figment::new().merge(Serialized::defaults(HostConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                bail!("configuration file {} does not exist", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        Ok(figment.extract()?)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = &args.port {
            self.server.port = port.clone();
        }
        if let Some(timeout_ms) = args.timeout_ms {
            self.server.timeout_ms = timeout_ms;
        }
        if args.serial {
            self.server.dispatch = DispatchPolicy::Serial;
        }
        if let Some(max) = args.max_message_bytes {
            self.max_message_bytes = max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let args = Args::parse_from(["tcpbase-echo-host"]);
        assert_eq!(HostConfig::load(&args).unwrap(), HostConfig::default());
    }

    #[test]
    fn test_file_then_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: \"9000\"\n  timeout_ms: 1000\nmax_message_bytes: 64"
        )
        .unwrap();

        let args = Args::parse_from([
            "tcpbase-echo-host",
            "--config-file",
            file.path().to_str().unwrap(),
            "--timeout-ms",
            "250",
            "--serial",
        ]);
        let config = HostConfig::load(&args).unwrap();
        assert_eq!(config.server.port, "9000");
        assert_eq!(config.server.timeout_ms, 250);
        assert_eq!(config.server.dispatch, DispatchPolicy::Serial);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.max_message_bytes, 64);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let args = Args::parse_from([
            "tcpbase-echo-host",
            "--config-file",
            "/nonexistent/echo-host.yaml",
        ]);
        assert!(HostConfig::load(&args).is_err());
    }
}
