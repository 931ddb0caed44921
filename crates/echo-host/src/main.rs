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

use std::sync::Arc;

use clap::Parser;
use tcpbase_server::{TcpServer, platform};
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::config::{Args, HostConfig};
use crate::echo::EchoProtocol;

mod config;
mod echo;

fn init_tracing(debug: bool) -> Result<(), eyre::Report> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(true)
                .with_file(true)
                .with_target(false)
                .with_line_number(true)
                .with_thread_names(true)
                .with_span_events(fmt::format::FmtSpan::NONE),
        )
        .with(filter)
        .try_init()?;

    Ok(())
}

#[cfg(unix)]
fn stop_on_signal(server: Arc<TcpServer>) -> Result<(), eyre::Report> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    std::thread::Builder::new()
        .name("echo-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "Signal received, stopping...");
                server.stop(false);
            }
        })?;
    Ok(())
}

#[cfg(not(unix))]
fn stop_on_signal(_server: Arc<TcpServer>) -> Result<(), eyre::Report> {
    Ok(())
}

fn main() -> Result<(), eyre::Report> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing(args.debug)?;

    let config = HostConfig::load(&args)?;
    info!(
        version = TcpServer::version(),
        explicit_platform_init = platform::requires_explicit_init(),
        "Starting echo host"
    );

    let server = Arc::new(TcpServer::new(
        config.server.clone(),
        Arc::new(EchoProtocol::new(config.max_message_bytes)),
    ));
    stop_on_signal(server.clone())?;

    server.start(true)?;
    info!("Done.");
    Ok(())
}
