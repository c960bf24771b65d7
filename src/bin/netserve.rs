// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use clap::Parser;
use dotenv::dotenv;
use netserve::network::ConnectionId;
use netserve::service::setup_tracing;
use netserve::{Action, AppResult, ConnectionInfo, LogSink, Protocol, Server, ServerSettings, Session};
use tokio::net::TcpStream;
use tokio::runtime;
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

/// Line echo protocol, `quit` closes the connection.
struct LineEcho {
    info: ConnectionInfo,
}

impl LogSink for LineEcho {}

impl Protocol for LineEcho {
    type Session = LineEchoSession;

    fn get_info(&self) -> ConnectionInfo {
        self.info.clone()
    }

    fn on_accept(&self, _socket: &TcpStream) -> bool {
        true
    }

    fn create_session(&self, id: ConnectionId, peer: SocketAddr) -> LineEchoSession {
        info!("{} connected from {}", id, peer);
        LineEchoSession {
            pending: BytesMut::new(),
        }
    }

    fn on_done(&self, id: ConnectionId, accepted: bool) {
        info!("{} done, accepted: {}", id, accepted);
    }
}

struct LineEchoSession {
    pending: BytesMut,
}

impl Session for LineEchoSession {
    async fn on_start(&mut self) -> Action {
        Action::Reply(Bytes::from_static(b"netserve echo ready\r\n"))
    }

    async fn on_read(&mut self, data: &[u8]) -> Action {
        self.pending.extend_from_slice(data);
        let mut reply = BytesMut::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(pos + 1);
            if line.trim_ascii() == b"quit" {
                reply.extend_from_slice(b"bye\r\n");
                return Action::ReplyAndClose(reply.freeze());
            }
            reply.extend_from_slice(&line);
        }
        if reply.is_empty() {
            Action::Continue
        } else {
            Action::Reply(reply.freeze())
        }
    }
}

fn level_filter(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let settings = ServerSettings::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", settings);
        return Ok(());
    }

    if let Some(filter) = level_filter(commandline.verbose) {
        std::env::set_var("RUST_LOG", filter);
    }
    let _worker_guard = setup_tracing(&settings.log)?;

    let protocol = Arc::new(LineEcho {
        info: settings.server,
    });
    let server = Server::new(protocol);
    let local_addr = server.start()?;
    info!("netserve listening on {}, tls: {}", local_addr, server.is_tls());

    let signal_rt = runtime::Builder::new_current_thread().enable_all().build()?;
    signal_rt.block_on(tokio::signal::ctrl_c())?;
    info!("received ctrl-c, shutting down");

    server.stop();
    Ok(())
}
