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

use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::network::{ConnectionId, ConnectionInfo};

/// Diagnostic sink the server reports through.
///
/// Implementations are called concurrently from every worker thread. The
/// default methods emit `tracing` events carrying the reporting file and line.
pub trait LogSink: Send + Sync {
    fn log_debug(&self, file: &str, line: u32, message: &str) {
        debug!(source_file = file, source_line = line, "{}", message);
    }

    fn log_error(&self, file: &str, line: u32, message: &str) {
        error!(source_file = file, source_line = line, "{}", message);
    }
}

/// A [`LogSink`] that only forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {}

/// What a session wants done after handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// keep reading
    Continue,
    /// write the bytes, then keep reading
    Reply(Bytes),
    /// write the bytes, then close the connection
    ReplyAndClose(Bytes),
    Close,
}

/// Per-connection protocol handler, owned by exactly one connection.
///
/// The connection never calls into a session from two threads at once, so
/// implementations may keep plain mutable state.
pub trait Session: Send + 'static {
    /// Called once after the connection (and its TLS handshake) is up.
    fn on_start(&mut self) -> impl Future<Output = Action> + Send {
        async { Action::Continue }
    }

    /// Called with the bytes of each completed read.
    fn on_read(&mut self, data: &[u8]) -> impl Future<Output = Action> + Send;
}

/// The capability a protocol plugs into the server with.
///
/// The server holds the protocol in an `Arc` and only ever reads it, so the
/// protocol outlives the server and every connection it spawned.
pub trait Protocol: LogSink + 'static {
    type Session: Session;

    /// Listening parameters, read once when the server is constructed.
    fn get_info(&self) -> ConnectionInfo;

    /// Accept decision, called on the worker that completed the accept and
    /// before any I/O or TLS handshake happens on the socket.
    fn on_accept(&self, socket: &TcpStream) -> bool;

    fn create_session(&self, id: ConnectionId, peer: SocketAddr) -> Self::Session;

    /// Called exactly once per accepted socket. `accepted` is false when
    /// `on_accept` turned the connection down.
    fn on_done(&self, _id: ConnectionId, _accepted: bool) {}
}
