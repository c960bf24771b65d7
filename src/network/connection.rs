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
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, trace};

use super::{ConnectionId, ConnectionRegistry, ConnectionState, ServerStream, Transport};
use crate::service::{Action, Protocol, Session, Shutdown};
use crate::{AppError, AppResult};

/// Upper bound for flushing and closing the write side once a session ends.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings every connection of a server shares.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub buffer_size: usize,
    pub read_timeout: Option<Duration>,
}

/// One accepted socket and the protocol session running on it.
///
/// The connection is moved into its own task when it starts, so exactly one
/// worker touches its socket and buffer at any time. Dropping a connection
/// finalizes it, which guarantees [`Protocol::on_done`] runs exactly once
/// even when the runtime cancels the task during shutdown.
pub struct Connection<P: Protocol> {
    id: ConnectionId,
    peer: SocketAddr,
    socket: Option<TcpStream>,
    state: ConnectionState,
    buffer: BytesMut,
    read_timeout: Option<Duration>,
    transport: Transport,
    protocol: Arc<P>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Shutdown,
    _shutdown_complete_tx: mpsc::Sender<()>,
}

impl<P: Protocol> Connection<P> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ConnectionId,
        socket: TcpStream,
        peer: SocketAddr,
        settings: &ConnectionSettings,
        transport: Transport,
        protocol: Arc<P>,
        registry: Arc<ConnectionRegistry>,
        shutdown: Shutdown,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        registry.attach(id, peer);
        Connection {
            id,
            peer,
            socket: Some(socket),
            state: ConnectionState::Created,
            buffer: BytesMut::with_capacity(settings.buffer_size),
            read_timeout: settings.read_timeout,
            transport,
            protocol,
            registry,
            shutdown,
            _shutdown_complete_tx: shutdown_complete_tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The raw accepted socket, before any TLS handshake.
    pub fn socket(&self) -> Option<&TcpStream> {
        self.socket.as_ref()
    }

    pub(crate) fn activate(&mut self) {
        if self.state == ConnectionState::Created {
            self.state = ConnectionState::Active;
            self.registry.activate(self.id);
        }
    }

    /// Finalizes a connection the protocol turned down. No I/O happens and
    /// the socket is closed when the connection is dropped here.
    pub(crate) fn reject(mut self) {
        trace!("{} from {} rejected", self.id, self.peer);
        self.finish();
    }

    /// Runs the session to completion. Only an `Active` connection does any
    /// I/O; anything else is finalized right away.
    pub async fn start(mut self) {
        if self.state != ConnectionState::Active {
            self.finish();
            return;
        }
        let Some(socket) = self.socket.take() else {
            self.finish();
            return;
        };

        let handshake = tokio::select! {
            res = self.transport.wrap(socket) => res,
            _ = self.shutdown.recv() => {
                debug!("{} closed during handshake by shutdown", self.id);
                self.finish();
                return;
            }
        };
        let mut stream = match handshake {
            Ok(stream) => stream,
            Err(err) => {
                self.registry.record_handshake_failure();
                sink_error!(
                    self.protocol,
                    "TLS handshake with {} failed: {}",
                    self.peer,
                    AppError::Handshake(err.to_string())
                );
                self.finish();
                return;
            }
        };

        let mut session = self.protocol.create_session(self.id, self.peer);
        if let Err(err) = self.drive(&mut stream, &mut session).await {
            sink_error!(self.protocol, "{} from {}: {}", self.id, self.peer, err);
        }
        match time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
            Ok(Err(err)) => trace!("{} shutdown: {}", self.id, err),
            Err(_) => trace!("{} shutdown timed out", self.id),
            Ok(Ok(())) => {}
        }
        drop(stream);
        self.finish();
    }

    /// The read/process/write cycle. Returns when the peer closes, the
    /// session asks to close, or the server shuts down.
    async fn drive(&mut self, stream: &mut ServerStream, session: &mut P::Session) -> AppResult<()> {
        let action = tokio::select! {
            action = session.on_start() => action,
            _ = self.shutdown.recv() => return Ok(()),
        };
        if !Self::apply(stream, action).await? {
            return Ok(());
        }

        loop {
            let read = tokio::select! {
                res = Self::read_chunk(stream, &mut self.buffer, self.read_timeout) => res?,
                _ = self.shutdown.recv() => {
                    debug!("{} exit read loop after recv shutdown signal", self.id);
                    return Ok(());
                }
            };
            if read == 0 {
                trace!("{} closed by peer", self.id);
                return Ok(());
            }

            let action = tokio::select! {
                action = session.on_read(&self.buffer[..]) => action,
                _ = self.shutdown.recv() => return Ok(()),
            };
            self.buffer.clear();
            if !Self::apply(stream, action).await? {
                return Ok(());
            }
        }
    }

    async fn read_chunk(
        stream: &mut ServerStream,
        buffer: &mut BytesMut,
        read_timeout: Option<Duration>,
    ) -> AppResult<usize> {
        match read_timeout {
            Some(limit) => match time::timeout(limit, stream.read_buf(buffer)).await {
                Ok(res) => Ok(res?),
                Err(_) => Err(AppError::ReadTimeout(limit)),
            },
            None => Ok(stream.read_buf(buffer).await?),
        }
    }

    /// Carries out an action, returning whether the cycle goes on.
    async fn apply(stream: &mut ServerStream, action: Action) -> AppResult<bool> {
        match action {
            Action::Continue => Ok(true),
            Action::Reply(data) => {
                stream.write_all(&data).await?;
                stream.flush().await?;
                Ok(true)
            }
            Action::ReplyAndClose(data) => {
                stream.write_all(&data).await?;
                stream.flush().await?;
                Ok(false)
            }
            Action::Close => Ok(false),
        }
    }

    /// Moves to `Done`: releases the socket and buffer, drops the registry
    /// entry and notifies the protocol. Later calls do nothing.
    fn finish(&mut self) {
        if self.state == ConnectionState::Done {
            return;
        }
        let accepted = self.state == ConnectionState::Active;
        self.state = ConnectionState::Done;
        self.socket = None;
        self.buffer = BytesMut::new();
        self.registry.finish(self.id);
        self.protocol.on_done(self.id, accepted);
        trace!("{} done, accepted: {}", self.id, accepted);
    }
}

impl<P: Protocol> Drop for Connection<P> {
    fn drop(&mut self) {
        self.finish();
    }
}
