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

use parking_lot::Mutex;
use tokio::net::{lookup_host, TcpListener, TcpSocket};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::debug;

#[cfg(feature = "tls")]
use crate::network::TlsReport;
use crate::network::{
    Connection, ConnectionInfo, ConnectionRegistry, ConnectionSettings, ConnectionStats, Transport,
};
use crate::utils::WorkerPool;
use crate::{AppError, AppResult};

use super::{Protocol, Shutdown};

const DEFAULT_NAME: &str = "netserve";
const WILDCARD_ADDRESS: &str = "0.0.0.0";
/// How long `stop` waits for connections to finish on their own.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const POOL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Delay between retries after failed accepts, doubling up to a cap and
/// reset by the next successful accept.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        AcceptBackoff {
            next: MIN_ACCEPT_BACKOFF,
        }
    }
}

impl AcceptBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_ACCEPT_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.next = MIN_ACCEPT_BACKOFF;
    }
}

/// Owns the listening socket and hands every accepted socket to the
/// protocol.
struct Acceptor<P: Protocol> {
    listener: TcpListener,
    protocol: Arc<P>,
    transport: Transport,
    registry: Arc<ConnectionRegistry>,
    settings: ConnectionSettings,
    notify_shutdown: broadcast::Sender<()>,
    shutdown: Shutdown,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl<P: Protocol> Acceptor<P> {
    /// Accept loop. A slot is reserved in the registry before each accept;
    /// after a successful accept the connection is either spawned or
    /// rejected, and the loop goes straight back to accepting, so a slow
    /// connection never holds up the next one.
    ///
    /// A failed accept is logged and retried after a short backoff, the
    /// listener stays bound. The loop only ends on the shutdown signal.
    async fn run(mut self) {
        let mut backoff = AcceptBackoff::default();
        let mut slot = self.registry.allocate();

        loop {
            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                _ = self.shutdown.recv() => {
                    debug!("acceptor received shutdown signal");
                    break;
                }
            };

            match accepted {
                Ok((socket, peer)) => {
                    backoff.reset();
                    let connection = Connection::new(
                        slot,
                        socket,
                        peer,
                        &self.settings,
                        self.transport.clone(),
                        self.protocol.clone(),
                        self.registry.clone(),
                        Shutdown::subscribe(&self.notify_shutdown),
                        self.shutdown_complete_tx.clone(),
                    );
                    // a signal sent before the connection subscribed is only
                    // visible to the acceptor
                    if self.shutdown.check() {
                        debug!("{} accepted during shutdown, closing it", slot);
                        drop(connection);
                        break;
                    }
                    self.dispatch(connection);
                    slot = self.registry.allocate();
                }
                Err(err) => {
                    self.registry.record_accept_error();
                    sink_error!(self.protocol, "Socket ERROR: {}", err);
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = time::sleep(delay) => {}
                        _ = self.shutdown.recv() => break,
                    }
                }
            }
        }

        // the pending slot never got a socket
        self.registry.finish(slot);
        debug!("acceptor exit accept loop");
    }

    fn dispatch(&self, mut connection: Connection<P>) {
        let accepted = connection
            .socket()
            .map(|socket| self.protocol.on_accept(socket))
            .unwrap_or(false);
        if accepted {
            connection.activate();
            tokio::spawn(connection.start());
        } else {
            connection.reject();
        }
    }
}

struct Running {
    pool: WorkerPool,
    transport: Transport,
    local_addr: SocketAddr,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
}

/// A listening endpoint serving one protocol on a fixed worker pool.
///
/// `start` and `stop` block the calling thread; `start` must not be called
/// from inside an async context. Dropping the server stops it.
pub struct Server<P: Protocol> {
    name: String,
    protocol: Arc<P>,
    info: ConnectionInfo,
    registry: Arc<ConnectionRegistry>,
    shutdown_grace: Duration,
    running: Mutex<Option<Running>>,
}

impl<P: Protocol> Server<P> {
    /// Reads the protocol's [`ConnectionInfo`] once; later changes on the
    /// protocol side are not picked up.
    pub fn new(protocol: Arc<P>) -> Self {
        let info = protocol.get_info();
        Server {
            name: DEFAULT_NAME.to_string(),
            protocol,
            info,
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            running: Mutex::new(None),
        }
    }

    /// Prefix of the worker thread names.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    /// Configures TLS, binds, starts the workers and begins accepting.
    ///
    /// Fails without listening when the address cannot be resolved or bound
    /// or the configuration is invalid. TLS problems are only logged.
    pub fn start(&self) -> AppResult<SocketAddr> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(AppError::IllegalState(format!(
                "server already listening on {}",
                self.info.endpoint_string()
            )));
        }
        if let Err(err) = self.info.validate() {
            sink_error!(self.protocol, "Invalid connection info: {}", err);
            return Err(err);
        }

        let pool = WorkerPool::new(&self.name, self.info.thread_pool_size)?;
        let addr = pool.block_on(self.resolve())??;
        // TLS is fully set up before the first accept can happen
        let transport = Transport::configure(&self.info.tls, &*self.protocol);
        let listener = pool.block_on(async { self.bind(addr) })??;
        let local_addr = listener.local_addr()?;

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        let acceptor = Acceptor {
            listener,
            protocol: self.protocol.clone(),
            transport: transport.clone(),
            registry: self.registry.clone(),
            settings: ConnectionSettings {
                buffer_size: self.info.buffer_size,
                read_timeout: self.info.read_timeout(),
            },
            shutdown: Shutdown::subscribe(&notify_shutdown),
            notify_shutdown: notify_shutdown.clone(),
            shutdown_complete_tx,
        };
        pool.spawn(acceptor.run())?;
        sink_debug!(
            self.protocol,
            "Bound to: {} ({}), {} worker thread(s)",
            self.info.endpoint_string(),
            local_addr,
            pool.size()
        );

        *running = Some(Running {
            pool,
            transport,
            local_addr,
            notify_shutdown,
            shutdown_complete_rx,
        });
        Ok(local_addr)
    }

    /// Resolves the bind address, the wildcard interface when no address is
    /// configured.
    async fn resolve(&self) -> AppResult<SocketAddr> {
        let endpoint = self.info.endpoint_string();
        let host = if self.info.address.is_empty() {
            WILDCARD_ADDRESS
        } else {
            self.info.address.as_str()
        };

        let resolved = match lookup_host((host, self.info.port)).await {
            Ok(addrs) => addrs.collect::<Vec<_>>(),
            Err(err) => {
                sink_error!(self.protocol, "Failed to lookup: {}: {}", endpoint, err);
                return Err(AppError::Resolve(endpoint));
            }
        };
        match resolved.first() {
            Some(addr) => Ok(*addr),
            None => {
                sink_error!(self.protocol, "Failed to lookup: {}", endpoint);
                Err(AppError::Resolve(endpoint))
            }
        }
    }

    /// Opens the listening socket. Has to run inside the pool's runtime.
    fn bind(&self, addr: SocketAddr) -> AppResult<TcpListener> {
        let endpoint = self.info.endpoint_string();
        sink_debug!(self.protocol, "Attempting to bind to: {}", endpoint);
        self.listen_on(addr).map_err(|source| {
            sink_error!(self.protocol, "Failed to bind: {}: {}", addr, source);
            AppError::Bind { endpoint, source }
        })
    }

    fn listen_on(&self, addr: SocketAddr) -> std::io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Err(err) = socket.set_reuseaddr(true) {
            sink_error!(self.protocol, "Failed to set reuse on socket: {}", err);
        }
        socket.bind(addr)?;
        socket.listen(self.info.backlog())
    }

    /// Stops accepting, lets open connections finish within the grace
    /// period, then joins every worker thread.
    ///
    /// Safe to call more than once and on a server that never started. From
    /// inside an async context (including dropping the server there) it
    /// only signals shutdown and lets the workers wind down in the
    /// background.
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let Running {
            mut pool,
            local_addr,
            notify_shutdown,
            mut shutdown_complete_rx,
            ..
        } = running;

        sink_debug!(self.protocol, "Stopping server on {}", local_addr);
        // receivers may already be gone
        let _ = notify_shutdown.send(());

        if Handle::try_current().is_ok() {
            sink_error!(
                self.protocol,
                "Server on {} stopped from inside an async context, not waiting for connections",
                local_addr
            );
            pool.shutdown_background();
            return;
        }

        let grace = self.shutdown_grace;
        let drained = pool
            .block_on(async move {
                time::timeout(grace, shutdown_complete_rx.recv())
                    .await
                    .is_ok()
            })
            .unwrap_or(false);
        if !drained {
            sink_error!(
                self.protocol,
                "Connections still open after {:?}, forcing shutdown",
                grace
            );
        }

        pool.shutdown(POOL_SHUTDOWN_TIMEOUT);
        sink_debug!(self.protocol, "Server on {} stopped", local_addr);
    }

    pub fn is_listening(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    pub fn is_tls(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.transport.is_tls())
            .unwrap_or(false)
    }

    #[cfg(feature = "tls")]
    pub fn tls_report(&self) -> Option<Arc<TlsReport>> {
        match &self.running.lock().as_ref()?.transport {
            Transport::Tls { report, .. } => Some(report.clone()),
            Transport::Plain => None,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ConnectionStats {
        self.registry.stats()
    }
}

impl<P: Protocol> Drop for Server<P> {
    fn drop(&mut self) {
        self.stop();
        debug!("server dropped");
    }
}
