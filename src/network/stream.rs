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

use std::io;
use std::pin::Pin;
#[cfg(feature = "tls")]
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(feature = "tls")]
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use super::TlsConfig;
use crate::service::LogSink;

/// An accepted socket, plain or TLS-wrapped.
///
/// The TLS variant is boxed, its session state is much larger than a
/// `TcpStream`.
pub enum ServerStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl ServerStream {
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, ServerStream::Plain(_))
    }

    pub fn get_ref(&self) -> &TcpStream {
        match self {
            ServerStream::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            ServerStream::Tls(stream) => stream.get_ref().0,
        }
    }
}

impl AsyncRead for ServerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            ServerStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ServerStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            ServerStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            ServerStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ServerStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            ServerStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// How accepted sockets are wrapped, chosen once when the server starts.
#[derive(Clone)]
pub enum Transport {
    Plain,
    #[cfg(feature = "tls")]
    Tls {
        acceptor: TlsAcceptor,
        report: Arc<super::TlsReport>,
    },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain => f.write_str("Plain"),
            #[cfg(feature = "tls")]
            Transport::Tls { report, .. } => f
                .debug_struct("Tls")
                .field("report", report)
                .finish_non_exhaustive(),
        }
    }
}

impl Transport {
    /// Picks the transport for `tls`. TLS problems are reported through
    /// `sink` and never stop the server from starting.
    #[cfg(feature = "tls")]
    pub fn configure(tls: &TlsConfig, sink: &dyn LogSink) -> Transport {
        if !tls.enabled {
            return Transport::Plain;
        }
        match super::TlsContextBuilder::new(tls, sink).build() {
            Ok(context) => Transport::Tls {
                acceptor: context.acceptor,
                report: Arc::new(context.report),
            },
            Err(err) => {
                sink_error!(sink, "Failed to create TLS context, serving plaintext: {}", err);
                Transport::Plain
            }
        }
    }

    #[cfg(not(feature = "tls"))]
    pub fn configure(tls: &TlsConfig, sink: &dyn LogSink) -> Transport {
        if tls.enabled {
            sink_error!(sink, "Not compiled with TLS support, serving plaintext");
        }
        Transport::Plain
    }

    #[cfg(feature = "tls")]
    pub fn tls_report(&self) -> Option<&super::TlsReport> {
        match self {
            Transport::Plain => None,
            Transport::Tls { report, .. } => Some(report),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain)
    }

    /// Wraps an accepted socket, running the TLS handshake if needed.
    pub async fn wrap(&self, socket: TcpStream) -> io::Result<ServerStream> {
        match self {
            Transport::Plain => Ok(ServerStream::Plain(socket)),
            #[cfg(feature = "tls")]
            Transport::Tls { acceptor, .. } => {
                let stream = acceptor.accept(socket).await?;
                Ok(ServerStream::Tls(Box::new(stream)))
            }
        }
    }
}
