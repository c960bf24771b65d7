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

//! Transport layer of the server.
//!
//! - `ConnectionInfo` / `TlsConfig`: what the protocol asks the server to listen on
//! - `Connection`: one accepted socket driving one protocol session
//! - `ConnectionRegistry`: arena of live connections and their counters
//! - `Transport` / `ServerStream`: plain or TLS sockets, picked once at start
//! - `TlsContextBuilder`: step-by-step TLS setup that degrades instead of failing

pub use connection::{Connection, ConnectionSettings};
pub use info::{
    CertificateFormat, ConnectionInfo, TlsConfig, VerifyMode, DEFAULT_BACKLOG,
    DEFAULT_BUFFER_SIZE, DEFAULT_PORT,
};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState, ConnectionStats};
pub use stream::{ServerStream, Transport};
#[cfg(feature = "tls")]
pub use tls::{
    read_certificates, read_dh_parameters, read_private_key, select_cipher_suites, TlsContext,
    TlsContextBuilder, TlsError, TlsReport,
};

mod connection;
mod info;
mod registry;
mod stream;
#[cfg(feature = "tls")]
mod tls;
