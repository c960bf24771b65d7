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

#[macro_use]
mod macros;

pub mod network;
pub mod service;
pub mod utils;

pub use network::{
    CertificateFormat, Connection, ConnectionId, ConnectionInfo, ConnectionRegistry,
    ConnectionState, ConnectionStats, ServerStream, TlsConfig, Transport, VerifyMode,
};
#[cfg(feature = "tls")]
pub use network::{TlsContext, TlsContextBuilder, TlsError, TlsReport};
pub use service::{
    setup_local_tracing, setup_tracing, Action, AppError, AppResult, LogConfig, LogSink,
    Protocol, Server, ServerSettings, Session, Shutdown, TracingSink,
};
pub use utils::WorkerPool;
