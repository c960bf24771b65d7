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

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use netserve::network::ConnectionId;
use netserve::{setup_local_tracing, Action, ConnectionInfo, LogSink, Protocol, Session};
use parking_lot::Mutex;
use rstest::fixture;
use tokio::sync::Notify;

pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

#[fixture]
#[once]
pub fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

/// Echo protocol recording every callback the server makes.
pub struct TestProtocol {
    info: ConnectionInfo,
    accept: AtomicBool,
    hold_next: Mutex<Option<Arc<Notify>>>,
    pub accepts: AtomicUsize,
    pub sessions: AtomicUsize,
    pub accept_threads: Mutex<Vec<String>>,
    pub done: Mutex<Vec<(ConnectionId, bool)>>,
    pub logs: Mutex<Vec<String>>,
}

impl TestProtocol {
    pub fn new(info: ConnectionInfo) -> Self {
        TestProtocol {
            info,
            accept: AtomicBool::new(true),
            hold_next: Mutex::new(None),
            accepts: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            accept_threads: Mutex::new(Vec::new()),
            done: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(self) -> Self {
        self.accept.store(false, Ordering::SeqCst);
        self
    }

    /// The next session created waits for `notify` before it starts.
    pub fn hold_next_session(&self, notify: Arc<Notify>) {
        *self.hold_next.lock() = Some(notify);
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.logs.lock().iter().any(|line| line.contains(needle))
    }

    pub fn done_count(&self) -> usize {
        self.done.lock().len()
    }
}

impl LogSink for TestProtocol {
    fn log_debug(&self, _file: &str, _line: u32, message: &str) {
        self.logs.lock().push(format!("DEBUG {}", message));
    }

    fn log_error(&self, _file: &str, _line: u32, message: &str) {
        self.logs.lock().push(format!("ERROR {}", message));
    }
}

impl Protocol for TestProtocol {
    type Session = EchoSession;

    fn get_info(&self) -> ConnectionInfo {
        self.info.clone()
    }

    fn on_accept(&self, _socket: &tokio::net::TcpStream) -> bool {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        if let Some(name) = thread::current().name() {
            self.accept_threads.lock().push(name.to_string());
        }
        self.accept.load(Ordering::SeqCst)
    }

    fn create_session(&self, _id: ConnectionId, _peer: SocketAddr) -> EchoSession {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        EchoSession {
            hold: self.hold_next.lock().take(),
        }
    }

    fn on_done(&self, id: ConnectionId, accepted: bool) {
        self.done.lock().push((id, accepted));
    }
}

/// Echoes every read back, `close` ends the connection.
pub struct EchoSession {
    hold: Option<Arc<Notify>>,
}

impl Session for EchoSession {
    async fn on_start(&mut self) -> Action {
        if let Some(hold) = self.hold.take() {
            hold.notified().await;
        }
        Action::Continue
    }

    async fn on_read(&mut self, data: &[u8]) -> Action {
        if data == b"close" {
            Action::ReplyAndClose(Bytes::from_static(b"bye"))
        } else {
            Action::Reply(Bytes::copy_from_slice(data))
        }
    }
}

pub fn local_info() -> ConnectionInfo {
    ConnectionInfo {
        address: "127.0.0.1".to_string(),
        port: 0,
        thread_pool_size: 2,
        ..Default::default()
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(WAIT_LIMIT)).unwrap();
    stream
}

/// Writes `message` and reads back exactly as many bytes.
pub fn round_trip<S: Read + Write>(stream: &mut S, message: &[u8]) -> Vec<u8> {
    stream.write_all(message).unwrap();
    stream.flush().unwrap();
    let mut reply = vec![0u8; message.len()];
    stream.read_exact(&mut reply).unwrap();
    reply
}

/// Reads until the server closes the connection.
pub fn read_to_close<S: Read>(stream: &mut S) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return received,
            Err(err) => panic!("read failed after {:?}: {}", received, err),
        }
    }
}

/// True once the peer has closed the connection.
pub fn closed_by_server(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(stream.read(&mut buf), Ok(0) | Err(_))
}
