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

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

/// Stable identifier of a connection, unique for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// slot allocated, waiting for a socket to be accepted into it
    Created,
    /// accepted by the protocol, session running
    Active,
    /// finished or rejected, resources released
    Done,
}

#[derive(Debug, Clone)]
struct ConnectionEntry {
    state: ConnectionState,
    peer: Option<SocketAddr>,
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub accepted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub accept_errors: u64,
    pub handshake_failures: u64,
    /// connections currently tracked, including the pending accept slot
    pub open: usize,
}

/// Arena of live connections keyed by [`ConnectionId`].
///
/// An entry is inserted in `Created` state before each accept and removed
/// once the connection reaches `Done`, so the registry only ever holds the
/// pending accept slot plus the connections still doing I/O.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ConnectionId, ConnectionEntry>,
    next_id: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    accept_errors: AtomicU64,
    handshake_failures: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot for the next accept.
    pub fn allocate(&self) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Created,
                peer: None,
            },
        );
        trace!("allocated connection slot {}", id);
        id
    }

    pub(crate) fn attach(&self, id: ConnectionId, peer: SocketAddr) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.peer = Some(peer);
        }
    }

    pub(crate) fn activate(&self, id: ConnectionId) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.state = ConnectionState::Active;
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes the entry, returning whether it ever became active.
    pub(crate) fn finish(&self, id: ConnectionId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                let was_active = entry.state == ConnectionState::Active;
                if was_active {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                } else if entry.peer.is_some() {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                }
                was_active
            }
            None => false,
        }
    }

    pub(crate) fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// State of a tracked connection. Finished connections are no longer
    /// tracked and report `Done`.
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.entries
            .get(&id)
            .map(|entry| entry.state)
            .unwrap_or(ConnectionState::Done)
    }

    pub fn peer(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.entries.get(&id).and_then(|entry| entry.peer)
    }

    /// Connections currently in `Active` state.
    pub fn active(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == ConnectionState::Active)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            open: self.entries.len(),
        }
    }
}
