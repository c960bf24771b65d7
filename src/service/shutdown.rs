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

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Listens for the server-wide shutdown broadcast.
///
/// Once the signal has been seen, `recv` returns immediately on every later
/// call, so it can sit in a `select!` loop.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    pub fn subscribe(notify_shutdown: &broadcast::Sender<()>) -> Shutdown {
        Shutdown::new(notify_shutdown.subscribe())
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Non-blocking `recv`: latches and returns true if the signal has
    /// already been sent.
    pub fn check(&mut self) -> bool {
        if !self.is_shutdown {
            self.is_shutdown = !matches!(self.notify.try_recv(), Err(TryRecvError::Empty));
        }
        self.is_shutdown
    }

    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // a closed or lagged channel means the sender is gone, which is a shutdown too
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
