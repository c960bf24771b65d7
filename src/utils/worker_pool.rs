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
use std::time::Duration;

use tokio::runtime::{self, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{AppError, AppResult};

/// A fixed set of worker threads all driving the same tokio event loop.
///
/// Every task spawned on the pool may run on any worker; there is no
/// affinity between a connection and a thread.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    runtime: Option<Runtime>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> AppResult<Self> {
        if size == 0 {
            return Err(AppError::InvalidConfig(
                "worker pool needs at least one thread".into(),
            ));
        }
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name(format!("{}-worker", name))
            .enable_all()
            .build()?;
        debug!("worker pool {} started with {} threads", name, size);
        Ok(WorkerPool {
            name: name.to_string(),
            size,
            runtime: Some(runtime),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn handle(&self) -> AppResult<&Handle> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(|| self.stopped())
    }

    pub fn spawn<F>(&self, future: F) -> AppResult<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        Ok(self.handle()?.spawn(future))
    }

    /// Runs `future` on the calling thread while the workers keep serving
    /// spawned tasks. Must not be called from inside an async context.
    pub fn block_on<F: Future>(&self, future: F) -> AppResult<F::Output> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(self.stopped()),
        }
    }

    /// Stops the event loop and joins the worker threads, waiting at most
    /// `timeout` for tasks that are still running. Calling it again is a no-op.
    pub fn shutdown(&mut self, timeout: Duration) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(timeout);
            debug!("worker pool {} stopped", self.name);
        }
    }

    /// Stops the event loop without waiting for the workers, usable from
    /// inside an async context.
    pub fn shutdown_background(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!("worker pool {} stopping in background", self.name);
        }
    }

    fn stopped(&self) -> AppError {
        AppError::IllegalState(format!("worker pool {} is stopped", self.name))
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if Handle::try_current().is_ok() {
            self.shutdown_background();
        } else {
            self.shutdown(Duration::from_secs(1));
        }
    }
}
