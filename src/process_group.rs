// Copyright 2025 Chisomo Makombo Sakala
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

//! Tracking and teardown of worker processes.
//!
//! Each worker is spawned as the leader of its own process group, so
//! signalling the group also reaches every external process the worker's
//! adapter started.

use nix::sys::signal::Signal;
use nix::sys::signal::killpg;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::time::Instant;

/// Sends `signal` to every process in the group led by `pgid`.
pub fn signal_group(pgid: u32, signal: Signal) -> nix::Result<()> {
  let pgid = i32::try_from(pgid).map_err(|_| nix::Error::EINVAL)?;
  killpg(Pid::from_raw(pgid), signal)
}

#[derive(Debug, Default)]
struct Members {
  /// Live worker process groups, keyed by leader PID.
  groups: BTreeMap<u32, String>,
  /// Set once teardown starts; no worker may join afterwards.
  closed: bool,
}

/// The live worker processes of one parallel run.
#[derive(Debug, Clone, Default)]
pub struct WorkerGroup {
  members: Arc<Mutex<Members>>,
}

impl WorkerGroup {
  fn lock(&self) -> MutexGuard<'_, Members> {
    self.members.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Tracks a freshly spawned worker. Returns `false` once teardown has
  /// started, in which case the caller must kill the worker itself.
  pub fn register(&self, pid: u32, framework: &str) -> bool {
    let mut members = self.lock();
    if members.closed {
      return false;
    }
    members.groups.insert(pid, framework.to_string());
    tracing::debug!(pid, framework, "Registered worker");
    true
  }

  /// Forgets a worker once it has been reaped.
  pub fn unregister(&self, pid: u32) {
    if self.lock().groups.remove(&pid).is_some() {
      tracing::debug!(pid, "Unregistered worker");
    }
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  /// Live workers as (pid, framework) pairs.
  pub fn live(&self) -> Vec<(u32, String)> {
    self
      .lock()
      .groups
      .iter()
      .map(|(pid, name)| (*pid, name.clone()))
      .collect()
  }

  fn signal_all(&self, signal: Signal) {
    for (pid, framework) in self.live() {
      tracing::error!(pid, framework = %framework, "exiting worker: {} ({:?})", pid, signal);
      if let Err(e) = signal_group(pid, signal) {
        tracing::warn!(pid, error = %e, "Failed to signal worker group");
      }
    }
  }

  /// Closes the group, sends SIGTERM to every live worker group, waits up to
  /// `grace` for them to be reaped, then sends SIGKILL to whatever remains.
  pub async fn terminate(&self, grace: Duration) {
    self.lock().closed = true;
    self.signal_all(Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
      if self.lock().groups.is_empty() {
        tracing::info!("All workers terminated");
        return;
      }
      tokio::time::sleep(Duration::from_millis(50)).await;
    }

    self.signal_all(Signal::SIGKILL);
  }
}
