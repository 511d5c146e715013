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

//! The worker side of a parallel run: one process per framework.
//!
//! The parent writes a JSON [`WorkerTask`] to the worker's stdin and relays
//! the worker's stderr into its own log. The exit status is the result.

use crate::adapter::AdapterContext;
use crate::adapter::AdapterRegistry;
use crate::engine::run_framework;
use crate::engine::shutdown_signal;
use anyhow::Context;
use anyhow::Result;
use nix::sys::signal::Signal;
use nix::sys::signal::kill;
use nix::sys::signal::killpg;
use nix::unistd::Pid;
use nix::unistd::getpgrp;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncReadExt;

/// Everything a worker process needs, passed by value from the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerTask {
  /// PID of the orchestrating process.
  pub parent_pid: u32,
  pub context: AdapterContext,
}

/// Called once the framework run has been dropped, which kills the commands
/// it started. On SIGINT the parent is told to tear down every sibling
/// worker; then this worker's own process group is killed.
fn exit_all(parent_pid: u32, signal: i32) -> ! {
  tracing::error!("signal: {} received by worker {}", signal, std::process::id());

  if signal == Signal::SIGINT as i32 {
    match i32::try_from(parent_pid) {
      Ok(parent) => {
        tracing::error!("exiting parent: {}", parent_pid);
        if let Err(e) = kill(Pid::from_raw(parent), Signal::SIGTERM) {
          tracing::warn!(error = %e, "Failed to signal parent {}", parent_pid);
        }
      }
      Err(_) => tracing::warn!("Invalid parent pid {}", parent_pid),
    }
  }

  tracing::error!("exiting all: {}", std::process::id());
  if let Err(e) = killpg(getpgrp(), Signal::SIGKILL) {
    tracing::warn!(error = %e, "Failed to kill own process group");
  }
  std::process::exit(128 + signal);
}

/// Entry point of the hidden `worker` subcommand.
pub async fn run_worker(registry: &AdapterRegistry) -> Result<()> {
  let mut input = String::new();
  tokio::io::stdin()
    .read_to_string(&mut input)
    .await
    .context("Failed to read worker task from stdin")?;
  let task: WorkerTask = serde_json::from_str(&input).context("Failed to decode worker task")?;

  let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
  let framework = task.context.framework.name().to_string();

  let outcome = tokio::select! {
    result = run_framework(registry, task.context) => Ok(result),
    signal = shutdown => Err(signal),
  };

  match outcome {
    Ok(Ok(())) => Ok(()),
    Ok(Err(e)) => {
      let error = anyhow::Error::new(e).context(format!("Framework '{framework}' failed"));
      // The parent only sees what reaches stderr, so log the full chain here.
      tracing::error!("{:?}", error);
      Err(error)
    }
    Err(signal) => exit_all(task.parent_pid, signal),
  }
}
