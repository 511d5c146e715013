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
use crate::error::CommandError;
use crate::process_group::signal_group;
use nix::sys::signal::Signal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::Instrument;

/// Kills the process group of a command that is abandoned while running,
/// which happens when the run it belongs to is interrupted.
struct GroupGuard {
  pgid: Option<u32>,
}

impl GroupGuard {
  fn disarm(&mut self) {
    self.pgid = None;
  }
}

impl Drop for GroupGuard {
  fn drop(&mut self) {
    if let Some(pgid) = self.pgid.take() {
      tracing::warn!(pgid, "Killing abandoned command");
      if let Err(e) = signal_group(pgid, Signal::SIGKILL) {
        tracing::debug!(pgid, error = %e, "Command group already gone");
      }
    }
  }
}

/// Runs shell commands on behalf of one framework.
///
/// Every command runs under `/bin/bash -c`, inside the framework's
/// virtualenv when one is installed, with the variables exported through
/// [`Shell::export`] added to its environment. Each command leads its own
/// process group, so dropping a running command kills everything it started.
#[derive(Debug, Clone)]
pub struct Shell {
  venv: PathBuf,
  env: BTreeMap<String, String>,
}

impl Shell {
  pub fn new(venv: PathBuf) -> Self {
    Shell {
      venv,
      env: BTreeMap::new(),
    }
  }

  /// Adds variables to the environment of every later command.
  pub fn export<I, K, V>(&mut self, vars: I)
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    for (key, value) in vars {
      self.env.insert(key.into(), value.into());
    }
  }

  pub fn env(&self) -> &BTreeMap<String, String> {
    &self.env
  }

  fn script(&self, command: &str) -> String {
    let activate = self.venv.join("bin").join("activate");
    if activate.is_file() {
      format!("source {} && {}", activate.display(), command)
    } else {
      tracing::debug!(venv = %self.venv.display(), "No virtualenv found, running without it");
      command.to_string()
    }
  }

  fn command(&self, command: &str) -> Command {
    let mut cmd = Command::new("/bin/bash");
    cmd
      .arg("-c")
      .arg(self.script(command))
      .envs(&self.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .process_group(0)
      .kill_on_drop(true);
    cmd
  }

  /// Runs `command`, streaming its stdout and stderr into the log line by
  /// line. A non-zero exit status is an error.
  pub async fn exec(&self, command: &str) -> Result<(), CommandError> {
    tracing::info!("Executing {{{}}}", command);
    self.run(command, false).await.map(|_| ())
  }

  /// Runs `command` and returns its stdout. Stderr is logged.
  pub async fn capture(&self, command: &str) -> Result<String, CommandError> {
    tracing::debug!("Capturing {{{}}}", command);
    self.run(command, true).await
  }

  async fn run(&self, command: &str, capture: bool) -> Result<String, CommandError> {
    let mut child = self
      .command(command)
      .spawn()
      .map_err(|source| CommandError::Spawn {
        command: command.to_string(),
        source,
      })?;
    let mut guard = GroupGuard { pgid: child.id() };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
      return Err(CommandError::Spawn {
        command: command.to_string(),
        source: std::io::Error::other("output pipes unavailable"),
      });
    };

    let stderr_task = tokio::spawn(
      log_lines(stderr).instrument(tracing::info_span!("stderr")),
    );

    let read = if capture {
      collect_lines(stdout).await
    } else {
      log_lines(stdout).await.map(|_| String::new())
    };
    let captured = read.map_err(|source| CommandError::ReadOutput {
      command: command.to_string(),
      source,
    })?;

    stderr_task
      .await
      .map_err(|source| CommandError::OutputTask {
        command: command.to_string(),
        source,
      })?
      .map_err(|source| CommandError::ReadOutput {
        command: command.to_string(),
        source,
      })?;

    let status = child.wait().await.map_err(|source| CommandError::Wait {
      command: command.to_string(),
      source,
    })?;
    guard.disarm();

    if status.success() {
      Ok(captured)
    } else {
      Err(CommandError::Failed {
        command: command.to_string(),
        code: status.code(),
      })
    }
  }
}

/// Logs each line of a process stream as it arrives.
async fn log_lines<R: AsyncRead + Unpin>(stream: R) -> std::io::Result<()> {
  let mut reader = BufReader::new(stream).lines();
  while let Some(line) = reader.next_line().await? {
    tracing::info!("{}", line.trim_end());
  }
  Ok(())
}

async fn collect_lines<R: AsyncRead + Unpin>(stream: R) -> std::io::Result<String> {
  let mut reader = BufReader::new(stream).lines();
  let mut out = String::new();
  while let Some(line) = reader.next_line().await? {
    out.push_str(&line);
    out.push('\n');
  }
  Ok(out)
}

/// Polls until `pid` is gone or a zombie.
#[cfg(test)]
pub(crate) async fn exited_within(pid: i32, limit: std::time::Duration) -> bool {
  let deadline = tokio::time::Instant::now() + limit;
  loop {
    let state = std::fs::read_to_string(format!("/proc/{pid}/stat"))
      .ok()
      .and_then(|stat| stat.rsplit(')').next().map(|rest| rest.trim_start().starts_with('Z')));
    if state.unwrap_or(true) {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::time::Duration;
  use tempfile::tempdir;

  #[tokio::test]
  async fn exec_succeeds_on_zero_exit() {
    let shell = Shell::new(PathBuf::from("/nonexistent/venv"));

    shell.exec("echo hello && echo oops >&2").await.unwrap();
  }

  #[tokio::test]
  async fn exec_fails_with_exit_code() {
    let shell = Shell::new(PathBuf::from("/nonexistent/venv"));

    let err = shell.exec("exit 7").await.unwrap_err();

    assert!(matches!(err, CommandError::Failed { code: Some(7), .. }));
    assert_eq!(err.to_string(), "command <exit 7> failed with return code Some(7)");
  }

  #[tokio::test]
  async fn exported_variables_reach_the_command() {
    let mut shell = Shell::new(PathBuf::from("/nonexistent/venv"));
    shell.export([("OS_USERNAME", "admin")]);

    let out = shell.capture("echo $OS_USERNAME").await.unwrap();

    assert_eq!(out, "admin\n");
  }

  #[tokio::test]
  async fn virtualenv_is_activated_when_present() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    fs::write(bin.join("activate"), "export IN_VENV=yes\n").unwrap();
    let shell = Shell::new(temp.path().to_path_buf());

    let out = shell.capture("echo $IN_VENV").await.unwrap();

    assert_eq!(out, "yes\n");
  }

  #[tokio::test]
  async fn dropping_a_running_command_kills_its_children() {
    let temp = tempdir().unwrap();
    let pid_file = temp.path().join("sleep.pid");
    let shell = Shell::new(PathBuf::from("/nonexistent/venv"));
    let command = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

    let timed_out = tokio::time::timeout(Duration::from_secs(1), shell.exec(&command)).await;
    assert!(timed_out.is_err());

    let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(exited_within(pid, Duration::from_secs(5)).await);
  }
}
