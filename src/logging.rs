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
use anyhow::Result;
use std::env;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable naming a file to log to instead of stderr.
pub const LOG_FILE_ENV: &str = "HARBINGER_LOG_FILE";

fn default_level(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "info",
    1 => "debug",
    _ => "trace",
  }
}

/// Sets up the global tracing subscriber.
///
/// Log level is controlled by the `RUST_LOG` env var, falling back to a level
/// picked by `verbosity` (the number of `-v` flags).
///
/// - Worker processes always log plain lines to stderr, without timestamps,
///   so the parent can relay them.
/// - Otherwise, if `HARBINGER_LOG_FILE` is set, logs go to that file and the
///   returned guard must be held until exit.
/// - Otherwise, logs go to stderr.
pub fn setup_tracing(verbosity: u8, worker: bool) -> Result<Option<WorkerGuard>> {
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbosity)));

  if worker {
    tracing_subscriber::registry()
      .with(env_filter)
      .with(
        fmt::layer()
          .with_writer(std::io::stderr)
          .with_ansi(false)
          .with_target(false)
          .without_time(),
      )
      .try_init()?;
    return Ok(None);
  }

  match env::var(LOG_FILE_ENV) {
    Ok(log_file) if !log_file.is_empty() => {
      let path = Path::new(&log_file);
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
      let file_name = path.file_name().unwrap_or(path.as_os_str());
      let file_appender = tracing_appender::rolling::never(dir, file_name);
      let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

      tracing_subscriber::registry()
        .with(env_filter)
        .with(
          fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false), // No ANSI colors in files
        )
        .try_init()?;
      Ok(Some(guard))
    }
    _ => {
      tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()?;
      Ok(None)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verbosity_raises_default_level() {
    assert_eq!(default_level(0), "info");
    assert_eq!(default_level(1), "debug");
    assert_eq!(default_level(4), "trace");
  }
}
