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
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error enum for the harbinger library.
#[derive(Error, Debug)]
pub enum HarbingerError {
  #[error("Configuration error")]
  Config(#[from] ConfigError),

  #[error("Directory setup failed")]
  Directory(#[from] DirectoryError),

  #[error("Framework adapter failed")]
  Adapter(#[from] AdapterError),

  #[error("Run failed")]
  Engine(#[from] EngineError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors raised while loading settings or the run document (src/config.rs, src/schema.rs).
#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to load settings from {path}")]
  Settings {
    path: PathBuf,
    #[source]
    source: Box<figment::Error>,
  },

  #[error("Configuration file not found: {0}")]
  DocumentNotFound(PathBuf),

  #[error("Failed to read configuration file: {path}")]
  ReadDocument {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to parse YAML in {path}")]
  ParseDocument {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("Configuration does not match the input schema:\n{0}")]
  Schema(SchemaViolations),

  #[error("Bundled input schema is invalid: {0}")]
  InvalidSchema(String),
}

/// Every structural problem found in a run document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolations(pub Vec<String>);

impl fmt::Display for SchemaViolations {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for violation in &self.0 {
      writeln!(f, "  - {violation}")?;
    }
    Ok(())
  }
}

/// Errors related to the inputs/outputs directories (src/directory.rs).
#[derive(Error, Debug)]
pub enum DirectoryError {
  #[error("Failed to create directory {path}")]
  Create {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to read outputs directory {path}")]
  ReadOutputs {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to archive {from} as {to}")]
  Rename {
    from: PathBuf,
    to: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to append to archive log {path}")]
  ArchiveLog {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// A mandatory setting that no tier of the precedence chain supplied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Setting '{key}' is not set for framework '{framework}'")]
pub struct ResolveError {
  pub framework: String,
  pub key: String,
}

/// Errors from running an external command (src/command.rs).
#[derive(Error, Debug)]
pub enum CommandError {
  #[error("Failed to spawn command <{command}>")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to read output of command <{command}>")]
  ReadOutput {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("Output reader task failed for command <{command}>")]
  OutputTask {
    command: String,
    #[source]
    source: tokio::task::JoinError,
  },

  #[error("Failed to wait for command <{command}>")]
  Wait {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command <{command}> failed with return code {code:?}")]
  Failed { command: String, code: Option<i32> },
}

/// Errors raised by a framework adapter (src/adapter.rs and friends).
#[derive(Error, Debug)]
pub enum AdapterError {
  #[error("Unknown framework '{name}'. Registered frameworks: {available:?}")]
  UnknownFramework {
    name: String,
    available: Vec<String>,
  },

  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error(transparent)]
  Command(#[from] CommandError),

  #[error(
    "There are one or more tests, test paths, or directories that do not exist or have invalid extensions. {0:?}"
  )]
  InvalidTests(Vec<String>),

  #[error("Image upload error: {image} could not be found in {dir}")]
  ImageFileNotFound { image: String, dir: PathBuf },

  #[error("Failed to write {path}")]
  WriteFile {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to serialize test suite")]
  SerializeSuite(#[from] serde_yaml::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors related to driving a run (src/engine.rs).
#[derive(Error, Debug)]
pub enum EngineError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Directory(#[from] DirectoryError),

  #[error("Framework '{framework}' failed")]
  Framework {
    framework: String,
    #[source]
    source: AdapterError,
  },

  #[error("{} framework(s) failed: {}", .0.len(), WorkerFailure::summary(.0))]
  Workers(Vec<WorkerFailure>),

  #[error("Failed to locate the harbinger binary for workers")]
  WorkerBinary(#[source] std::io::Error),

  #[error("Failed to encode worker task")]
  EncodeTask(#[from] serde_json::Error),

  #[error("Failed to install signal handler")]
  Signal(#[source] std::io::Error),

  #[error("Interrupted by signal {0}")]
  Interrupted(i32),
}

/// Why a single parallel worker did not succeed.
#[derive(Error, Debug)]
pub enum WorkerFailure {
  #[error("{framework}: failed to spawn worker: {source}")]
  Spawn {
    framework: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{framework}: failed to wait for worker: {source}")]
  Wait {
    framework: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{framework}: worker exited with code {code}")]
  Exited { framework: String, code: i32 },

  #[error("{framework}: worker killed by signal {signal}")]
  Killed { framework: String, signal: i32 },

  #[error("{framework}: worker task panicked or was cancelled")]
  Join { framework: String },

  #[error("{framework}: run interrupted before worker started")]
  Cancelled { framework: String },
}

impl WorkerFailure {
  pub fn framework(&self) -> &str {
    match self {
      WorkerFailure::Spawn { framework, .. }
      | WorkerFailure::Wait { framework, .. }
      | WorkerFailure::Exited { framework, .. }
      | WorkerFailure::Killed { framework, .. }
      | WorkerFailure::Join { framework }
      | WorkerFailure::Cancelled { framework } => framework,
    }
  }

  fn summary(failures: &[WorkerFailure]) -> String {
    failures
      .iter()
      .map(ToString::to_string)
      .collect::<Vec<_>>()
      .join("; ")
  }
}
