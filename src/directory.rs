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
use crate::config::Settings;
use crate::error::DirectoryError;
use crate::table;
use rand::Rng;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

/// Marks a file in the outputs directory as archived.
pub const ARCHIVE_MARKER: &str = "hrb";

/// Name of the append-only log of archived outputs.
pub const ARCHIVE_LOG: &str = "archive-hrb.log";

/// Generates a short random identifier shared by all files archived in one pass.
fn archive_id() -> String {
  let mut rng = rand::rng();
  format!("{:05x}", rng.random_range(0..0x10_0000u32))
}

fn is_archived(file_name: &str) -> bool {
  let stem = Path::new(file_name)
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or(file_name);
  stem.ends_with(&format!("-{ARCHIVE_MARKER}"))
}

/// `results.json` -> `results-<id>-hrb.json`; files without an extension
/// get the marker as their extension.
fn archived_name(file_name: &str, id: &str) -> String {
  let path = Path::new(file_name);
  let stem = path
    .file_stem()
    .and_then(|s| s.to_str())
    .unwrap_or(file_name);
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .unwrap_or(ARCHIVE_MARKER);
  format!("{stem}-{id}-{ARCHIVE_MARKER}.{ext}")
}

/// Owns the `inputs` and `outputs` directories of a run.
#[derive(Debug, Clone)]
pub struct DirectoryManager {
  inputs_dir: PathBuf,
  outputs_dir: PathBuf,
}

impl DirectoryManager {
  pub fn new(settings: &Settings) -> Self {
    DirectoryManager {
      inputs_dir: settings.inputs_dir(),
      outputs_dir: settings.outputs_dir(),
    }
  }

  pub fn inputs_dir(&self) -> &Path {
    &self.inputs_dir
  }

  pub fn outputs_dir(&self) -> &Path {
    &self.outputs_dir
  }

  /// Creates the inputs and outputs directories if they do not exist.
  pub fn setup(&self) -> Result<(), DirectoryError> {
    for dir in [&self.inputs_dir, &self.outputs_dir] {
      fs::create_dir_all(dir).map_err(|source| DirectoryError::Create {
        path: dir.clone(),
        source,
      })?;
    }
    Ok(())
  }

  /// Renames every unarchived file in the outputs directory and records the
  /// renames in the archive log. Does nothing when there is nothing to archive.
  ///
  /// Returns the new file names.
  pub fn archive_outputs(&self) -> Result<Vec<String>, DirectoryError> {
    let read_err = |source| DirectoryError::ReadOutputs {
      path: self.outputs_dir.clone(),
      source,
    };

    let mut pending = Vec::new();
    for entry in fs::read_dir(&self.outputs_dir).map_err(read_err)? {
      let entry = entry.map_err(read_err)?;
      if !entry.file_type().map_err(read_err)?.is_file() {
        continue;
      }
      let name = entry.file_name().to_string_lossy().into_owned();
      if !is_archived(&name) {
        pending.push(name);
      }
    }

    if pending.is_empty() {
      return Ok(pending);
    }
    pending.sort();

    let id = archive_id();
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let mut archived = Vec::with_capacity(pending.len());
    for name in pending {
      let from = self.outputs_dir.join(&name);
      let new_name = archived_name(&name, &id);
      let to = self.outputs_dir.join(&new_name);
      fs::rename(&from, &to).map_err(|source| DirectoryError::Rename { from, to, source })?;
      archived.push(new_name);
    }

    let log_path = self.outputs_dir.join(ARCHIVE_LOG);
    tracing::info!(
      "Archiving previous outputs, see {} for details",
      log_path.display()
    );

    let log_err = |source| DirectoryError::ArchiveLog {
      path: log_path.clone(),
      source,
    };
    let mut log = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&log_path)
      .map_err(log_err)?;
    write!(log, "{}\n\n", table::render(&timestamp, &archived)).map_err(log_err)?;

    Ok(archived)
  }
}
