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
use crate::error::ConfigError;
use figment::Figment;
use figment::providers::Env;
use figment::providers::Format;
use figment::providers::Json;
use figment::providers::Toml;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;

/// Open-ended mapping of setting names to values.
pub type Attributes = serde_json::Map<String, Value>;

/// Prefix for environment variables that override the settings file.
pub const ENV_PREFIX: &str = "HARBINGER_";

// --- Default Values ---
fn default_files_dir() -> PathBuf {
  PathBuf::from("/opt/harbinger")
}

/// Process-wide settings, loaded once at startup and passed explicitly
/// to every component that needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// Root of the `inputs`, `outputs`, `frameworks`, `venvs` and `images` directories.
  pub files_dir: PathBuf,

  /// Upper bound on concurrently running worker processes.
  pub max_workers: Option<usize>,

  /// Per-framework configuration groups, keyed by framework name.
  pub frameworks: BTreeMap<String, Attributes>,
}

impl Default for Settings {
  fn default() -> Self {
    Settings {
      files_dir: default_files_dir(),
      max_workers: None,
      frameworks: BTreeMap::new(),
    }
  }
}

impl Settings {
  /// Loads settings from `path` (TOML, or JSON for `.json` files), then
  /// applies `HARBINGER_*` environment overrides. A missing file yields defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let figment = match path.extension().and_then(|ext| ext.to_str()) {
      Some("json") => Figment::new().merge(Json::file(path)),
      _ => Figment::new().merge(Toml::file(path)),
    };

    if !path.exists() {
      tracing::debug!(path = %path.display(), "Settings file not found, using defaults");
    }

    figment
      .merge(Env::prefixed(ENV_PREFIX).split("__"))
      .extract()
      .map_err(|source| ConfigError::Settings {
        path: path.to_path_buf(),
        source: Box::new(source),
      })
  }

  /// The configuration group for one framework, if the settings define one.
  pub fn framework_group(&self, name: &str) -> Option<&Attributes> {
    self.frameworks.get(name)
  }

  pub fn inputs_dir(&self) -> PathBuf {
    self.files_dir.join("inputs")
  }

  pub fn outputs_dir(&self) -> PathBuf {
    self.files_dir.join("outputs")
  }

  pub fn images_dir(&self) -> PathBuf {
    self.files_dir.join("images")
  }

  /// Installation directory of a framework's sources and tests.
  pub fn framework_dir(&self, name: &str) -> PathBuf {
    self.files_dir.join("frameworks").join(name)
  }

  /// Virtualenv a framework's commands are executed in.
  pub fn venv_dir(&self, name: &str) -> PathBuf {
    self.files_dir.join("venvs").join(name)
  }

  /// Size of the parallel worker pool.
  pub fn worker_limit(&self) -> usize {
    self
      .max_workers
      .filter(|&n| n > 0)
      .unwrap_or_else(|| {
        std::thread::available_parallelism()
          .map(NonZeroUsize::get)
          .unwrap_or(1)
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[test]
  fn missing_file_yields_defaults() {
    let temp = tempdir().unwrap();
    let settings = Settings::load(&temp.path().join("absent.toml")).unwrap();

    assert_eq!(settings.max_workers, None);
    assert!(settings.frameworks.is_empty());
  }

  #[test]
  fn loads_framework_groups_from_toml() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("harbinger.toml");
    fs::write(
      &path,
      r#"
files_dir = "/srv/harbinger"
max_workers = 2

[frameworks.shaker]
image = "shaker-image"
tests_format = ".yaml"
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();

    assert_eq!(settings.files_dir, PathBuf::from("/srv/harbinger"));
    assert_eq!(settings.worker_limit(), 2);
    assert_eq!(
      settings.framework_group("shaker").unwrap()["image"],
      Value::from("shaker-image")
    );
    assert_eq!(settings.outputs_dir(), PathBuf::from("/srv/harbinger/outputs"));
    assert_eq!(
      settings.venv_dir("shaker"),
      PathBuf::from("/srv/harbinger/venvs/shaker")
    );
  }

  #[test]
  fn loads_json_settings() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("harbinger.json");
    fs::write(&path, r#"{"frameworks": {"yardstick": {"debug": true}}}"#).unwrap();

    let settings = Settings::load(&path).unwrap();

    assert_eq!(
      settings.framework_group("yardstick").unwrap()["debug"],
      Value::Bool(true)
    );
  }

  #[test]
  fn zero_workers_falls_back_to_host_parallelism() {
    let settings = Settings {
      max_workers: Some(0),
      ..Settings::default()
    };

    assert!(settings.worker_limit() >= 1);
  }
}
