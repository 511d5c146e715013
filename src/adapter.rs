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

//! Framework adapters and the registry that maps framework names to them.
//!
//! An adapter turns the generic run configuration into one framework's
//! native invocation: it provisions cloud resources, writes the framework's
//! config files into the inputs directory and runs the framework.

mod shaker;
mod yardstick;

use crate::command::Shell;
use crate::config::Settings;
use crate::descriptor::Environment;
use crate::descriptor::Framework;
use crate::descriptor::Options;
use crate::descriptor::exported_pairs;
use crate::error::AdapterError;
use crate::provision::Provisioner;
use crate::resolver::Resolver;
use crate::resolver::credential_env;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use walkdir::WalkDir;

pub use shaker::ShakerAdapter;
pub use yardstick::YardstickAdapter;

/// Test file extension used when no tier sets `tests_format`.
const DEFAULT_TESTS_FORMAT: &str = ".yaml";

pub type SetupFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AdapterError>> + Send + 'a>>;

/// Provisions and runs one framework.
pub trait FrameworkAdapter: Send {
  /// Performs all provisioning, config generation and invocation for the
  /// framework. Fails if any step fails.
  fn setup(&mut self) -> SetupFuture<'_>;
}

/// Everything an adapter is constructed from. Owned, so it can cross a
/// process boundary unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterContext {
  pub settings: Settings,
  pub framework: Framework,
  pub environment: Environment,
  pub options: Options,
}

impl AdapterContext {
  pub fn resolver(&self) -> Resolver<'_> {
    Resolver::new(&self.settings, &self.options, &self.framework)
  }
}

pub type AdapterFactory =
  Box<dyn Fn(AdapterContext) -> Result<Box<dyn FrameworkAdapter>, AdapterError> + Send + Sync>;

/// Maps framework names to adapter constructors.
#[derive(Default)]
pub struct AdapterRegistry {
  factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
  /// A registry holding every adapter shipped with harbinger.
  pub fn builtin() -> Self {
    let mut registry = AdapterRegistry::default();
    registry.register("shaker", |ctx| Ok(Box::new(ShakerAdapter::new(ctx))));
    registry.register("yardstick", |ctx| Ok(Box::new(YardstickAdapter::new(ctx))));
    registry
  }

  pub fn register<F>(&mut self, name: &str, factory: F)
  where
    F: Fn(AdapterContext) -> Result<Box<dyn FrameworkAdapter>, AdapterError> + Send + Sync + 'static,
  {
    self.factories.insert(name.to_string(), Box::new(factory));
  }

  pub fn contains(&self, name: &str) -> bool {
    self.factories.contains_key(name)
  }

  pub fn names(&self) -> Vec<String> {
    self.factories.keys().cloned().collect()
  }

  /// Builds the adapter registered under the context's framework name.
  pub fn create(&self, ctx: AdapterContext) -> Result<Box<dyn FrameworkAdapter>, AdapterError> {
    let Some(factory) = self.factories.get(ctx.framework.name()) else {
      return Err(AdapterError::UnknownFramework {
        name: ctx.framework.name().to_string(),
        available: self.names(),
      });
    };
    factory(ctx)
  }
}

/// Minimal INI document writer; `DEFAULT` always comes first.
#[derive(Debug, Clone, PartialEq)]
pub struct IniFile {
  sections: Vec<(String, Vec<(String, String)>)>,
}

impl Default for IniFile {
  fn default() -> Self {
    IniFile {
      sections: vec![("DEFAULT".to_string(), Vec::new())],
    }
  }
}

impl IniFile {
  /// Sets `key` in `section`, replacing an earlier value in place.
  pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
    let index = match self.sections.iter().position(|(name, _)| name == section) {
      Some(i) => i,
      None => {
        self.sections.push((section.to_string(), Vec::new()));
        self.sections.len() - 1
      }
    };
    let entries = &mut self.sections[index].1;
    let value = value.into();
    match entries.iter_mut().find(|(k, _)| k == key) {
      Some(entry) => entry.1 = value,
      None => entries.push((key.to_string(), value)),
    }
  }

  /// Sets `key` only when a value is present.
  pub fn set_opt(&mut self, section: &str, key: &str, value: Option<String>) {
    if let Some(value) = value {
      self.set(section, key, value);
    }
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    for (name, entries) in &self.sections {
      out.push_str(&format!("[{name}]\n"));
      for (key, value) in entries {
        out.push_str(&format!("{key} = {value}\n"));
      }
      out.push('\n');
    }
    out
  }
}

/// Behaviour shared by every adapter.
pub struct AdapterBase {
  ctx: AdapterContext,
  shell: Shell,
}

impl AdapterBase {
  pub fn new(ctx: AdapterContext) -> Self {
    let shell = Shell::new(ctx.settings.venv_dir(ctx.framework.name()));
    AdapterBase { ctx, shell }
  }

  pub fn name(&self) -> &str {
    self.ctx.framework.name()
  }

  pub fn framework(&self) -> &Framework {
    &self.ctx.framework
  }

  pub fn settings(&self) -> &Settings {
    &self.ctx.settings
  }

  pub fn resolver(&self) -> Resolver<'_> {
    self.ctx.resolver()
  }

  pub fn shell(&self) -> &Shell {
    &self.shell
  }

  pub fn shell_mut(&mut self) -> &mut Shell {
    &mut self.shell
  }

  pub fn provisioner(&self) -> Provisioner<'_> {
    Provisioner::new(self.ctx.framework.name(), &self.shell)
  }

  pub fn inputs_dir(&self) -> PathBuf {
    self.ctx.settings.inputs_dir()
  }

  pub fn outputs_dir(&self) -> PathBuf {
    self.ctx.settings.outputs_dir()
  }

  /// Exports uppercase `Environment` entries, then uppercase
  /// `environment_overrides` entries, to every later command.
  pub fn export_environment(&mut self) {
    let mut vars: Vec<(String, String)> = self.ctx.environment.exported().collect();
    if let Some(overrides) = self.ctx.framework.environment_overrides() {
      vars.extend(exported_pairs(overrides));
    }
    tracing::debug!(count = vars.len(), "Exporting environment");
    self.shell.export(vars);
  }

  /// Exports the cloud credentials resolved for this framework.
  pub fn export_credentials(&mut self) {
    let vars = credential_env(&self.resolver());
    self.shell.export(vars);
  }

  pub fn tests_format(&self) -> String {
    self
      .resolver()
      .string("tests_format")
      .unwrap_or_else(|| DEFAULT_TESTS_FORMAT.to_string())
  }

  /// Directory relative test entries are resolved against.
  pub fn test_root(&self) -> PathBuf {
    let root = self.ctx.settings.framework_dir(self.name());
    match self.resolver().string("test_paths") {
      Some(paths) => root.join(paths),
      None => root,
    }
  }

  /// Expands the framework's `tests` list into test files. `*` selects every
  /// test under the test root; directories are walked recursively. Fails,
  /// listing each offender, if any entry is missing or has the wrong extension.
  pub fn collect_tests(&self) -> Result<Vec<PathBuf>, AdapterError> {
    let format = self.tests_format();
    let root = self.test_root();
    let mut tests = Vec::new();
    let mut bad = Vec::new();

    for test in self.ctx.framework.tests() {
      if test == "*" {
        tests.extend(walk_tests(&root, &format)?);
        continue;
      }

      let path = if Path::new(&test).is_absolute() {
        PathBuf::from(&test)
      } else {
        root.join(&test)
      };

      if path.is_dir() {
        tests.extend(walk_tests(&path, &format)?);
      } else if path.is_file() && test.ends_with(&format) {
        tests.push(path);
      } else {
        bad.push(test);
      }
    }

    if bad.is_empty() {
      Ok(tests)
    } else {
      Err(AdapterError::InvalidTests(bad))
    }
  }

  pub fn write_file(&self, path: &Path, contents: &str) -> Result<(), AdapterError> {
    tracing::debug!(path = %path.display(), "Writing framework input");
    fs::write(path, contents).map_err(|source| AdapterError::WriteFile {
      path: path.to_path_buf(),
      source,
    })
  }
}

/// Every file under `dir` ending in `format`, in sorted order. Symlinked
/// files are included; symlinked directories are not descended into.
pub fn walk_tests(dir: &Path, format: &str) -> Result<Vec<PathBuf>, AdapterError> {
  let mut found = Vec::new();
  for entry in WalkDir::new(dir).sort_by_file_name() {
    let entry = entry.map_err(std::io::Error::from)?;
    if entry.path().is_file() && entry.file_name().to_string_lossy().ends_with(format) {
      found.push(entry.into_path());
    }
  }
  Ok(found)
}
