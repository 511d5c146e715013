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

//! Plain value objects describing one run, built verbatim from the
//! `Execute`, `Environment` and `Options` sections of the run document.

use crate::config::Attributes;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Renders a setting value the way it is written into environment
/// variables and generated config files.
pub fn value_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn is_exported(name: &str) -> bool {
  name.chars().any(char::is_alphabetic) && !name.chars().any(char::is_lowercase)
}

/// The `Environment` section. Uppercase entries are exported to the
/// environment of every command an adapter runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(Attributes);

impl Environment {
  pub fn new(values: Attributes) -> Self {
    Environment(values)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  /// Uppercase, non-null entries as environment variable pairs.
  pub fn exported(&self) -> impl Iterator<Item = (String, String)> + '_ {
    exported_pairs(&self.0)
  }
}

pub(crate) fn exported_pairs(values: &Attributes) -> impl Iterator<Item = (String, String)> + '_ {
  values
    .iter()
    .filter(|(name, value)| is_exported(name) && !value.is_null())
    .map(|(name, value)| (name.clone(), value_to_string(value)))
}

/// How the configured frameworks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
  Serial,
  #[default]
  Parallel,
}

impl ExecutionMode {
  /// Parses `execution_mode`. Anything other than `serial` or `parallel`
  /// falls back to parallel.
  pub fn from_setting(value: Option<&Value>) -> Self {
    match value.and_then(Value::as_str) {
      Some("serial") => ExecutionMode::Serial,
      Some("parallel") | None => ExecutionMode::Parallel,
      Some(other) => {
        tracing::warn!(mode = other, "Unrecognized execution_mode, defaulting to parallel");
        ExecutionMode::Parallel
      }
    }
  }
}

impl fmt::Display for ExecutionMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExecutionMode::Serial => f.write_str("serial"),
      ExecutionMode::Parallel => f.write_str("parallel"),
    }
  }
}

/// The `Options` section: run-wide settings shared by every framework.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Attributes);

impl Options {
  pub fn new(values: Attributes) -> Self {
    Options(values)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn execution_mode(&self) -> ExecutionMode {
    ExecutionMode::from_setting(self.get("execution_mode"))
  }
}

/// One entry of the `Execute` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Framework {
  name: String,
  attributes: Attributes,
}

impl Framework {
  /// Builds a framework from its section. A missing `required` mapping is
  /// stored as empty so the highest-priority tier always exists.
  pub fn new(name: impl Into<String>, mut attributes: Attributes) -> Self {
    attributes
      .entry("required")
      .or_insert_with(|| Value::Object(Attributes::new()));
    Framework {
      name: name.into(),
      attributes,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn attribute(&self, key: &str) -> Option<&Value> {
    self.attributes.get(key)
  }

  fn mapping(&self, key: &str) -> Option<&Attributes> {
    self.attribute(key).and_then(Value::as_object)
  }

  /// Entries of the `tests` list.
  pub fn tests(&self) -> Vec<String> {
    self
      .attribute("tests")
      .and_then(Value::as_array)
      .map(|tests| tests.iter().map(value_to_string).collect())
      .unwrap_or_default()
  }

  pub fn extras(&self) -> Option<&Attributes> {
    self.mapping("extras")
  }

  pub fn options_override(&self) -> Option<&Attributes> {
    self.mapping("options_override")
  }

  pub fn required(&self) -> Option<&Attributes> {
    self.mapping("required")
  }

  pub fn environment_overrides(&self) -> Option<&Attributes> {
    self.mapping("environment_overrides")
  }
}

/// Frameworks keyed by name, in the order they appear in `Execute`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameworkSet(Vec<Framework>);

impl FrameworkSet {
  /// Inserts a framework, replacing an earlier one of the same name in place.
  pub fn insert(&mut self, framework: Framework) {
    match self.0.iter_mut().find(|f| f.name == framework.name) {
      Some(existing) => *existing = framework,
      None => self.0.push(framework),
    }
  }

  pub fn get(&self, name: &str) -> Option<&Framework> {
    self.0.iter().find(|f| f.name == name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Framework> {
    self.0.iter()
  }

  pub fn names(&self) -> Vec<&str> {
    self.0.iter().map(Framework::name).collect()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<Framework> for FrameworkSet {
  fn from_iter<T: IntoIterator<Item = Framework>>(iter: T) -> Self {
    let mut set = FrameworkSet::default();
    for framework in iter {
      set.insert(framework);
    }
    set
  }
}

/// Everything a run needs, resolved before execution starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunDescriptor {
  pub frameworks: FrameworkSet,
  pub environment: Environment,
  pub options: Options,
}
