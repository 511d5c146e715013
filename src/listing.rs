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
use crate::adapter::AdapterRegistry;
use crate::adapter::walk_tests;
use crate::config::Settings;
use crate::descriptor::value_to_string;
use crate::error::AdapterError;
use crate::table;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Table of the registered frameworks that have a settings group.
pub fn list_frameworks(settings: &Settings, registry: &AdapterRegistry) -> String {
  let names: Vec<String> = registry
    .names()
    .into_iter()
    .filter(|name| settings.framework_group(name).is_some())
    .collect();
  table::render("Frameworks", &names)
}

/// One table per directory under the framework's comma separated
/// `test_paths`, listing the test files each directory holds.
pub fn list_tests(settings: &Settings, framework: &str) -> Result<String, AdapterError> {
  let Some(group) = settings.framework_group(framework) else {
    return Err(AdapterError::UnknownFramework {
      name: framework.to_string(),
      available: settings.frameworks.keys().cloned().collect(),
    });
  };

  let setting = |key: &str| group.get(key).filter(|v| !v.is_null()).map(value_to_string);
  let format = setting("tests_format").unwrap_or_else(|| ".yaml".to_string());
  let root = settings.framework_dir(framework);

  let mut by_dir: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
  let test_paths = setting("test_paths").unwrap_or_default();
  for test_path in test_paths.split(',').map(str::trim) {
    for test in walk_tests(&root.join(test_path), &format)? {
      let (Some(dir), Some(name)) = (test.parent(), test.file_name()) else {
        continue;
      };
      by_dir
        .entry(dir.to_path_buf())
        .or_default()
        .push(name.to_string_lossy().into_owned());
    }
  }

  let tables: Vec<String> = by_dir
    .iter()
    .map(|(dir, tests)| {
      let header = pathdiff::diff_paths(dir, &root).unwrap_or_else(|| dir.clone());
      table::render(&header.to_string_lossy(), tests)
    })
    .collect();
  Ok(tables.join("\n\n"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::fs;
  use tempfile::tempdir;

  fn settings(root: &std::path::Path) -> Settings {
    Settings {
      files_dir: root.to_path_buf(),
      frameworks: BTreeMap::from([(
        "shaker".to_string(),
        json!({"test_paths": "scenarios/openstack, scenarios/misc", "tests_format": ".yaml"})
          .as_object()
          .cloned()
          .unwrap(),
      )]),
      ..Settings::default()
    }
  }

  #[test]
  fn lists_only_configured_frameworks() {
    let temp = tempdir().unwrap();

    let listing = list_frameworks(&settings(temp.path()), &AdapterRegistry::builtin());

    assert!(listing.contains("|   shaker   |"));
    assert!(!listing.contains("yardstick"));
  }

  #[test]
  fn lists_tests_per_directory() {
    let temp = tempdir().unwrap();
    let root = temp.path().join("frameworks/shaker/scenarios");
    fs::create_dir_all(root.join("openstack/l3")).unwrap();
    fs::create_dir_all(root.join("misc")).unwrap();
    fs::write(root.join("openstack/dense_l2.yaml"), "").unwrap();
    fs::write(root.join("openstack/l3/east_west.yaml"), "").unwrap();
    fs::write(root.join("openstack/notes.txt"), "").unwrap();
    fs::write(root.join("misc/instance_metadata.yaml"), "").unwrap();

    let listing = list_tests(&settings(temp.path()), "shaker").unwrap();

    assert_eq!(listing.split("\n\n").count(), 3);
    assert!(listing.contains("scenarios/misc"));
    assert!(listing.contains("scenarios/openstack/l3"));
    assert!(listing.contains("dense_l2.yaml"));
    assert!(!listing.contains("notes.txt"));
  }

  #[test]
  fn unconfigured_framework_is_unknown() {
    let temp = tempdir().unwrap();

    let err = list_tests(&settings(temp.path()), "yardstick").unwrap_err();

    assert!(matches!(err, AdapterError::UnknownFramework { .. }));
  }
}
