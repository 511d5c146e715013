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
//! Loading and structural validation of the run document.

use crate::config::Attributes;
use crate::descriptor::Environment;
use crate::descriptor::Framework;
use crate::descriptor::Options;
use crate::descriptor::RunDescriptor;
use crate::error::ConfigError;
use crate::error::SchemaViolations;
use jsonschema::Draft;
use serde_json::Value;
use std::fs;
use std::path::Path;

const EXECUTE: &str = "Execute";
const ENVIRONMENT: &str = "Environment";
const OPTIONS: &str = "Options";

/// JSON Schema (draft 2020-12) every run document must satisfy.
const RUN_SCHEMA: &str = include_str!("run_schema.json");

/// Reads a YAML run document into an order-preserving value tree.
pub fn load_document(path: &Path) -> Result<Value, ConfigError> {
  if !path.exists() {
    return Err(ConfigError::DocumentNotFound(path.to_path_buf()));
  }

  let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadDocument {
    path: path.to_path_buf(),
    source,
  })?;

  serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseDocument {
    path: path.to_path_buf(),
    source,
  })
}

/// Checks the document against the input schema, reporting every violation.
pub fn validate(document: &Value) -> Result<(), ConfigError> {
  let schema: Value =
    serde_json::from_str(RUN_SCHEMA).map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
  let compiled = jsonschema::options()
    .with_draft(Draft::Draft202012)
    .build(&schema)
    .map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;

  let violations: Vec<String> = compiled
    .iter_errors(document)
    .map(|err| err.to_string())
    .collect();
  if violations.is_empty() {
    Ok(())
  } else {
    Err(ConfigError::Schema(SchemaViolations(violations)))
  }
}

fn section(document: &Value, key: &str) -> Attributes {
  document
    .get(key)
    .and_then(Value::as_object)
    .cloned()
    .unwrap_or_default()
}

/// Validates the document and builds the run descriptor from it.
pub fn parse_run(document: &Value) -> Result<RunDescriptor, ConfigError> {
  validate(document)?;

  let frameworks = section(document, EXECUTE)
    .into_iter()
    .map(|(name, value)| {
      let attributes = value.as_object().cloned().unwrap_or_default();
      Framework::new(name, attributes)
    })
    .collect();

  Ok(RunDescriptor {
    frameworks,
    environment: Environment::new(section(document, ENVIRONMENT)),
    options: Options::new(section(document, OPTIONS)),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::descriptor::ExecutionMode;
  use serde_json::json;
  use tempfile::tempdir;

  fn violations(document: Value) -> Vec<String> {
    match validate(&document) {
      Err(ConfigError::Schema(SchemaViolations(v))) => v,
      other => panic!("expected schema violations, got {other:?}"),
    }
  }

  #[test]
  fn accepts_a_complete_document() {
    let document = json!({
      "Execute": {
        "shaker": {"tests": ["*"], "extras": {"agent_loss_timeout": 30}},
        "yardstick": {"tests": ["opnfv.yaml"], "required": {"flavor_name": "m1.small"}}
      },
      "Environment": {"OS_AUTH_URL": "http://keystone:5000/"},
      "Options": {"execution_mode": "serial", "username": "admin"}
    });

    let run = parse_run(&document).unwrap();

    assert_eq!(run.frameworks.names(), vec!["shaker", "yardstick"]);
    assert_eq!(run.options.execution_mode(), ExecutionMode::Serial);
    assert_eq!(
      run.frameworks.get("yardstick").unwrap().required().unwrap()["flavor_name"],
      json!("m1.small")
    );
  }

  #[test]
  fn bundled_schema_compiles() {
    let schema: Value = serde_json::from_str(RUN_SCHEMA).unwrap();

    assert!(jsonschema::validator_for(&schema).is_ok());
  }

  #[test]
  fn missing_execute_is_rejected() {
    let found = violations(json!({"Environment": {}, "Options": {}}));

    assert_eq!(found.len(), 1);
    assert!(found[0].contains("Execute"));
    assert!(found[0].contains("required"));
  }

  #[test]
  fn reports_every_violation() {
    let found = violations(json!({
      "Execute": {"shaker": {"tests": "all", "extras": ["x"]}},
      "Environment": [],
      "Options": {"execution_mode": 3}
    }));

    assert_eq!(found.len(), 4, "{found:?}");
    assert!(found.iter().any(|v| v.contains("\"all\"") && v.contains("array")));
    assert!(found.iter().any(|v| v.contains("[\"x\"]") && v.contains("object")));
    assert!(found.iter().any(|v| v.contains("[]") && v.contains("object")));
    assert!(found.iter().any(|v| v.starts_with('3')));
  }

  #[test]
  fn empty_execute_is_rejected() {
    let found = violations(json!({"Execute": {}, "Environment": {}, "Options": {}}));

    assert_eq!(found.len(), 1, "{found:?}");
  }

  #[test]
  fn framework_without_tests_is_rejected() {
    let found = violations(json!({
      "Execute": {"shaker": {"extras": {}}},
      "Environment": {},
      "Options": {}
    }));

    assert_eq!(found.len(), 1);
    assert!(found[0].contains("tests"));
  }

  #[test]
  fn loads_yaml_preserving_framework_order() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("run.yaml");
    fs::write(
      &path,
      "Execute:\n  zeta:\n    tests: []\n  alpha:\n    tests: []\nEnvironment: {}\nOptions: {}\n",
    )
    .unwrap();

    let run = parse_run(&load_document(&path).unwrap()).unwrap();

    assert_eq!(run.frameworks.names(), vec!["zeta", "alpha"]);
  }

  #[test]
  fn missing_document_is_reported() {
    let err = load_document(Path::new("/nonexistent/run.yaml")).unwrap_err();

    assert!(matches!(err, ConfigError::DocumentNotFound(_)));
  }
}
