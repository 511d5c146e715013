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
use super::AdapterBase;
use super::AdapterContext;
use super::FrameworkAdapter;
use super::IniFile;
use super::SetupFuture;
use crate::descriptor::value_to_string;
use crate::error::AdapterError;
use crate::provision::FlavorSpec;
use crate::provision::shell_quote;
use serde::Serialize;
use std::path::PathBuf;

const TEST_SUITE_NAME: &str = "yardstick-suite.yaml";

/// Where the image tools leave a freshly built image, unless `image_dir` is set.
const DEFAULT_IMAGE_DIR: &str = "/tmp/workspace/yardstick";

const FLAVOR: FlavorSpec = FlavorSpec {
  ram_mb: 512,
  vcpus: 1,
  disk_gb: 3,
  swap_mb: 100,
};

#[derive(Debug, Serialize)]
struct TestSuite {
  schema: Option<String>,
  name: String,
  test_cases_dir: String,
  test_cases: Vec<TestCase>,
}

#[derive(Debug, Serialize)]
struct TestCase {
  file_name: String,
}

/// Runs the Yardstick test framework.
pub struct YardstickAdapter {
  base: AdapterBase,
  conf_path: PathBuf,
  suite_path: PathBuf,
  output_path: PathBuf,
}

impl YardstickAdapter {
  pub fn new(ctx: AdapterContext) -> Self {
    let base = AdapterBase::new(ctx);
    let conf_path = base.inputs_dir().join(format!("{}.conf", base.name()));
    let suite_path = base.inputs_dir().join(TEST_SUITE_NAME);
    let output_path = base.outputs_dir().join("yardstick.out");
    YardstickAdapter {
      base,
      conf_path,
      suite_path,
      output_path,
    }
  }

  fn conf(&self) -> Result<IniFile, AdapterError> {
    let resolver = self.base.resolver();
    let mut ini = IniFile::default();

    if let Some(extras) = self.base.framework().extras() {
      for (key, value) in extras {
        ini.set("DEFAULT", key, value_to_string(value));
      }
    }

    let dispatch_file = self
      .base
      .outputs_dir()
      .join(resolver.require("dispatcher_file_name")?);

    ini.set_opt("DEFAULT", "debug", resolver.string("debug"));
    ini.set("DEFAULT", "dispatcher", resolver.require("dispatcher")?);
    ini.set("dispatcher_file", "file_name", dispatch_file.to_string_lossy());

    Ok(ini)
  }

  /// The suite lists the tests as given. `test_cases_dir` points at the
  /// framework's test path unless the tests already name it themselves.
  fn suite(&self) -> TestSuite {
    let resolver = self.base.resolver();
    let test_paths = resolver.string("test_paths").unwrap_or_default();
    let tests = self.base.framework().tests();

    // Tests that already name the test cases directory are used as given.
    let mut prefix = test_paths.clone();
    prefix.pop();
    let qualified = tests.iter().any(|test| test.contains(prefix.as_str()));
    let test_cases_dir = if qualified {
      "/".to_string()
    } else {
      test_paths
    };

    TestSuite {
      schema: resolver.string("schema"),
      name: TEST_SUITE_NAME.to_string(),
      test_cases_dir,
      test_cases: tests
        .into_iter()
        .map(|file_name| TestCase { file_name })
        .collect(),
    }
  }

  /// Builds the image with Yardstick's own tools. Needs root.
  async fn create_image(&mut self) -> Result<(), AdapterError> {
    tracing::info!("Creating Yardstick image..");

    self.base.shell_mut().export([("YARD_IMG_ARCH", "amd64")]);
    let tools = self.base.settings().framework_dir("yardstick").join("tools");
    let script = format!(
      "apt update && {} {}",
      shell_quote(&tools.join("yardstick-img-modify").to_string_lossy()),
      shell_quote(&tools.join("ubuntu-server-cloudimg-modify.sh").to_string_lossy())
    );
    self.base.shell().exec(&script).await?;
    Ok(())
  }

  async fn run(&mut self) -> Result<(), AdapterError> {
    self.base.export_environment();
    self.base.export_credentials();

    let flavor = self.base.resolver().require("flavor_name")?;
    if !self.base.provisioner().flavor_exists(&flavor).await? {
      self.base.provisioner().create_flavor(&flavor, &FLAVOR).await?;
    }

    let image = self.base.resolver().require("image")?;
    if !self.base.provisioner().image_exists(&image).await? {
      self.create_image().await?;
      let image_dir = self
        .base
        .resolver()
        .string("image_dir")
        .unwrap_or_else(|| DEFAULT_IMAGE_DIR.to_string());
      self
        .base
        .provisioner()
        .upload_image(&image, "qcow2", "bare", &PathBuf::from(image_dir))
        .await?;
    }

    let conf = self.conf()?;
    self.base.write_file(&self.conf_path, &conf.render())?;

    let suite = serde_yaml::to_string(&self.suite())?;
    self.base.write_file(&self.suite_path, &suite)?;

    let command = format!(
      "yardstick --config-file {} task start --output-file {} --suite {}",
      shell_quote(&self.conf_path.to_string_lossy()),
      shell_quote(&self.output_path.to_string_lossy()),
      shell_quote(&self.suite_path.to_string_lossy())
    );
    self.base.shell().exec(&command).await?;
    Ok(())
  }
}

impl FrameworkAdapter for YardstickAdapter {
  fn setup(&mut self) -> SetupFuture<'_> {
    Box::pin(self.run())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Attributes;
  use crate::config::Settings;
  use crate::descriptor::Environment;
  use crate::descriptor::Framework;
  use crate::descriptor::Options;
  use serde_json::Value;
  use serde_json::json;
  use std::collections::BTreeMap;

  fn attributes(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
  }

  fn adapter(framework: Value) -> YardstickAdapter {
    YardstickAdapter::new(AdapterContext {
      settings: Settings {
        files_dir: PathBuf::from("/srv/harbinger"),
        frameworks: BTreeMap::from([(
          "yardstick".to_string(),
          attributes(json!({
            "test_paths": "tests/opnfv/test_cases/",
            "schema": "yardstick:suite:0.1",
            "debug": "False",
            "dispatcher": "file",
            "dispatcher_file_name": "yardstick-dispatch.out"
          })),
        )]),
        ..Settings::default()
      },
      framework: Framework::new("yardstick", attributes(framework)),
      environment: Environment::default(),
      options: Options::default(),
    })
  }

  #[test]
  fn conf_has_dispatcher_section() {
    let yardstick = adapter(json!({
      "tests": [],
      "extras": {"debug": "True"}
    }));

    assert_eq!(
      yardstick.conf().unwrap().render(),
      "[DEFAULT]\n\
       debug = True\n\
       dispatcher = file\n\n\
       [dispatcher_file]\n\
       file_name = /srv/harbinger/outputs/yardstick-dispatch.out\n\n"
    );
  }

  #[test]
  fn suite_uses_test_paths_for_bare_names() {
    let yardstick = adapter(json!({"tests": ["opnfv_yardstick_tc002.yaml"]}));

    let suite = yardstick.suite();
    let yaml = serde_yaml::to_string(&suite).unwrap();

    assert_eq!(suite.schema.as_deref(), Some("yardstick:suite:0.1"));
    assert_eq!(suite.test_cases_dir, "tests/opnfv/test_cases/");
    assert!(yaml.contains("name: yardstick-suite.yaml\n"));
    assert!(yaml.contains("- file_name: opnfv_yardstick_tc002.yaml\n"));
  }

  #[test]
  fn suite_uses_root_for_qualified_tests() {
    let yardstick = adapter(json!({
      "tests": ["/opt/yardstick/tests/opnfv/test_cases/opnfv_yardstick_tc002.yaml"]
    }));

    assert_eq!(yardstick.suite().test_cases_dir, "/");
  }

  #[test]
  fn suite_drops_only_the_last_character_of_test_paths() {
    let yardstick = adapter(json!({
      "tests": ["tests/opnfv/test_cases/opnfv_yardstick_tc002.yaml"],
      "required": {"test_paths": "tests/opnfv/test_cases"}
    }));

    assert_eq!(yardstick.suite().test_cases_dir, "/");
  }

  #[test]
  fn suite_with_empty_test_paths_uses_root() {
    let yardstick = adapter(json!({
      "tests": ["opnfv_yardstick_tc002.yaml"],
      "required": {"test_paths": ""}
    }));

    assert_eq!(yardstick.suite().test_cases_dir, "/");
  }

  #[test]
  fn suite_without_tests_keeps_test_paths() {
    let yardstick = adapter(json!({"tests": []}));

    assert_eq!(yardstick.suite().test_cases_dir, "tests/opnfv/test_cases/");
  }

  #[test]
  fn inputs_and_outputs_are_framework_specific() {
    let yardstick = adapter(json!({"tests": []}));

    assert_eq!(
      yardstick.conf_path,
      PathBuf::from("/srv/harbinger/inputs/yardstick.conf")
    );
    assert_eq!(
      yardstick.output_path,
      PathBuf::from("/srv/harbinger/outputs/yardstick.out")
    );
  }
}
