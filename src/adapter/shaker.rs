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
use crate::provision::shell_quote;
use std::path::PathBuf;

/// Runs the Shaker data plane test suite.
pub struct ShakerAdapter {
  base: AdapterBase,
  cfg_path: PathBuf,
  results_path: PathBuf,
}

impl ShakerAdapter {
  pub fn new(ctx: AdapterContext) -> Self {
    let base = AdapterBase::new(ctx);
    let cfg_path = base.inputs_dir().join(format!("{}.cfg", base.name()));
    let results_path = base.outputs_dir().join("shaker-results.json");
    ShakerAdapter {
      base,
      cfg_path,
      results_path,
    }
  }

  /// Builds `shaker.cfg`. Extras are written first so the resolved
  /// settings take their place when keys collide.
  fn config(&self, scenarios: &[PathBuf]) -> Result<IniFile, AdapterError> {
    let resolver = self.base.resolver();
    let mut ini = IniFile::default();

    if let Some(extras) = self.base.framework().extras() {
      for (key, value) in extras {
        ini.set("DEFAULT", key, value_to_string(value));
      }
    }

    let user_domain = resolver
      .string("user_domain_name")
      .or_else(|| resolver.string("user_domain_id"));
    let project_domain = resolver
      .string("project_domain_name")
      .or_else(|| resolver.string("project_domain_id"));
    let scenario = scenarios
      .iter()
      .map(|p| p.to_string_lossy().into_owned())
      .collect::<Vec<_>>()
      .join(", ");

    ini.set_opt("DEFAULT", "os_username", resolver.string("username"));
    ini.set_opt("DEFAULT", "os_password", resolver.string("password"));
    ini.set_opt("DEFAULT", "os_project_name", resolver.string("project_name"));
    ini.set_opt("DEFAULT", "os_user_domain_name", user_domain);
    ini.set_opt("DEFAULT", "os_project_domain_name", project_domain);
    ini.set("DEFAULT", "flavor_name", resolver.require("flavor_name")?);
    ini.set("DEFAULT", "image_name", resolver.require("image")?);
    ini.set("DEFAULT", "output", self.results_path.to_string_lossy());
    ini.set("DEFAULT", "scenario", scenario);
    ini.set_opt("DEFAULT", "server_endpoint", resolver.string("server_endpoint"));
    ini.set_opt("DEFAULT", "external_net", resolver.string("external_network"));

    Ok(ini)
  }

  async fn create_image(&self) -> Result<(), AdapterError> {
    tracing::info!("Creating Shaker image..");
    self.base.shell().exec("shaker-image-builder").await?;
    Ok(())
  }

  async fn run(&mut self) -> Result<(), AdapterError> {
    self.base.export_environment();
    self.base.export_credentials();

    let image = self.base.resolver().require("image")?;
    if !self.base.provisioner().image_exists(&image).await? {
      self.create_image().await?;
      self
        .base
        .provisioner()
        .upload_image(&image, "qcow2", "bare", &self.base.settings().images_dir())
        .await?;
    }

    let scenarios = self.base.collect_tests()?;
    let ini = self.config(&scenarios)?;
    self.base.write_file(&self.cfg_path, &ini.render())?;

    let command = format!(
      "shaker --config-file {}",
      shell_quote(&self.cfg_path.to_string_lossy())
    );
    self.base.shell().exec(&command).await?;
    Ok(())
  }
}

impl FrameworkAdapter for ShakerAdapter {
  fn setup(&mut self) -> SetupFuture<'_> {
    Box::pin(self.run())
  }
}
