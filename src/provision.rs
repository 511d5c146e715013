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
//! Image and flavor provisioning through the `openstack` command-line client.
//!
//! Authentication comes from the `OS_*` variables the adapter exported into
//! the [`Shell`] before calling in here.

use crate::command::Shell;
use crate::error::AdapterError;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// Compute flavor dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorSpec {
  pub ram_mb: u32,
  pub vcpus: u32,
  pub disk_gb: u32,
  pub swap_mb: u32,
}

/// Quotes a value for safe interpolation into a bash command line.
pub fn shell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

fn names(listing: &str) -> impl Iterator<Item = &str> {
  listing.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Finds the first file in `dir` whose name contains `image`.
pub fn find_image_file(dir: &Path, image: &str) -> Result<PathBuf, AdapterError> {
  let not_found = || AdapterError::ImageFileNotFound {
    image: image.to_string(),
    dir: dir.to_path_buf(),
  };

  let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
    .map_err(|_| not_found())?
    .filter_map(Result::ok)
    .filter(|entry| entry.file_name().to_string_lossy().contains(image))
    .map(|entry| entry.path())
    .collect();
  candidates.sort();

  candidates.into_iter().next().ok_or_else(not_found)
}

/// Cloud resources a framework needs before it can run.
pub struct Provisioner<'a> {
  label: &'a str,
  shell: &'a Shell,
}

impl<'a> Provisioner<'a> {
  pub fn new(label: &'a str, shell: &'a Shell) -> Self {
    Provisioner { label, shell }
  }

  pub async fn image_exists(&self, image: &str) -> Result<bool, AdapterError> {
    let listing = self
      .shell
      .capture("openstack image list -f value -c Name")
      .await?;
    let exists = names(&listing).any(|name| name == image);
    tracing::info!(framework = self.label, "Image <{}> exists in Glance: {}", image, exists);
    Ok(exists)
  }

  /// Uploads the image file found in `dir` under the name `image`.
  pub async fn upload_image(
    &self,
    image: &str,
    disk_format: &str,
    container_format: &str,
    dir: &Path,
  ) -> Result<(), AdapterError> {
    let file = find_image_file(dir, image)?;

    tracing::info!(framework = self.label, "Uploading image <{}> into Glance....", image);
    self
      .shell
      .exec(&format!(
        "openstack image create --disk-format {} --container-format {} --file {} {}",
        shell_quote(disk_format),
        shell_quote(container_format),
        shell_quote(&file.to_string_lossy()),
        shell_quote(image)
      ))
      .await?;
    tracing::info!(framework = self.label, "Image <{}> uploaded into Glance", image);
    Ok(())
  }

  pub async fn flavor_exists(&self, flavor: &str) -> Result<bool, AdapterError> {
    let listing = self
      .shell
      .capture("openstack flavor list -f value -c Name")
      .await?;
    let exists = names(&listing).any(|name| name == flavor);
    tracing::info!(framework = self.label, "Flavor <{}> exists: {}", flavor, exists);
    Ok(exists)
  }

  pub async fn create_flavor(&self, flavor: &str, spec: &FlavorSpec) -> Result<(), AdapterError> {
    tracing::info!(framework = self.label, "Creating flavor {}", flavor);
    self
      .shell
      .exec(&format!(
        "openstack flavor create --ram {} --vcpus {} --disk {} --swap {} --public {}",
        spec.ram_mb,
        spec.vcpus,
        spec.disk_gb,
        spec.swap_mb,
        shell_quote(flavor)
      ))
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn quotes_single_quotes() {
    assert_eq!(shell_quote("m1.small"), "'m1.small'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
  }

  #[test]
  fn finds_image_file_by_name() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("unrelated.img"), "").unwrap();
    fs::write(temp.path().join("shaker-image.qcow2"), "").unwrap();

    let found = find_image_file(temp.path(), "shaker-image").unwrap();

    assert_eq!(found, temp.path().join("shaker-image.qcow2"));
  }

  #[test]
  fn missing_image_file_is_an_error() {
    let temp = tempdir().unwrap();

    let err = find_image_file(temp.path(), "yardstick-image").unwrap_err();

    assert!(matches!(err, AdapterError::ImageFileNotFound { .. }));
  }

  #[tokio::test]
  async fn image_listing_is_matched_exactly() {
    let temp = tempdir().unwrap();
    let bin = temp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    // A fake `openstack` client installed through the virtualenv.
    fs::write(
      bin.join("activate"),
      "openstack() { printf 'cirros\\nshaker-image\\n'; }\n",
    )
    .unwrap();
    let shell = Shell::new(temp.path().to_path_buf());
    let provisioner = Provisioner::new("shaker", &shell);

    assert!(provisioner.image_exists("shaker-image").await.unwrap());
    assert!(!provisioner.image_exists("shaker").await.unwrap());
  }
}
