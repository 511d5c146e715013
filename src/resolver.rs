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

//! Resolves a setting's effective value for one framework.
//!
//! Sources are consulted from lowest to highest priority:
//!
//! 1. the framework's group in [`Settings`]
//! 2. the run's [`Options`]
//! 3. the framework's `options_override` mapping
//! 4. the framework's `extras` mapping
//! 5. the framework's `required` mapping
//!
//! A later source wins only with a non-null value. Nulls are skipped, so an
//! explicit null never erases a value supplied by an earlier source.

use crate::config::Attributes;
use crate::config::Settings;
use crate::descriptor::Framework;
use crate::descriptor::Options;
use crate::descriptor::value_to_string;
use crate::error::ResolveError;
use serde_json::Value;
use std::fmt;

/// One source of the precedence chain, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
  Settings,
  Options,
  OptionsOverride,
  Extras,
  Required,
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Tier::Settings => "settings",
      Tier::Options => "options",
      Tier::OptionsOverride => "options_override",
      Tier::Extras => "extras",
      Tier::Required => "required",
    };
    f.write_str(name)
  }
}

type Lookup<'a> = Box<dyn Fn(&str) -> Option<&'a Value> + Send + Sync + 'a>;

fn from_mapping(mapping: Option<&Attributes>) -> Lookup<'_> {
  Box::new(move |key: &str| mapping.and_then(|m| m.get(key)))
}

fn from_options(options: &Options) -> Lookup<'_> {
  Box::new(move |key: &str| options.get(key))
}

/// The fixed, ordered lookup chain for one framework.
pub struct Resolver<'a> {
  framework: &'a str,
  chain: [(Tier, Lookup<'a>); 5],
}

impl<'a> Resolver<'a> {
  pub fn new(settings: &'a Settings, options: &'a Options, framework: &'a Framework) -> Self {
    let group = settings.framework_group(framework.name());
    Resolver {
      framework: framework.name(),
      chain: [
        (Tier::Settings, from_mapping(group)),
        (Tier::Options, from_options(options)),
        (Tier::OptionsOverride, from_mapping(framework.options_override())),
        (Tier::Extras, from_mapping(framework.extras())),
        (Tier::Required, from_mapping(framework.required())),
      ],
    }
  }

  /// The effective value and the tier that supplied it.
  pub fn resolve_with_tier(&self, key: &str) -> Option<(Tier, &'a Value)> {
    self
      .chain
      .iter()
      .fold(None, |best, (tier, lookup)| match lookup(key) {
        Some(value) if !value.is_null() => Some((*tier, value)),
        _ => best,
      })
  }

  /// The effective value, or `None` when no tier supplies one.
  pub fn resolve(&self, key: &str) -> Option<&'a Value> {
    let resolved = self.resolve_with_tier(key);
    if let Some((tier, _)) = resolved {
      tracing::trace!(framework = self.framework, key, %tier, "Resolved setting");
    }
    resolved.map(|(_, value)| value)
  }

  /// The effective value rendered as a string.
  pub fn string(&self, key: &str) -> Option<String> {
    self.resolve(key).map(value_to_string)
  }

  /// Like [`Resolver::string`], but a missing value is an error.
  pub fn require(&self, key: &str) -> Result<String, ResolveError> {
    self.string(key).ok_or_else(|| ResolveError {
      framework: self.framework.to_string(),
      key: key.to_string(),
    })
  }
}

/// Conventional cloud credentials: (environment variable, setting name).
pub const CREDENTIALS: [(&str, &str); 4] = [
  ("OS_USERNAME", "username"),
  ("OS_PASSWORD", "password"),
  ("OS_PROJECT_NAME", "project"),
  ("EXTERNAL_NETWORK", "external_network"),
];

/// Resolves the cloud credentials as environment variable pairs.
/// Credentials no tier supplies are left out.
pub fn credential_env(resolver: &Resolver<'_>) -> Vec<(String, String)> {
  CREDENTIALS
    .iter()
    .filter_map(|(var, key)| match resolver.string(key) {
      Some(value) => Some((var.to_string(), value)),
      None => {
        tracing::warn!(variable = var, setting = key, "Credential not set");
        None
      }
    })
    .collect()
}
