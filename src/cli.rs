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
use clap::ArgAction;
use clap::Parser;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Orchestrator of data plane testing frameworks")]
pub struct Cli {
  /// Path to the harbinger settings file (TOML, or JSON for `.json` files).
  #[arg(
    long,
    global = true,
    env = "HARBINGER_SETTINGS",
    default_value = "/etc/harbinger/harbinger.toml"
  )]
  pub settings: PathBuf,

  /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
  #[arg(short, long, global = true, action = ArgAction::Count)]
  pub verbose: u8,

  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Run the frameworks configured in a YAML file.
  Run {
    /// The run configuration (sections `Execute`, `Environment`, `Options`).
    yaml: PathBuf,
  },

  /// List the frameworks that can be run.
  ListFrameworks,

  /// List the tests available to a framework.
  ListTests {
    /// Name of the framework.
    framework: String,
  },

  /// Run a single framework from a task on stdin. Used by parallel runs.
  #[command(hide = true)]
  Worker,
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::CommandFactory;

  #[test]
  fn cli_definition_is_valid() {
    Cli::command().debug_assert();
  }

  #[test]
  fn parses_run_with_global_flags() {
    let cli = Cli::parse_from(["harbinger", "run", "config.yaml", "-vv", "--settings", "h.toml"]);

    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.settings, PathBuf::from("h.toml"));
    assert!(matches!(cli.command, Commands::Run { yaml } if yaml == PathBuf::from("config.yaml")));
  }
}
