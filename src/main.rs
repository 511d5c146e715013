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
use Commands::ListFrameworks;
use Commands::ListTests;
use Commands::Run;
use Commands::Worker;
use anyhow::Result;
use clap::Parser;
use harbinger::adapter::AdapterRegistry;
use harbinger::cli::Cli;
use harbinger::cli::Commands;
use harbinger::config::Settings;
use harbinger::engine::Engine;
use harbinger::engine::WorkerCommand;
use harbinger::error::EngineError;
use harbinger::listing::list_frameworks;
use harbinger::listing::list_tests;
use harbinger::logging::setup_tracing;
use harbinger::worker::run_worker;

#[tokio::main]
async fn main() -> Result<()> {
  let Cli {
    settings,
    verbose,
    command,
  } = Cli::parse();

  let is_worker = matches!(command, Worker);
  let _guard = setup_tracing(verbose, is_worker)?;
  let load_settings = || -> Result<Settings> {
    let loaded = Settings::load(&settings)?;
    tracing::debug!(path = %settings.display(), files_dir = %loaded.files_dir.display(), "Loaded settings");
    Ok(loaded)
  };

  let main_span = tracing::info_span!("orchestrator");
  let _enter = main_span.enter();

  match command {
    Run { yaml } => {
      tracing::info!("Starting run of {}", yaml.display());

      let mut worker = WorkerCommand::current().map_err(EngineError::WorkerBinary)?;
      for _ in 0..verbose {
        worker = worker.arg("-v");
      }
      let mut engine = Engine::new(load_settings()?).with_worker_command(worker);

      match engine.run(&yaml).await {
        Ok(()) => tracing::info!("Run complete."),
        Err(EngineError::Interrupted(signal)) => {
          tracing::error!("Run interrupted by signal {}", signal);
          drop(_enter);
          drop(_guard);
          std::process::exit(128 + signal);
        }
        Err(e) => return Err(e.into()),
      }
    }
    ListFrameworks => {
      let settings = load_settings()?;
      println!("{}", list_frameworks(&settings, &AdapterRegistry::builtin()));
    }
    ListTests { framework } => {
      let settings = load_settings()?;
      println!("{}", list_tests(&settings, &framework)?);
    }
    Worker => {
      // The failure is already logged for the parent to relay.
      if run_worker(&AdapterRegistry::builtin()).await.is_err() {
        std::process::exit(1);
      }
    }
  }

  Ok(())
}
