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

//! # Harbinger
//!
//! `harbinger` orchestrates data plane testing frameworks. It reads a YAML
//! run configuration, provisions the cloud resources each framework needs,
//! writes the framework's native configuration and runs it, serially or with
//! one worker process per framework.
//!
//! This crate contains the library logic behind the `harbinger` CLI.
//!
//! ## Core Modules
//!
//! * [`resolver`]: Resolves a setting through the five-tier precedence chain
//!   (settings group, `Options`, `options_override`, `extras`, `required`).
//! * [`directory`]: Creates the `inputs`/`outputs` directories and archives
//!   the outputs of previous runs.
//! * [`descriptor`]: The `Environment`, framework set and `Options` of a run.
//! * [`schema`]: Loads the YAML run document and validates its structure.
//! * [`engine`]: Drives a run through serial or parallel execution, including
//!   worker process teardown on interrupt.
//! * [`adapter`]: The adapter registry and the `shaker` and `yardstick` adapters.
//! * [`worker`]: Entry point of a parallel worker process.
//! * [`process_group`]: Tracking and signalling of worker process groups.
//! * [`command`]: Runs shell commands inside a framework's virtualenv.
//! * [`provision`]: Image and flavor provisioning through the `openstack` CLI.
//! * [`config`]: The `Settings` loaded at startup.
//! * [`cli`]: Defines the `clap`-based command-line interface.
//! * [`listing`]: The `list-frameworks` and `list-tests` tables.
//! * [`error`]: Defines the custom error types for the library.
//! * [`logging`]: Provides the `setup_tracing` utility.

pub mod adapter;
pub mod cli;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod directory;
pub mod engine;
pub mod error;
pub mod listing;
pub mod logging;
pub mod process_group;
pub mod provision;
pub mod resolver;
pub mod schema;
pub mod table;
pub mod worker;
