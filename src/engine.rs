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

//! The execution engine: validates a run document, archives previous
//! outputs and drives every configured framework, serially in-process or
//! in parallel as one worker process per framework.

use crate::adapter::AdapterContext;
use crate::adapter::AdapterRegistry;
use crate::config::Settings;
use crate::descriptor::ExecutionMode;
use crate::descriptor::Framework;
use crate::descriptor::RunDescriptor;
use crate::directory::DirectoryManager;
use crate::error::AdapterError;
use crate::error::EngineError;
use crate::error::WorkerFailure;
use crate::process_group::WorkerGroup;
use crate::schema;
use crate::worker::WorkerTask;
use nix::sys::signal::Signal;
use serde_json::Value;
use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio::sync::Semaphore;
use tracing::Instrument;
use tracing::Level;

/// Time live workers get to exit after SIGTERM before they are killed.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
  Idle,
  DirectoriesReady,
  ConfigParsed,
  Validated,
  Executing,
  Done,
  Failed,
}

/// How a worker process is launched. Defaults to re-executing the current
/// binary with the hidden `worker` subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
  program: PathBuf,
  args: Vec<String>,
}

impl WorkerCommand {
  pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    WorkerCommand {
      program: program.into(),
      args: args.into_iter().map(Into::into).collect(),
    }
  }

  pub fn current() -> io::Result<Self> {
    Ok(WorkerCommand::new(std::env::current_exe()?, ["worker"]))
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }
}

/// Builds the adapter for one framework and runs its setup.
pub async fn run_framework(registry: &AdapterRegistry, ctx: AdapterContext) -> Result<(), AdapterError> {
  let span = tracing::info_span!("framework", name = %ctx.framework.name());
  async move {
    tracing::info!("Setting up framework");
    let mut adapter = registry.create(ctx)?;
    adapter.setup().await?;
    tracing::info!("Framework finished");
    Ok(())
  }
  .instrument(span)
  .await
}

/// Resolves with the signal number once SIGINT or SIGTERM arrives.
pub fn shutdown_signal() -> io::Result<impl Future<Output = i32>> {
  let mut interrupt = signal(SignalKind::interrupt())?;
  let mut terminate = signal(SignalKind::terminate())?;
  Ok(async move {
    tokio::select! {
      _ = interrupt.recv() => Signal::SIGINT as i32,
      _ = terminate.recv() => Signal::SIGTERM as i32,
    }
  })
}

pub struct Engine {
  settings: Settings,
  registry: AdapterRegistry,
  directories: DirectoryManager,
  worker: Option<WorkerCommand>,
  grace: Duration,
  state: EngineState,
}

impl Engine {
  pub fn new(settings: Settings) -> Self {
    let directories = DirectoryManager::new(&settings);
    Engine {
      settings,
      registry: AdapterRegistry::builtin(),
      directories,
      worker: None,
      grace: DEFAULT_GRACE_PERIOD,
      state: EngineState::Idle,
    }
  }

  /// Replaces the adapters used by serial runs.
  pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
    self.registry = registry;
    self
  }

  pub fn with_worker_command(mut self, worker: WorkerCommand) -> Self {
    self.worker = Some(worker);
    self
  }

  pub fn with_grace_period(mut self, grace: Duration) -> Self {
    self.grace = grace;
    self
  }

  pub fn state(&self) -> EngineState {
    self.state
  }

  fn fail<E: Into<EngineError>>(&mut self, err: E) -> EngineError {
    self.state = EngineState::Failed;
    err.into()
  }

  pub fn setup(&mut self) -> Result<(), EngineError> {
    if let Err(e) = self.directories.setup() {
      return Err(self.fail(e));
    }
    self.state = EngineState::DirectoriesReady;
    Ok(())
  }

  pub fn load(&mut self, path: &Path) -> Result<Value, EngineError> {
    match schema::load_document(path) {
      Ok(document) => {
        self.state = EngineState::ConfigParsed;
        Ok(document)
      }
      Err(e) => Err(self.fail(e)),
    }
  }

  /// Sets up directories, loads `path` and runs it until done or interrupted.
  pub async fn run(&mut self, path: &Path) -> Result<(), EngineError> {
    self.setup()?;
    let document = self.load(path)?;
    self.begin(&document).await
  }

  /// Validates the document, archives previous outputs and executes every
  /// framework. SIGINT and SIGTERM tear the run down.
  pub async fn begin(&mut self, document: &Value) -> Result<(), EngineError> {
    let shutdown = match shutdown_signal() {
      Ok(shutdown) => shutdown,
      Err(e) => return Err(self.fail(EngineError::Signal(e))),
    };
    self.begin_until(document, shutdown).await
  }

  /// Like [`Engine::begin`], but the run is interrupted when `shutdown`
  /// resolves, with the signal number it yields.
  pub async fn begin_until<F>(&mut self, document: &Value, shutdown: F) -> Result<(), EngineError>
  where
    F: Future<Output = i32>,
  {
    let result = self.drive(document, shutdown).await;
    self.state = match result {
      Ok(()) => EngineState::Done,
      Err(_) => EngineState::Failed,
    };
    result
  }

  async fn drive<F>(&mut self, document: &Value, shutdown: F) -> Result<(), EngineError>
  where
    F: Future<Output = i32>,
  {
    let run = schema::parse_run(document)?;
    self.state = EngineState::Validated;

    let archived = self.directories.archive_outputs()?;
    if !archived.is_empty() {
      tracing::info!(count = archived.len(), "Archived previous outputs");
    }

    let mode = run.options.execution_mode();
    tracing::info!(%mode, frameworks = ?run.frameworks.names(), "Executing frameworks");
    self.state = EngineState::Executing;

    match mode {
      ExecutionMode::Serial => {
        tokio::select! {
          result = self.execute_serial(&run) => result,
          sig = shutdown => {
            tracing::error!("signal: {} received, aborting serial run", sig);
            Err(EngineError::Interrupted(sig))
          }
        }
      }
      ExecutionMode::Parallel => self.execute_parallel(&run, shutdown).await,
    }
  }

  fn context(&self, run: &RunDescriptor, framework: &Framework) -> AdapterContext {
    AdapterContext {
      settings: self.settings.clone(),
      framework: framework.clone(),
      environment: run.environment.clone(),
      options: run.options.clone(),
    }
  }

  /// Runs each framework in order, stopping at the first failure.
  async fn execute_serial(&self, run: &RunDescriptor) -> Result<(), EngineError> {
    for framework in run.frameworks.iter() {
      run_framework(&self.registry, self.context(run, framework))
        .await
        .map_err(|source| EngineError::Framework {
          framework: framework.name().to_string(),
          source,
        })?;
    }
    Ok(())
  }

  /// Starts one worker process per framework, at most `worker_limit` at a
  /// time, and waits for all of them. Failures are reported together in
  /// submission order.
  async fn execute_parallel<F>(&self, run: &RunDescriptor, shutdown: F) -> Result<(), EngineError>
  where
    F: Future<Output = i32>,
  {
    let command = match &self.worker {
      Some(command) => command.clone(),
      None => WorkerCommand::current().map_err(EngineError::WorkerBinary)?,
    };
    let limit = self.settings.worker_limit();
    let permits = Arc::new(Semaphore::new(limit));
    let group = WorkerGroup::default();
    let parent_pid = std::process::id();
    tracing::debug!(limit, "Worker pool ready");

    let mut handles = Vec::with_capacity(run.frameworks.len());
    for framework in run.frameworks.iter() {
      let task = WorkerTask {
        parent_pid,
        context: self.context(run, framework),
      };
      let payload = serde_json::to_vec(&task)?;
      let name = framework.name().to_string();
      let span = tracing::info_span!("worker", framework = %name);
      let handle = tokio::spawn(
        run_worker_process(command.clone(), name.clone(), payload, permits.clone(), group.clone())
          .instrument(span),
      );
      handles.push((name, handle));
    }
    let aborts: Vec<_> = handles.iter().map(|(_, handle)| handle.abort_handle()).collect();

    let collect = async move {
      let mut failures = Vec::new();
      for (framework, handle) in handles {
        match handle.await {
          Ok(Ok(())) => {}
          Ok(Err(failure)) => failures.push(failure),
          Err(_) => failures.push(WorkerFailure::Join { framework }),
        }
      }
      failures
    };

    let failures = tokio::select! {
      failures = collect => failures,
      sig = shutdown => {
        tracing::error!("signal: {} received, terminating workers", sig);
        group.terminate(self.grace).await;
        for abort in &aborts {
          abort.abort();
        }
        return Err(EngineError::Interrupted(sig));
      }
    };

    if failures.is_empty() {
      tracing::info!("All frameworks finished");
      return Ok(());
    }
    for failure in &failures {
      tracing::error!(framework = failure.framework(), "{}", failure);
    }
    Err(EngineError::Workers(failures))
  }
}

/// Spawns one worker, hands it its task and waits for it to exit.
async fn run_worker_process(
  command: WorkerCommand,
  framework: String,
  payload: Vec<u8>,
  permits: Arc<Semaphore>,
  group: WorkerGroup,
) -> Result<(), WorkerFailure> {
  let Ok(_permit) = permits.acquire_owned().await else {
    return Err(WorkerFailure::Cancelled { framework });
  };
  if group.is_closed() {
    return Err(WorkerFailure::Cancelled { framework });
  }

  let mut child = Command::new(&command.program)
    .args(&command.args)
    .stdin(Stdio::piped())
    .stdout(Stdio::null())
    .stderr(Stdio::piped())
    .process_group(0)
    .kill_on_drop(true)
    .spawn()
    .map_err(|source| WorkerFailure::Spawn {
      framework: framework.clone(),
      source,
    })?;

  let pid = child.id();
  tracing::debug!(pid, "Spawned worker");
  if let Some(pid) = pid {
    if !group.register(pid, &framework) {
      if let Err(e) = child.start_kill() {
        tracing::warn!(error = %e, "Failed to kill late worker");
      }
      let _ = child.wait().await;
      return Err(WorkerFailure::Cancelled { framework });
    }
  }

  let relay = child
    .stderr
    .take()
    .map(|stderr| tokio::spawn(relay_worker_log(stderr).in_current_span()));

  if let Some(mut stdin) = child.stdin.take() {
    // A worker may exit before reading its task; its exit status says why.
    if let Err(e) = stdin.write_all(&payload).await {
      tracing::warn!(error = %e, "Failed to send task to worker");
    }
  }

  let status = child.wait().await;
  if let Some(pid) = pid {
    group.unregister(pid);
  }
  if let Some(relay) = relay {
    match relay.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => tracing::warn!(error = %e, "Failed to read worker log"),
      Err(e) => tracing::warn!(error = %e, "Worker log relay failed"),
    }
  }

  let status = status.map_err(|source| WorkerFailure::Wait {
    framework: framework.clone(),
    source,
  })?;
  if status.success() {
    return Ok(());
  }
  match (status.code(), status.signal()) {
    (Some(code), _) => Err(WorkerFailure::Exited { framework, code }),
    (None, Some(signal)) => Err(WorkerFailure::Killed { framework, signal }),
    (None, None) => Err(WorkerFailure::Exited { framework, code: -1 }),
  }
}

/// Splits a worker log line into its level and message.
fn split_level(line: &str) -> Option<(Level, &str)> {
  let trimmed = line.trim_start();
  let (word, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
  let level = match word {
    "ERROR" => Level::ERROR,
    "WARN" => Level::WARN,
    "INFO" => Level::INFO,
    "DEBUG" => Level::DEBUG,
    "TRACE" => Level::TRACE,
    _ => return None,
  };
  Some((level, rest))
}

fn emit(level: Level, message: &str) {
  if level == Level::ERROR {
    tracing::error!("{}", message);
  } else if level == Level::WARN {
    tracing::warn!("{}", message);
  } else if level == Level::INFO {
    tracing::info!("{}", message);
  } else if level == Level::DEBUG {
    tracing::debug!("{}", message);
  } else {
    tracing::trace!("{}", message);
  }
}

/// Re-logs a worker's stderr at the level each line was emitted with.
/// Lines without a level (error chains, panics) keep the previous level.
async fn relay_worker_log<R: AsyncRead + Unpin>(stream: R) -> io::Result<()> {
  let mut lines = BufReader::new(stream).lines();
  let mut level = Level::INFO;

  while let Some(line) = lines.next_line().await? {
    match split_level(&line) {
      Some((found, message)) => {
        level = found;
        emit(level, message);
      }
      None => emit(level, &line),
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::adapter::FrameworkAdapter;
  use crate::adapter::SetupFuture;
  use crate::command::Shell;
  use crate::command::exited_within;
  use crate::error::ConfigError;
  use serde_json::json;
  use std::fs;
  use std::sync::Mutex;
  use tempfile::TempDir;
  use tempfile::tempdir;
  use tokio::time::Instant;

  struct Recorded {
    fail: bool,
  }

  impl FrameworkAdapter for Recorded {
    fn setup(&mut self) -> SetupFuture<'_> {
      let fail = self.fail;
      Box::pin(async move {
        if fail {
          Err(AdapterError::InvalidTests(vec!["broken.yaml".to_string()]))
        } else {
          Ok(())
        }
      })
    }
  }

  /// A registry whose adapters record their construction order.
  fn recording_registry(names: &[&str], failing: &str) -> (AdapterRegistry, Arc<Mutex<Vec<String>>>) {
    let created = Arc::new(Mutex::new(Vec::new()));
    let mut registry = AdapterRegistry::default();
    for name in names {
      let created = created.clone();
      let fail = *name == failing;
      registry.register(name, move |ctx| {
        created.lock().unwrap().push(ctx.framework.name().to_string());
        Ok(Box::new(Recorded { fail }))
      });
    }
    (registry, created)
  }

  fn engine(temp: &TempDir) -> Engine {
    let settings = Settings {
      files_dir: temp.path().to_path_buf(),
      max_workers: Some(2),
      ..Settings::default()
    };
    let mut engine = Engine::new(settings);
    engine.setup().unwrap();
    engine
  }

  fn document(mode: &str, frameworks: &[&str]) -> Value {
    let execute: serde_json::Map<String, Value> = frameworks
      .iter()
      .map(|name| (name.to_string(), json!({"tests": []})))
      .collect();
    json!({
      "Execute": execute,
      "Environment": {},
      "Options": {"execution_mode": mode}
    })
  }

  #[tokio::test]
  async fn serial_runs_in_order_and_stops_at_first_failure() {
    let temp = tempdir().unwrap();
    let (registry, created) = recording_registry(&["first", "second", "third"], "second");
    let mut engine = engine(&temp).with_registry(registry);

    let err = engine
      .begin_until(&document("serial", &["first", "second", "third"]), std::future::pending())
      .await
      .unwrap_err();

    assert_eq!(*created.lock().unwrap(), vec!["first", "second"]);
    assert!(matches!(err, EngineError::Framework { ref framework, .. } if framework == "second"));
    assert_eq!(engine.state(), EngineState::Failed);
  }

  #[tokio::test]
  async fn serial_success_archives_previous_outputs() {
    let temp = tempdir().unwrap();
    let (registry, created) = recording_registry(&["first", "second"], "");
    let mut engine = engine(&temp).with_registry(registry);
    fs::write(temp.path().join("outputs/results.json"), "{}").unwrap();

    engine
      .begin_until(&document("serial", &["first", "second"]), std::future::pending())
      .await
      .unwrap();

    assert_eq!(*created.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(engine.state(), EngineState::Done);
    assert!(!temp.path().join("outputs/results.json").exists());
    assert!(temp.path().join("outputs/archive-hrb.log").exists());
  }

  #[tokio::test]
  async fn missing_execute_fails_before_any_adapter() {
    let temp = tempdir().unwrap();
    let (registry, created) = recording_registry(&["first"], "");
    let mut engine = engine(&temp).with_registry(registry);
    fs::write(temp.path().join("outputs/results.json"), "{}").unwrap();

    let err = engine
      .begin_until(
        &json!({"Environment": {}, "Options": {"execution_mode": "serial"}}),
        std::future::pending(),
      )
      .await
      .unwrap_err();

    assert!(matches!(err, EngineError::Config(ConfigError::Schema(_))));
    assert!(created.lock().unwrap().is_empty());
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(temp.path().join("outputs/results.json").exists());
  }

  #[tokio::test]
  async fn parallel_reports_the_failing_worker() {
    let temp = tempdir().unwrap();
    let worker = WorkerCommand::new(
      "/bin/sh",
      ["-c", r#"grep -q '"name":"broken"' && exit 3; exit 0"#],
    );
    let mut engine = engine(&temp).with_worker_command(worker);

    let err = engine
      .begin_until(&document("parallel", &["alpha", "broken", "gamma"]), std::future::pending())
      .await
      .unwrap_err();

    match err {
      EngineError::Workers(failures) => {
        assert_eq!(failures.len(), 1);
        assert!(matches!(
          &failures[0],
          WorkerFailure::Exited { framework, code: 3 } if framework == "broken"
        ));
      }
      other => panic!("expected worker failures, got {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
  }

  #[tokio::test]
  async fn parallel_succeeds_when_every_worker_does() {
    let temp = tempdir().unwrap();
    let worker = WorkerCommand::new("/bin/sh", ["-c", "cat > /dev/null"]);
    let mut engine = engine(&temp).with_worker_command(worker);

    engine
      .begin_until(&document("parallel", &["alpha", "beta", "gamma"]), std::future::pending())
      .await
      .unwrap();

    assert_eq!(engine.state(), EngineState::Done);
  }

  /// Shell snippet that starts a background `sleep` and records its pid in `dir`.
  fn background_sleep(dir: &Path) -> String {
    let dir = dir.display();
    format!("sleep 30 & echo $! > {dir}/$$.tmp && mv {dir}/$$.tmp {dir}/$$.pid; wait")
  }

  fn recorded_pids(dir: &Path) -> Vec<i32> {
    fs::read_dir(dir)
      .unwrap()
      .map(|entry| entry.unwrap().path())
      .filter(|path| path.extension().is_some_and(|ext| ext == "pid"))
      .map(|path| fs::read_to_string(path).unwrap().trim().parse().unwrap())
      .collect()
  }

  /// Yields SIGTERM once `count` background sleeps have been recorded.
  async fn terminate_after(dir: PathBuf, count: usize) -> i32 {
    while recorded_pids(&dir).len() < count {
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Signal::SIGTERM as i32
  }

  #[tokio::test]
  async fn interrupt_tears_down_parallel_worker_groups() {
    let temp = tempdir().unwrap();
    let pids = tempdir().unwrap();
    let script = format!("cat > /dev/null; {}", background_sleep(pids.path()));
    let worker = WorkerCommand::new("/bin/sh", ["-c".to_string(), script]);
    let mut engine = engine(&temp)
      .with_worker_command(worker)
      .with_grace_period(Duration::from_secs(2));

    let started = Instant::now();
    let err = engine
      .begin_until(
        &document("parallel", &["alpha", "beta"]),
        terminate_after(pids.path().to_path_buf(), 2),
      )
      .await
      .unwrap_err();

    assert!(matches!(err, EngineError::Interrupted(15)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(engine.state(), EngineState::Failed);
    // The sleeps are grandchildren; only a process group signal reaches them.
    for pid in recorded_pids(pids.path()) {
      assert!(exited_within(pid, Duration::from_secs(5)).await, "sleep {pid} survived");
    }
  }

  struct Sleeper {
    shell: Shell,
    command: String,
  }

  impl FrameworkAdapter for Sleeper {
    fn setup(&mut self) -> SetupFuture<'_> {
      Box::pin(async move {
        self.shell.exec(&self.command).await?;
        Ok(())
      })
    }
  }

  #[tokio::test]
  async fn interrupt_kills_serial_framework_commands() {
    let temp = tempdir().unwrap();
    let pids = tempdir().unwrap();
    let command = background_sleep(pids.path());
    let mut registry = AdapterRegistry::default();
    registry.register("sleeper", move |_| {
      Ok(Box::new(Sleeper {
        shell: Shell::new(PathBuf::from("/nonexistent/venv")),
        command: command.clone(),
      }))
    });
    let mut engine = engine(&temp).with_registry(registry);

    let err = engine
      .begin_until(
        &document("serial", &["sleeper"]),
        terminate_after(pids.path().to_path_buf(), 1),
      )
      .await
      .unwrap_err();

    assert!(matches!(err, EngineError::Interrupted(15)));
    let recorded = recorded_pids(pids.path());
    assert_eq!(recorded.len(), 1);
    assert!(exited_within(recorded[0], Duration::from_secs(5)).await);
  }

  #[test]
  fn splits_worker_log_levels() {
    assert_eq!(
      split_level(" INFO framework{name=shaker}: Setting up framework"),
      Some((Level::INFO, "framework{name=shaker}: Setting up framework"))
    );
    assert_eq!(split_level("ERROR boom"), Some((Level::ERROR, "boom")));
    assert_eq!(split_level("Caused by:"), None);
    assert_eq!(split_level("3 items"), None);
  }
}
