use std::env;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, error, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tempfile::{Builder, TempDir};
use wait_timeout::ChildExt;

use crate::channel::ResultReceiver;
use crate::error::PyJailError;
use crate::policy::SandboxPolicy;
use crate::result::{ExecutionResult, ExitIndicator};
use crate::worker::{GuestProgram, WorkerRequest};

/// Environment variable pointing at the worker binary
pub const WORKER_ENV: &str = "PYJAIL_WORKER";

/// Subcommand the worker binary is started with
pub const WORKER_COMMAND: &str = "worker";

/// Spawn isolated workers and wait for their single result
#[derive(Debug, Clone)]
pub struct Supervisor {
  policy: SandboxPolicy,
  worker: PathBuf,
  grace: Duration,
  scratch_dir: PathBuf,
  debug: bool,
}

/// Locate the worker binary, `PYJAIL_WORKER` first
pub fn default_worker() -> Result<PathBuf, PyJailError> {
  match env::var(WORKER_ENV) {
    Ok(path) => Ok(PathBuf::from(path)),
    Err(_) => Ok(env::current_exe()?),
  }
}

fn exit_indicator(status: ExitStatus) -> ExitIndicator {
  let signal = status
    .signal()
    .and_then(|signal| Signal::try_from(signal).ok());
  ExitIndicator::new(status.code(), signal)
}

/// 杀死子进程，等待一小段时间回收
fn terminate(child: &mut Child, grace: Duration) {
  let pid = Pid::from_raw(child.id() as i32);
  if let Err(err) = kill(pid, Signal::SIGKILL) {
    warn!("Kill worker #{}. fails: {}", pid, err);
  }
  match child.wait_timeout(grace) {
    Ok(Some(status)) => {
      debug!("Worker #{}. is reaped ({})", pid, status);
    }
    Ok(None) => {
      error!("Worker #{}. is still alive after {:?}", pid, grace);
    }
    Err(err) => {
      error!("Wait worker #{}. fails: {}", pid, err);
    }
  }
}

impl Supervisor {
  pub fn new(policy: SandboxPolicy) -> Result<Self, PyJailError> {
    Ok(Supervisor {
      policy,
      worker: default_worker()?,
      grace: Duration::from_secs(1),
      scratch_dir: env::temp_dir(),
      debug: false,
    })
  }

  /// Set the worker binary
  pub fn worker<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.worker = path.into();
    self
  }

  /// Set how long a killed worker may take to go away
  pub fn grace(mut self, value: Duration) -> Self {
    self.grace = value;
    self
  }

  /// Set where per-run scratch directories are created
  pub fn scratch_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.scratch_dir = path.into();
    self
  }

  /// Keep scratch directories after the run
  pub fn debug(mut self) -> Self {
    self.debug = true;
    self
  }

  pub fn policy(&self) -> &SandboxPolicy {
    &self.policy
  }

  /// Run a program and its tests in a fresh worker, never fails
  pub fn run(&self, program: GuestProgram, tests: Vec<String>, timeout: Duration) -> ExecutionResult {
    let scratch = match Builder::new().prefix("pyjail-").tempdir_in(&self.scratch_dir) {
      Ok(scratch) => scratch,
      Err(err) => {
        error!("Create scratch directory fails: {}", err);
        return ExecutionResult::crashed(
          format!("Create scratch directory fails: {}", err),
          ExitIndicator::default(),
        );
      }
    };

    let request = WorkerRequest {
      program,
      tests,
      policy: self.policy.clone(),
      jail_parent: scratch.path().to_path_buf(),
    };
    let result = match self.supervise(&request, scratch.path(), timeout) {
      Ok(result) => result,
      Err(err) => {
        error!("Supervise worker fails: {}", err);
        ExecutionResult::crashed(err.to_string(), ExitIndicator::default())
      }
    };

    self.close(scratch);
    result
  }

  fn spawn(&self, cwd: &Path) -> Result<Child, PyJailError> {
    let mut command = Command::new(&self.worker);
    command
      .arg(WORKER_COMMAND)
      .current_dir(cwd)
      .env_clear()
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit());
    if let Ok(path) = env::var("PATH") {
      command.env("PATH", path);
    }
    if self.debug {
      command.arg("--verbose");
    }

    command
      .spawn()
      .map_err(|err| PyJailError::spawn(format!("{} ({})", err, self.worker.to_string_lossy())))
  }

  fn supervise(
    &self,
    request: &WorkerRequest,
    cwd: &Path,
    timeout: Duration,
  ) -> Result<ExecutionResult, PyJailError> {
    let mut child = self.spawn(cwd)?;
    info!("Start running worker (pid = {})", child.id());

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| PyJailError::channel("Worker stdout is not piped"))?;
    let receiver = ResultReceiver::spawn(stdout);

    if let Some(mut stdin) = child.stdin.take() {
      let payload = serde_json::to_vec(request)?;
      // 子进程可能已经退出
      if let Err(err) = stdin.write_all(&payload) {
        warn!("Send request to worker fails: {}", err);
      }
    }

    let status = match child.wait_timeout(timeout)? {
      Some(status) => status,
      None => {
        info!(
          "Worker #{}. exceeds the time limit {:?}",
          child.id(),
          timeout
        );
        terminate(&mut child, self.grace);
        return Ok(ExecutionResult::TimedOut);
      }
    };
    let exit = exit_indicator(status);
    info!("Worker exited with {}", status);

    match receiver.recv() {
      Ok(result) => Ok(result),
      Err(err) => {
        warn!("No result from worker: {}", err);
        Ok(ExecutionResult::crashed(
          "No result from the sandbox",
          exit,
        ))
      }
    }
  }

  fn close(&self, scratch: TempDir) {
    let path = scratch.keep();
    if self.debug {
      debug!("Persist scratch directory: {}", path.to_string_lossy());
      return;
    }
    match remove_dir_all::remove_dir_all(&path) {
      Ok(_) => {
        debug!("Remove scratch directory: {}", path.to_string_lossy());
      }
      Err(err) => {
        error!(
          "Fails removing scratch directory: {} ({})",
          path.to_string_lossy(),
          err
        );
      }
    }
  }
}

/// Run `code` and its `tests` with the base policy
pub fn run_safely(code: &str, tests: &[String], timeout_seconds: f64) -> ExecutionResult {
  let supervisor = match Supervisor::new(SandboxPolicy::base()) {
    Ok(supervisor) => supervisor,
    Err(err) => {
      return ExecutionResult::crashed(err.to_string(), ExitIndicator::default());
    }
  };
  let timeout = Duration::try_from_secs_f64(timeout_seconds).unwrap_or(Duration::ZERO);
  supervisor.run(GuestProgram::new(code), tests.to_vec(), timeout)
}
