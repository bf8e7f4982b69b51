//! Worker side of a run.
//!
//! The worker is a fresh process started by the supervisor. It receives a
//! [`WorkerRequest`], guards the program, builds the jail and the capability
//! environment, runs the program and its tests, and produces exactly one
//! [`ExecutionResult`].

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use nix::sys::resource::{setrlimit, Resource};
use rustpython_vm::builtins::PyBaseExceptionRef;
use rustpython_vm::{Interpreter, Settings, VirtualMachine};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityEnvironment;
use crate::guard::{self, GuardError};
use crate::harness::{describe_exception, format_traceback, run_source, run_tests};
use crate::jail::{SandboxJail, WorkdirGuard};
use crate::policy::SandboxPolicy;
use crate::result::ExecutionResult;

/// Max size of a file written by the guest, 256 MB
const FILE_SIZE_LIMIT: u64 = 256 * 1024 * 1024;

/// Untrusted source submitted for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestProgram {
  source: String,
  filename: String,
}

/// Everything a worker needs, sent by the supervisor over stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
  pub program: GuestProgram,
  pub tests: Vec<String>,
  pub policy: SandboxPolicy,
  pub jail_parent: PathBuf,
}

impl GuestProgram {
  pub fn new<S: Into<String>>(source: S) -> Self {
    GuestProgram {
      source: source.into(),
      filename: "<student>".to_string(),
    }
  }

  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }
}

/// 限制写入文件的大小
fn set_resource_limit() {
  if let Err(err) = setrlimit(Resource::RLIMIT_FSIZE, FILE_SIZE_LIMIT, FILE_SIZE_LIMIT) {
    error!("Set file size limit fails: {}", err);
  }
}

fn runtime_error(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> ExecutionResult {
  ExecutionResult::runtime_error(describe_exception(vm, exc), format_traceback(vm, exc))
}

fn run_in_vm(
  vm: &VirtualMachine,
  request: &WorkerRequest,
  jail: Arc<SandboxJail>,
) -> ExecutionResult {
  let env = match CapabilityEnvironment::build(vm, &request.policy, jail.clone()) {
    Ok(env) => env,
    Err(exc) => return runtime_error(vm, &exc),
  };

  let _workdir = match WorkdirGuard::enter(jail.root()) {
    Ok(guard) => guard,
    Err(err) => {
      return ExecutionResult::runtime_error(format!("Enter sandbox jail fails: {}", err), None)
    }
  };

  info!("Start running guest program");
  if let Err(exc) = run_source(vm, &env, request.program.source(), request.program.filename()) {
    let result = runtime_error(vm, &exc);
    info!("Guest program raised, tests are skipped");
    return result;
  }

  info!("Start running {} test(s)", request.tests.len());
  let failures = run_tests(vm, &env, &request.tests);
  ExecutionResult::Ok { failures }
}

/// Run one request to completion inside the current process
pub fn execute(request: WorkerRequest) -> ExecutionResult {
  match guard::check(request.program.source(), &request.policy) {
    Ok(_) => {}
    Err(GuardError::Violation(violation)) => {
      info!("Guest program rejected: {}", violation);
      return ExecutionResult::GuardRejected(violation);
    }
    Err(err @ GuardError::Syntax(_)) => {
      return ExecutionResult::runtime_error(err.to_string(), None);
    }
  }

  set_resource_limit();

  let jail = match SandboxJail::create_in(&request.jail_parent) {
    Ok(jail) => Arc::new(jail),
    Err(err) => {
      return ExecutionResult::runtime_error(format!("Create sandbox jail fails: {}", err), None)
    }
  };

  let mut settings = Settings::default();
  settings.import_site = false;
  let interpreter = Interpreter::with_init(settings, |vm| {
    vm.add_native_modules(rustpython_stdlib::get_module_inits());
  });
  let result = interpreter.enter(|vm| run_in_vm(vm, &request, jail.clone()));

  for record in jail.open_log() {
    info!(
      "Guest opened {} ({})",
      record.path().to_string_lossy(),
      record.mode()
    );
  }
  jail.close();

  result
}
