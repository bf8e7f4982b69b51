use nix::libc::STDOUT_FILENO;
use nix::sys::signal::Signal;
use nix::unistd::isatty;
use serde::{Deserialize, Serialize};

use crate::guard::GuardViolation;

/// A test snippet that raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
  pub test: String,
  pub error: String,
}

/// How the worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitIndicator {
  status: Option<i32>,
  signal: Option<Signal>,
}

/// The single outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionResult {
  Ok {
    failures: Vec<Failure>,
  },
  GuardRejected(GuardViolation),
  RuntimeError {
    error: String,
    traceback: Option<String>,
  },
  TimedOut,
  Crashed {
    reason: String,
    #[serde(skip)]
    exit: ExitIndicator,
  },
}

/// Flat report shape handed to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failures: Option<Vec<Failure>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub traceback: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub exitcode: Option<i32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub signal: Option<String>,
}

impl ExitIndicator {
  pub fn new(status: Option<i32>, signal: Option<Signal>) -> Self {
    ExitIndicator { status, signal }
  }

  pub fn status(&self) -> Option<i32> {
    self.status
  }

  pub fn signal(&self) -> Option<Signal> {
    self.signal
  }
}

impl ExecutionResult {
  pub fn runtime_error<MS: Into<String>>(error: MS, traceback: Option<String>) -> Self {
    ExecutionResult::RuntimeError {
      error: error.into(),
      traceback,
    }
  }

  pub fn crashed<MS: Into<String>>(reason: MS, exit: ExitIndicator) -> Self {
    ExecutionResult::Crashed {
      reason: reason.into(),
      exit,
    }
  }

  /// True only when the program and its top level ran to the end
  pub fn is_ok(&self) -> bool {
    matches!(self, ExecutionResult::Ok { .. })
  }

  pub fn failures(&self) -> Option<&Vec<Failure>> {
    match self {
      ExecutionResult::Ok { failures } => Some(failures),
      _ => None,
    }
  }

  pub fn report(&self) -> RunReport {
    let mut report = RunReport {
      ok: self.is_ok(),
      failures: None,
      error: None,
      timeout: None,
      traceback: None,
      exitcode: None,
      signal: None,
    };
    match self {
      ExecutionResult::Ok { failures } => {
        report.failures = Some(failures.clone());
      }
      ExecutionResult::GuardRejected(violation) => {
        report.error = Some(violation.reason().to_string());
      }
      ExecutionResult::RuntimeError { error, traceback } => {
        report.error = Some(error.clone());
        report.traceback = traceback.clone();
      }
      ExecutionResult::TimedOut => {
        report.error = Some("Execution timed out".to_string());
        report.timeout = Some(true);
      }
      ExecutionResult::Crashed { reason, exit } => {
        report.error = Some(reason.clone());
        report.exitcode = exit.status();
        report.signal = exit.signal().map(|signal| signal.to_string());
      }
    }
    report
  }

  /// Report to stdout, human readable on a terminal and json otherwise
  pub fn print(&self) {
    let is_tty = isatty(STDOUT_FILENO).unwrap_or(false);
    if is_tty {
      self.print_human();
    } else {
      self.print_json();
    }
  }

  pub fn print_human(&self) {
    println!();
    match self {
      ExecutionResult::Ok { failures } => {
        if failures.is_empty() {
          println!("\x1b[1mStatus\x1b[22m     \x1b[92m✓\x1b[39m all tests passed");
        } else {
          println!(
            "\x1b[1mStatus\x1b[22m     \x1b[91m×\x1b[39m {} test(s) failed",
            failures.len()
          );
          for failure in failures.iter() {
            println!();
            println!("\x1b[1mTest\x1b[22m       {}", failure.test);
            println!("\x1b[1mError\x1b[22m      \x1b[91m{}\x1b[39m", failure.error);
          }
        }
      }
      ExecutionResult::GuardRejected(violation) => {
        println!("\x1b[1mStatus\x1b[22m     \x1b[91mRejected\x1b[39m");
        println!("\x1b[1mReason\x1b[22m     {}", violation.reason());
      }
      ExecutionResult::RuntimeError { error, traceback } => {
        println!("\x1b[1mStatus\x1b[22m     \x1b[91mRuntime Error\x1b[39m");
        println!("\x1b[1mError\x1b[22m      {}", error);
        if let Some(traceback) = traceback {
          println!();
          println!("{}", traceback.trim_end());
        }
      }
      ExecutionResult::TimedOut => {
        println!("\x1b[1mStatus\x1b[22m     \x1b[91mTime Limit Exceeded\x1b[39m");
      }
      ExecutionResult::Crashed { reason, exit } => {
        let status = exit
          .status()
          .map_or_else(|| "\x1b[91m×\x1b[39m".to_string(), |v| v.to_string());
        let signal = exit
          .signal()
          .map_or_else(|| "\x1b[92m✓\x1b[39m".to_string(), |v| format!("\x1b[91m{}\x1b[39m", v));
        println!("\x1b[1mStatus\x1b[22m     \x1b[91mCrashed\x1b[39m");
        println!("\x1b[1mReason\x1b[22m     {}", reason);
        println!("\x1b[1mExit\x1b[22m       {}", status);
        println!("\x1b[1mSignal\x1b[22m     {}", signal);
      }
    }
    println!();
  }

  pub fn print_json(&self) {
    match serde_json::to_string_pretty(&self.report()) {
      Ok(text) => println!("{}", text),
      Err(err) => println!("{{\n  \"ok\": false,\n  \"error\": \"{}\"\n}}", err),
    }
  }
}
