#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use flexi_logger::Logger;

use pyjail::{ExecutionResult, GuestProgram, SandboxPolicy, Supervisor};

static INIT: Once = Once::new();

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("pyjail=debug,info")
      .unwrap()
      .start()
      .unwrap();
  });
}

/// Supervisor driving the binary built for this crate
pub fn supervisor(policy: SandboxPolicy) -> Supervisor {
  Supervisor::new(policy)
    .unwrap()
    .worker(env!("CARGO_BIN_EXE_pyjail"))
}

pub fn run(policy: SandboxPolicy, code: &str, tests: &[&str], timeout: f64) -> ExecutionResult {
  setup();
  let tests = tests.iter().map(|test| test.to_string()).collect();
  supervisor(policy).run(
    GuestProgram::new(code),
    tests,
    Duration::from_secs_f64(timeout),
  )
}
