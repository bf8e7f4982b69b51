use log::{debug, info};
use rustpython_vm::builtins::PyBaseExceptionRef;
use rustpython_vm::compiler::Mode;
use rustpython_vm::{AsObject, PyResult, VirtualMachine};

use crate::capability::CapabilityEnvironment;
use crate::result::Failure;

/// `ValueError: message`, or only the type name when there is no message
pub fn describe_exception(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> String {
  let name = exc.as_object().class().name().to_string();
  let message = exc
    .as_object()
    .str(vm)
    .map(|text| text.as_str().to_owned())
    .unwrap_or_default();
  if message.is_empty() {
    name
  } else {
    format!("{}: {}", name, message)
  }
}

/// Full traceback, best effort
pub fn format_traceback(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> Option<String> {
  let mut text = String::new();
  vm.write_exception(&mut text, exc).ok()?;
  Some(text)
}

/// Compile and run source against the environment
pub fn run_source(
  vm: &VirtualMachine,
  env: &CapabilityEnvironment,
  source: &str,
  filename: &str,
) -> PyResult<()> {
  let code = vm
    .compile(source, Mode::Exec, filename.to_owned())
    .map_err(|err| {
      vm.new_exception_msg(vm.ctx.exceptions.syntax_error.to_owned(), err.to_string())
    })?;
  vm.run_code_obj(code, env.scope())?;
  Ok(())
}

/// Run every snippet in order against the shared environment
pub fn run_tests(vm: &VirtualMachine, env: &CapabilityEnvironment, tests: &[String]) -> Vec<Failure> {
  let mut failures = vec![];
  for (index, test) in tests.iter().enumerate() {
    match run_source(vm, env, test, "<test>") {
      Ok(_) => {
        debug!("Test #{}. passed", index + 1);
      }
      Err(exc) => {
        let error = describe_exception(vm, &exc);
        info!("Test #{}. failed: {}", index + 1, error);
        failures.push(Failure {
          test: test.clone(),
          error,
        });
      }
    }
  }
  failures
}
