//! Capability environment.
//!
//! The guest only ever sees the names listed in its [`SandboxPolicy`]. A
//! fresh mapping is built from the policy and installed as the guest's
//! `__builtins__`. The interpreter resolves builtins of every frame through
//! its own `builtins` module, so that namespace carries the same restricted
//! contents while guest code runs. Native code that needs the ambient
//! builtins, such as the import machinery of an allowed module or the real
//! `open`, runs with the module widened back and narrowed again on return.
//!
//! `__import__` is replaced with a hook that enforces the allowed import
//! roots, and `open`, when exposed at all, is the jail's guarded open.

use std::sync::Arc;

use log::{debug, info, warn};
use rustpython_vm::builtins::{PyBaseExceptionRef, PyDictRef, PyStrRef, PyType};
use rustpython_vm::function::FuncArgs;
use rustpython_vm::scope::Scope;
use rustpython_vm::{AsObject, Py, PyObjectRef, PyResult, VirtualMachine};

use crate::jail::{JailError, SandboxJail};
use crate::policy::SandboxPolicy;

/// Name of the jail root constant visible to the guest
pub const JAIL_ROOT: &str = "JAIL_ROOT";

const IMPORT: &str = "__import__";
const OPEN: &str = "open";

/// Globals and locals shared by the guest program and its tests
pub struct CapabilityEnvironment {
  globals: PyDictRef,
}

/// The interpreter's `builtins` namespace and the two contents it switches
/// between
#[derive(Clone)]
struct BuiltinsScope {
  namespace: PyObjectRef,
  ambient: PyObjectRef,
  restricted: PyObjectRef,
}

impl BuiltinsScope {
  fn install(&self, vm: &VirtualMachine, contents: &PyObjectRef) -> PyResult<()> {
    vm.call_method(&self.namespace, "clear", ())?;
    vm.call_method(&self.namespace, "update", (contents.clone(),))?;
    Ok(())
  }

  fn narrow(&self, vm: &VirtualMachine) -> PyResult<()> {
    self.install(vm, &self.restricted)
  }

  /// Run trusted native code against the ambient builtins
  fn widened<F: FnOnce() -> PyResult>(&self, vm: &VirtualMachine, f: F) -> PyResult {
    self.install(vm, &self.ambient)?;
    let result = f();
    self.narrow(vm)?;
    result
  }
}

impl CapabilityEnvironment {
  /// Narrow the interpreter down to the policy and return fresh globals
  pub fn build(
    vm: &VirtualMachine,
    policy: &SandboxPolicy,
    jail: Arc<SandboxJail>,
  ) -> PyResult<Self> {
    let namespace = vm
      .builtins
      .as_object()
      .dict()
      .ok_or_else(|| vm.new_runtime_error("builtins module has no namespace".to_owned()))?;

    let ambient_import = namespace
      .get_item_opt(IMPORT, vm)?
      .ok_or_else(|| vm.new_runtime_error("builtin __import__ is missing".to_owned()))?;
    let ambient_open = namespace.get_item_opt(OPEN, vm)?;

    let restricted = vm.ctx.new_dict();
    for name in policy.builtins() {
      match namespace.get_item_opt(name, vm)? {
        Some(value) => restricted.set_item(name, value, vm)?,
        None => warn!("Builtin {} is not provided by the interpreter", name),
      }
    }

    let scope = BuiltinsScope {
      ambient: vm.call_method(namespace.as_object(), "copy", ())?,
      namespace: namespace.into(),
      restricted: restricted.clone().into(),
    };

    restricted.set_item(
      IMPORT,
      restricted_import(vm, policy, scope.clone(), ambient_import),
      vm,
    )?;
    if policy.allow_filesystem() {
      match ambient_open {
        Some(open) => restricted.set_item(
          OPEN,
          guarded_open(vm, jail.clone(), scope.clone(), open),
          vm,
        )?,
        None => warn!("Builtin open is not provided by the interpreter"),
      }
    }

    scope.narrow(vm)?;
    debug!("Capability environment is ready");

    let globals = vm.ctx.new_dict();
    globals.set_item("__builtins__", restricted.into(), vm)?;
    globals.set_item("__name__", vm.new_pyobj("__main__"), vm)?;
    globals.set_item(
      JAIL_ROOT,
      vm.new_pyobj(jail.root().to_string_lossy().to_string()),
      vm,
    )?;

    Ok(CapabilityEnvironment { globals })
  }

  pub fn globals(&self) -> &PyDictRef {
    &self.globals
  }

  /// The same mapping is used as globals and locals
  pub fn scope(&self) -> Scope {
    Scope::new(None, self.globals.clone())
  }
}

fn new_exception(
  vm: &VirtualMachine,
  kind: &'static Py<PyType>,
  msg: String,
) -> PyBaseExceptionRef {
  vm.new_exception_msg(kind.to_owned(), msg)
}

/// Positional argument or keyword argument
fn argument<'a>(args: &'a FuncArgs, index: usize, key: &str) -> Option<&'a PyObjectRef> {
  args.args.get(index).or_else(|| args.kwargs.get(key))
}

fn string_argument(
  vm: &VirtualMachine,
  args: &FuncArgs,
  index: usize,
  key: &str,
) -> PyResult<Option<String>> {
  match argument(args, index, key) {
    Some(value) => {
      let value = value.clone().try_into_value::<PyStrRef>(vm).map_err(|_| {
        new_exception(
          vm,
          vm.ctx.exceptions.type_error,
          format!("argument '{}' must be a string", key),
        )
      })?;
      Ok(Some(value.as_str().to_owned()))
    }
    None => Ok(None),
  }
}

fn restricted_import(
  vm: &VirtualMachine,
  policy: &SandboxPolicy,
  scope: BuiltinsScope,
  ambient: PyObjectRef,
) -> PyObjectRef {
  let policy = policy.clone();
  vm.new_function(IMPORT, move |args: FuncArgs, vm: &VirtualMachine| -> PyResult {
    let name = string_argument(vm, &args, 0, "name")?.unwrap_or_default();
    let level = match argument(&args, 4, "level") {
      Some(level) => level.clone().try_into_value::<i32>(vm)?,
      None => 0,
    };

    if level > 0 || !policy.is_import_allowed(&name) {
      info!("Deny import of module '{}' (level {})", name, level);
      return Err(new_exception(
        vm,
        vm.ctx.exceptions.import_error,
        format!("Import of module '{}' is not allowed", name),
      ));
    }

    debug!("Allow import of module '{}'", name);
    scope.widened(vm, || ambient.call(args, vm))
  })
  .into()
}

fn jail_error(vm: &VirtualMachine, err: JailError) -> PyBaseExceptionRef {
  match err {
    JailError::PathEscape(path) => new_exception(
      vm,
      vm.ctx.exceptions.permission_error,
      format!("Access outside of the sandbox is not allowed: '{}'", path.to_string_lossy()),
    ),
    JailError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
      new_exception(vm, vm.ctx.exceptions.file_not_found_error, err.to_string())
    }
    JailError::Io(err) => new_exception(vm, vm.ctx.exceptions.os_error, err.to_string()),
  }
}

fn guarded_open(
  vm: &VirtualMachine,
  jail: Arc<SandboxJail>,
  scope: BuiltinsScope,
  ambient: PyObjectRef,
) -> PyObjectRef {
  vm.new_function(OPEN, move |mut args: FuncArgs, vm: &VirtualMachine| -> PyResult {
    // A custom opener or a raw descriptor would skip the jail
    if argument(&args, 7, "opener").is_some() {
      return Err(new_exception(
        vm,
        vm.ctx.exceptions.type_error,
        "custom opener is not allowed".to_owned(),
      ));
    }
    let path = string_argument(vm, &args, 0, "file")?.ok_or_else(|| {
      new_exception(
        vm,
        vm.ctx.exceptions.type_error,
        "open() missing required argument 'file'".to_owned(),
      )
    })?;
    let mode = string_argument(vm, &args, 1, "mode")?.unwrap_or_else(|| "r".to_owned());

    let resolved = jail.resolve(&path, &mode).map_err(|err| jail_error(vm, err))?;
    let resolved = vm.new_pyobj(resolved.to_string_lossy().to_string());
    if args.args.is_empty() {
      args.kwargs.shift_remove("file");
      args.args.push(resolved);
    } else {
      args.args[0] = resolved;
    }

    scope.widened(vm, || ambient.call(args, vm))
  })
  .into()
}
