use std::collections::BTreeSet;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

/// Builtins every guest can reach
const BASE_BUILTINS: &[&str] = &[
  // arithmetic and collections
  "abs",
  "all",
  "any",
  "enumerate",
  "filter",
  "len",
  "map",
  "max",
  "min",
  "pow",
  "range",
  "repr",
  "reversed",
  "round",
  "sorted",
  "sum",
  "zip",
  // constructors
  "bool",
  "dict",
  "float",
  "int",
  "list",
  "object",
  "set",
  "str",
  "tuple",
  // object model
  "callable",
  "hasattr",
  "isinstance",
  "super",
  "type",
  "__build_class__",
  // exceptions
  "Exception",
  "ValueError",
  "TypeError",
  "IndexError",
  // raised by `assert`, looked up by name
  "AssertionError",
  "print",
];

/// Names that can never be called by their literal identifier
const BASE_DENIED_CALLS: &[&str] = &["exec", "eval", "compile", "__import__", "open"];

lazy_static! {
  static ref BASE_POLICY: SandboxPolicy = SandboxPolicyBuilder::new().build();
  static ref JAILED_POLICY: SandboxPolicy = SandboxPolicyBuilder::new()
    .allow_import("math")
    .allow_filesystem(true)
    .build();
}

/// Immutable description of what a guest program may touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
  builtins: BTreeSet<String>,
  imports: BTreeSet<String>,
  denied_calls: BTreeSet<String>,
  allow_filesystem: bool,
}

/// Build a sandbox policy
pub struct SandboxPolicyBuilder {
  builtins: BTreeSet<String>,
  imports: BTreeSet<String>,
  denied_calls: BTreeSet<String>,
  allow_filesystem: bool,
}

impl SandboxPolicy {
  /// No imports, no file access
  pub fn base() -> Self {
    BASE_POLICY.clone()
  }

  /// Guarded `open` inside the jail and `import math`
  pub fn jailed() -> Self {
    JAILED_POLICY.clone()
  }

  pub fn builder() -> SandboxPolicyBuilder {
    SandboxPolicyBuilder::new()
  }

  pub fn builtins(&self) -> impl Iterator<Item = &str> {
    self.builtins.iter().map(|name| name.as_str())
  }

  pub fn imports(&self) -> impl Iterator<Item = &str> {
    self.imports.iter().map(|name| name.as_str())
  }

  /// Exact match on the first dotted segment
  pub fn is_import_allowed(&self, module: &str) -> bool {
    let root = module.split('.').next().unwrap_or(module);
    self.imports.contains(root)
  }

  /// `open` is only denied while the filesystem is closed
  pub fn is_call_denied(&self, name: &str) -> bool {
    if name == "open" && self.allow_filesystem {
      return false;
    }
    self.denied_calls.contains(name)
  }

  pub fn allow_filesystem(&self) -> bool {
    self.allow_filesystem
  }
}

impl Default for SandboxPolicy {
  fn default() -> Self {
    Self::base()
  }
}

impl SandboxPolicyBuilder {
  pub fn new() -> Self {
    SandboxPolicyBuilder {
      builtins: BASE_BUILTINS.iter().map(|name| name.to_string()).collect(),
      imports: BTreeSet::new(),
      denied_calls: BASE_DENIED_CALLS.iter().map(|name| name.to_string()).collect(),
      allow_filesystem: false,
    }
  }

  /// Allow importing a top level package and all its submodules
  pub fn allow_import<S: Into<String>>(mut self, root: S) -> Self {
    self.imports.insert(root.into());
    self
  }

  /// Allow a list of top level packages
  pub fn allow_imports<S: Into<String>>(mut self, roots: Vec<S>) -> Self {
    for root in roots {
      self.imports.insert(root.into());
    }
    self
  }

  /// Expose one more builtin name
  pub fn expose<S: Into<String>>(mut self, name: S) -> Self {
    let name = name.into();
    if !self.denied_calls.contains(&name) {
      self.builtins.insert(name);
    }
    self
  }

  /// Deny one more call by name
  pub fn deny_call<S: Into<String>>(mut self, name: S) -> Self {
    let name = name.into();
    self.builtins.remove(&name);
    self.denied_calls.insert(name);
    self
  }

  /// Let the guest open files inside its jail
  pub fn allow_filesystem(mut self, flag: bool) -> Self {
    self.allow_filesystem = flag;
    self
  }

  pub fn build(self) -> SandboxPolicy {
    SandboxPolicy {
      builtins: self.builtins,
      imports: self.imports,
      denied_calls: self.denied_calls,
      allow_filesystem: self.allow_filesystem,
    }
  }
}

impl Default for SandboxPolicyBuilder {
  fn default() -> Self {
    Self::new()
  }
}
