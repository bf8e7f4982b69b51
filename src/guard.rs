//! Static policy guard.
//!
//! The guard walks the whole syntax tree of a guest program before the
//! interpreter ever compiles it. Imports are checked against the allowed
//! roots, attribute names starting with `__` are rejected (except
//! `__init__`), and calls to denied primitives by literal name are rejected.

use std::fmt::Display;

use log::debug;
use rustpython_ast as ast;
use rustpython_parser::Parse;
use serde::{Deserialize, Serialize};

use crate::policy::SandboxPolicy;

const CONSTRUCTOR: &str = "__init__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
  ForbiddenImport,
  ForbiddenAttribute,
  ForbiddenCall,
}

/// Rejection verdict of the guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardViolation {
  kind: ViolationKind,
  reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
  Violation(GuardViolation),
  Syntax(String),
}

impl GuardViolation {
  fn import(module: &str) -> Self {
    GuardViolation {
      kind: ViolationKind::ForbiddenImport,
      reason: format!("Import of module '{}' is not allowed", module),
    }
  }

  fn relative_import() -> Self {
    GuardViolation {
      kind: ViolationKind::ForbiddenImport,
      reason: "Relative import is not allowed".to_string(),
    }
  }

  fn attribute(name: &str) -> Self {
    GuardViolation {
      kind: ViolationKind::ForbiddenAttribute,
      reason: format!("Use of special attribute '{}' is not allowed", name),
    }
  }

  fn call(name: &str) -> Self {
    GuardViolation {
      kind: ViolationKind::ForbiddenCall,
      reason: format!("Call to '{}' is not allowed", name),
    }
  }

  pub fn kind(&self) -> ViolationKind {
    self.kind
  }

  pub fn reason(&self) -> &str {
    &self.reason
  }
}

impl Display for GuardViolation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.reason)
  }
}

impl Display for GuardError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      GuardError::Violation(violation) => Display::fmt(violation, f),
      GuardError::Syntax(msg) => f.write_fmt(format_args!("SyntaxError: {}", msg)),
    }
  }
}

fn is_dunder(name: &str) -> bool {
  name.starts_with("__") && name != CONSTRUCTOR
}

/// Explicit walk over every statement and expression field, so that nothing
/// nested in a default value, decorator, comprehension or pattern is skipped
struct PolicyWalker<'p> {
  policy: &'p SandboxPolicy,
  violation: Option<GuardViolation>,
}

impl<'p> PolicyWalker<'p> {
  fn reject(&mut self, violation: GuardViolation) {
    if self.violation.is_none() {
      debug!("Guard rejects program: {}", violation);
      self.violation = Some(violation);
    }
  }

  fn check_module(&mut self, module: &str) {
    if !self.policy.is_import_allowed(module) {
      self.reject(GuardViolation::import(module));
    }
  }

  fn check_attribute(&mut self, name: &str) {
    if is_dunder(name) {
      self.reject(GuardViolation::attribute(name));
    }
  }

  fn walk_body(&mut self, body: &[ast::Stmt]) {
    for stmt in body {
      self.walk_stmt(stmt);
    }
  }

  fn walk_exprs<'a, I: IntoIterator<Item = &'a ast::Expr>>(&mut self, exprs: I) {
    for expr in exprs {
      self.walk_expr(expr);
    }
  }

  fn walk_optional(&mut self, expr: Option<&ast::Expr>) {
    if let Some(expr) = expr {
      self.walk_expr(expr);
    }
  }

  fn walk_arguments(&mut self, arguments: &ast::Arguments) {
    let params = arguments
      .posonlyargs
      .iter()
      .chain(arguments.args.iter())
      .chain(arguments.kwonlyargs.iter());
    for param in params {
      self.walk_arg(&param.def);
      self.walk_optional(param.default.as_deref());
    }
    if let Some(arg) = &arguments.vararg {
      self.walk_arg(arg);
    }
    if let Some(arg) = &arguments.kwarg {
      self.walk_arg(arg);
    }
  }

  fn walk_arg(&mut self, arg: &ast::Arg) {
    self.walk_optional(arg.annotation.as_deref());
  }

  fn walk_type_params(&mut self, params: &[ast::TypeParam]) {
    for param in params {
      if let ast::TypeParam::TypeVar(ast::TypeParamTypeVar { bound, .. }) = param {
        self.walk_optional(bound.as_deref());
      }
    }
  }

  fn walk_keywords(&mut self, keywords: &[ast::Keyword]) {
    for keyword in keywords {
      self.walk_expr(&keyword.value);
    }
  }

  fn walk_generators(&mut self, generators: &[ast::Comprehension]) {
    for generator in generators {
      self.walk_expr(&generator.target);
      self.walk_expr(&generator.iter);
      self.walk_exprs(&generator.ifs);
    }
  }

  fn walk_handlers(&mut self, handlers: &[ast::ExceptHandler]) {
    for handler in handlers {
      let ast::ExceptHandler::ExceptHandler(handler) = handler;
      self.walk_optional(handler.type_.as_deref());
      self.walk_body(&handler.body);
    }
  }

  fn walk_pattern(&mut self, pattern: &ast::Pattern) {
    match pattern {
      ast::Pattern::MatchValue(ast::PatternMatchValue { value, .. }) => self.walk_expr(value),
      ast::Pattern::MatchSequence(ast::PatternMatchSequence { patterns, .. })
      | ast::Pattern::MatchOr(ast::PatternMatchOr { patterns, .. }) => {
        for pattern in patterns {
          self.walk_pattern(pattern);
        }
      }
      ast::Pattern::MatchMapping(ast::PatternMatchMapping { keys, patterns, .. }) => {
        self.walk_exprs(keys);
        for pattern in patterns {
          self.walk_pattern(pattern);
        }
      }
      ast::Pattern::MatchClass(ast::PatternMatchClass {
        cls,
        patterns,
        kwd_attrs,
        kwd_patterns,
        ..
      }) => {
        self.walk_expr(cls);
        // `case C(__class__=x)` reads the attribute
        for attr in kwd_attrs {
          self.check_attribute(attr.as_str());
        }
        for pattern in patterns.iter().chain(kwd_patterns.iter()) {
          self.walk_pattern(pattern);
        }
      }
      ast::Pattern::MatchAs(ast::PatternMatchAs {
        pattern: Some(pattern),
        ..
      }) => self.walk_pattern(pattern),
      _ => {}
    }
  }

  fn walk_stmt(&mut self, stmt: &ast::Stmt) {
    // Nothing below a rejected node matters any more
    if self.violation.is_some() {
      return;
    }
    match stmt {
      ast::Stmt::FunctionDef(ast::StmtFunctionDef {
        args,
        body,
        decorator_list,
        returns,
        type_params,
        ..
      })
      | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef {
        args,
        body,
        decorator_list,
        returns,
        type_params,
        ..
      }) => {
        self.walk_exprs(decorator_list);
        self.walk_type_params(type_params);
        self.walk_arguments(args);
        self.walk_optional(returns.as_deref());
        self.walk_body(body);
      }
      ast::Stmt::ClassDef(ast::StmtClassDef {
        bases,
        keywords,
        body,
        decorator_list,
        type_params,
        ..
      }) => {
        self.walk_exprs(decorator_list);
        self.walk_type_params(type_params);
        self.walk_exprs(bases);
        self.walk_keywords(keywords);
        self.walk_body(body);
      }
      ast::Stmt::Return(ast::StmtReturn { value, .. }) => self.walk_optional(value.as_deref()),
      ast::Stmt::Delete(ast::StmtDelete { targets, .. }) => self.walk_exprs(targets),
      ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
        self.walk_exprs(targets);
        self.walk_expr(value);
      }
      ast::Stmt::TypeAlias(ast::StmtTypeAlias {
        name,
        type_params,
        value,
        ..
      }) => {
        self.walk_expr(name);
        self.walk_type_params(type_params);
        self.walk_expr(value);
      }
      ast::Stmt::AugAssign(ast::StmtAugAssign { target, value, .. }) => {
        self.walk_expr(target);
        self.walk_expr(value);
      }
      ast::Stmt::AnnAssign(ast::StmtAnnAssign {
        target,
        annotation,
        value,
        ..
      }) => {
        self.walk_expr(target);
        self.walk_expr(annotation);
        self.walk_optional(value.as_deref());
      }
      ast::Stmt::For(ast::StmtFor {
        target,
        iter,
        body,
        orelse,
        ..
      })
      | ast::Stmt::AsyncFor(ast::StmtAsyncFor {
        target,
        iter,
        body,
        orelse,
        ..
      }) => {
        self.walk_expr(target);
        self.walk_expr(iter);
        self.walk_body(body);
        self.walk_body(orelse);
      }
      ast::Stmt::While(ast::StmtWhile {
        test, body, orelse, ..
      })
      | ast::Stmt::If(ast::StmtIf {
        test, body, orelse, ..
      }) => {
        self.walk_expr(test);
        self.walk_body(body);
        self.walk_body(orelse);
      }
      ast::Stmt::With(ast::StmtWith { items, body, .. })
      | ast::Stmt::AsyncWith(ast::StmtAsyncWith { items, body, .. }) => {
        for item in items {
          self.walk_expr(&item.context_expr);
          self.walk_optional(item.optional_vars.as_deref());
        }
        self.walk_body(body);
      }
      ast::Stmt::Match(ast::StmtMatch { subject, cases, .. }) => {
        self.walk_expr(subject);
        for case in cases {
          self.walk_pattern(&case.pattern);
          self.walk_optional(case.guard.as_deref());
          self.walk_body(&case.body);
        }
      }
      ast::Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
        self.walk_optional(exc.as_deref());
        self.walk_optional(cause.as_deref());
      }
      ast::Stmt::Try(ast::StmtTry {
        body,
        handlers,
        orelse,
        finalbody,
        ..
      })
      | ast::Stmt::TryStar(ast::StmtTryStar {
        body,
        handlers,
        orelse,
        finalbody,
        ..
      }) => {
        self.walk_body(body);
        self.walk_handlers(handlers);
        self.walk_body(orelse);
        self.walk_body(finalbody);
      }
      ast::Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
        self.walk_expr(test);
        self.walk_optional(msg.as_deref());
      }
      ast::Stmt::Import(ast::StmtImport { names, .. }) => {
        for alias in names {
          self.check_module(alias.name.as_str());
        }
      }
      ast::Stmt::ImportFrom(ast::StmtImportFrom {
        module,
        names,
        level,
        ..
      }) => {
        let level = level.as_ref().map_or(0, |level| level.to_u32());
        match module {
          Some(module) if level == 0 => self.check_module(module.as_str()),
          _ => self.reject(GuardViolation::relative_import()),
        }
        for alias in names {
          self.check_attribute(alias.name.as_str());
        }
      }
      ast::Stmt::Expr(ast::StmtExpr { value, .. }) => self.walk_expr(value),
      ast::Stmt::Global(_)
      | ast::Stmt::Nonlocal(_)
      | ast::Stmt::Pass(_)
      | ast::Stmt::Break(_)
      | ast::Stmt::Continue(_) => {}
    }
  }

  fn walk_expr(&mut self, expr: &ast::Expr) {
    if self.violation.is_some() {
      return;
    }
    match expr {
      ast::Expr::BoolOp(ast::ExprBoolOp { values, .. }) => self.walk_exprs(values),
      ast::Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
        self.walk_expr(target);
        self.walk_expr(value);
      }
      ast::Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
        self.walk_expr(left);
        self.walk_expr(right);
      }
      ast::Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => self.walk_expr(operand),
      ast::Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
        self.walk_arguments(args);
        self.walk_expr(body);
      }
      ast::Expr::IfExp(ast::ExprIfExp {
        test, body, orelse, ..
      }) => {
        self.walk_expr(test);
        self.walk_expr(body);
        self.walk_expr(orelse);
      }
      ast::Expr::Dict(ast::ExprDict { keys, values, .. }) => {
        self.walk_exprs(keys.iter().flatten());
        self.walk_exprs(values);
      }
      ast::Expr::Set(ast::ExprSet { elts, .. })
      | ast::Expr::List(ast::ExprList { elts, .. })
      | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => self.walk_exprs(elts),
      ast::Expr::ListComp(ast::ExprListComp {
        elt, generators, ..
      })
      | ast::Expr::SetComp(ast::ExprSetComp {
        elt, generators, ..
      })
      | ast::Expr::GeneratorExp(ast::ExprGeneratorExp {
        elt, generators, ..
      }) => {
        self.walk_generators(generators);
        self.walk_expr(elt);
      }
      ast::Expr::DictComp(ast::ExprDictComp {
        key,
        value,
        generators,
        ..
      }) => {
        self.walk_generators(generators);
        self.walk_expr(key);
        self.walk_expr(value);
      }
      ast::Expr::Await(ast::ExprAwait { value, .. })
      | ast::Expr::YieldFrom(ast::ExprYieldFrom { value, .. })
      | ast::Expr::Starred(ast::ExprStarred { value, .. }) => self.walk_expr(value),
      ast::Expr::Yield(ast::ExprYield { value, .. }) => self.walk_optional(value.as_deref()),
      ast::Expr::Compare(ast::ExprCompare {
        left, comparators, ..
      }) => {
        self.walk_expr(left);
        self.walk_exprs(comparators);
      }
      ast::Expr::Call(ast::ExprCall {
        func,
        args,
        keywords,
        ..
      }) => {
        if let ast::Expr::Name(name) = func.as_ref() {
          if self.policy.is_call_denied(name.id.as_str()) {
            self.reject(GuardViolation::call(name.id.as_str()));
            return;
          }
        }
        self.walk_expr(func);
        self.walk_exprs(args);
        self.walk_keywords(keywords);
      }
      ast::Expr::FormattedValue(ast::ExprFormattedValue {
        value, format_spec, ..
      }) => {
        self.walk_expr(value);
        self.walk_optional(format_spec.as_deref());
      }
      ast::Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => self.walk_exprs(values),
      ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
        self.check_attribute(attr.as_str());
        self.walk_expr(value);
      }
      ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
        self.walk_expr(value);
        self.walk_expr(slice);
      }
      ast::Expr::Slice(ast::ExprSlice {
        lower, upper, step, ..
      }) => {
        self.walk_optional(lower.as_deref());
        self.walk_optional(upper.as_deref());
        self.walk_optional(step.as_deref());
      }
      ast::Expr::Constant(_) | ast::Expr::Name(_) => {}
    }
  }
}

/// Parse and inspect a guest program, nothing is executed
pub fn check(source: &str, policy: &SandboxPolicy) -> Result<(), GuardError> {
  let suite = ast::Suite::parse(source, "<student>")
    .map_err(|err| GuardError::Syntax(err.to_string()))?;

  let mut walker = PolicyWalker {
    policy,
    violation: None,
  };
  walker.walk_body(&suite);

  match walker.violation {
    Some(violation) => Err(GuardError::Violation(violation)),
    None => Ok(()),
  }
}
