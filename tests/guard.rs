use pyjail::{check, GuardError, SandboxPolicy, ViolationKind};

mod common;

fn rejected(source: &str, policy: &SandboxPolicy) -> (ViolationKind, String) {
  match check(source, policy) {
    Err(GuardError::Violation(violation)) => (violation.kind(), violation.reason().to_string()),
    other => panic!("Expected a violation for {:?}, got {:?}", source, other),
  }
}

#[test]
fn it_should_accept_plain_program() {
  common::setup();

  let source = r#"
def add(a, b):
    return a + b

class Counter:
    def __init__(self):
        self.value = 0

    def bump(self):
        self.value += 1
        return self.value

total = sum(map(lambda x: add(x, 1), range(10)))
print(total, Counter().bump())
"#;
  assert_eq!(check(source, &SandboxPolicy::base()), Ok(()));
}

#[test]
fn it_should_reject_import() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, reason) = rejected("import os\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenImport);
  assert_eq!(reason, "Import of module 'os' is not allowed");

  let (kind, _) = rejected("from subprocess import run\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenImport);

  let (_, reason) = rejected("import math, os.path\n", &SandboxPolicy::jailed());
  assert_eq!(reason, "Import of module 'os.path' is not allowed");
}

#[test]
fn it_should_reject_nested_import() {
  common::setup();

  let source = r#"
def helper():
    if True:
        for _ in range(1):
            import socket
    return 1
"#;
  let (kind, reason) = rejected(source, &SandboxPolicy::base());
  assert_eq!(kind, ViolationKind::ForbiddenImport);
  assert_eq!(reason, "Import of module 'socket' is not allowed");
}

#[test]
fn it_should_reject_relative_import() {
  common::setup();

  let policy = SandboxPolicy::builder().allow_import("math").build();
  let (kind, reason) = rejected("from . import math\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenImport);
  assert_eq!(reason, "Relative import is not allowed");
}

#[test]
fn it_should_match_import_root() {
  common::setup();

  let policy = SandboxPolicy::builder().allow_import("math").build();
  assert_eq!(check("import math\nfrom math import sqrt\n", &policy), Ok(()));

  let (_, reason) = rejected("import mathx\n", &policy);
  assert_eq!(reason, "Import of module 'mathx' is not allowed");
}

#[test]
fn it_should_reject_special_attribute() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, reason) = rejected("x = ().__class__.__bases__\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
  assert_eq!(reason, "Use of special attribute '__bases__' is not allowed");

  let (kind, _) = rejected("print([].__class__)\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let policy = SandboxPolicy::jailed();
  let (kind, _) = rejected("from math import __loader__\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
}

#[test]
fn it_should_allow_constructor() {
  common::setup();

  let source = r#"
class Base:
    def __init__(self, value):
        self.value = value

class Child(Base):
    def __init__(self):
        Base.__init__(self, 1)
"#;
  assert_eq!(check(source, &SandboxPolicy::base()), Ok(()));
}

#[test]
fn it_should_reject_denied_call() {
  common::setup();

  let policy = SandboxPolicy::base();
  for name in ["exec", "eval", "compile", "__import__", "open"] {
    let source = format!("{}('x')\n", name);
    let (kind, reason) = rejected(&source, &policy);
    assert_eq!(kind, ViolationKind::ForbiddenCall);
    assert_eq!(reason, format!("Call to '{}' is not allowed", name));
  }

  let (kind, _) = rejected("values = [eval(s) for s in ['1']]\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);
}

#[test]
fn it_should_allow_open_with_filesystem() {
  common::setup();

  let source = "with open('out.txt', 'w') as f:\n    f.write('ok')\n";
  assert!(check(source, &SandboxPolicy::base()).is_err());
  assert_eq!(check(source, &SandboxPolicy::jailed()), Ok(()));

  let (kind, _) = rejected("eval('1')\n", &SandboxPolicy::jailed());
  assert_eq!(kind, ViolationKind::ForbiddenCall);
}

#[test]
fn it_should_report_syntax_error() {
  common::setup();

  match check("def broken(:\n", &SandboxPolicy::base()) {
    Err(err @ GuardError::Syntax(_)) => {
      assert!(err.to_string().starts_with("SyntaxError: "));
    }
    other => panic!("Expected a syntax error, got {:?}", other),
  }
}

#[test]
fn it_should_build_policy() {
  common::setup();

  let policy = SandboxPolicy::builder()
    .allow_imports(vec!["math", "random"])
    .expose("eval")
    .deny_call("print")
    .build();

  assert!(policy.is_import_allowed("math"));
  assert!(policy.is_import_allowed("random.shuffle"));
  assert!(!policy.is_import_allowed("os"));
  assert!(policy.is_call_denied("eval"));
  assert!(!policy.builtins().any(|name| name == "eval"));
  assert!(policy.is_call_denied("print"));
  assert!(!policy.builtins().any(|name| name == "print"));
  assert!(policy.is_call_denied("open"));
  assert!(!SandboxPolicy::jailed().is_call_denied("open"));
  assert_eq!(SandboxPolicy::default(), SandboxPolicy::base());
}

#[test]
fn it_should_reject_inside_with_items() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, _) = rejected("with open('x') as f:\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);

  let (kind, _) = rejected("with ctx() as ().__class__:\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
}

#[test]
fn it_should_reject_inside_comprehensions() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, _) = rejected("[x for x in eval('[1]')]\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);

  let (kind, reason) = rejected("{x: 1 for x in range(3) if x.__class__}\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
  assert_eq!(reason, "Use of special attribute '__class__' is not allowed");

  let (kind, _) = rejected("k = [x for x in [().__class__.__mro__]][0]\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let (kind, _) = rejected("g = (y for y in [print.__self__])\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
}

#[test]
fn it_should_reject_inside_keyword_arguments() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, reason) = rejected("print(sep=eval('1'))\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);
  assert_eq!(reason, "Call to 'eval' is not allowed");

  let (kind, _) = rejected("class A(metaclass=().__class__):\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
}

#[test]
fn it_should_reject_inside_function_signature() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, _) = rejected("def f(a=__import__('os')):\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);

  let (kind, _) = rejected("def f(*, a=exec('1')):\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);

  let (kind, _) = rejected("def f(a: ().__class__):\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let (kind, _) = rejected("def f(*args: x.__dict__):\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let (kind, _) = rejected("def f() -> ().__class__:\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let (kind, _) = rejected("f = lambda a=eval('1'): a\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);
}

#[test]
fn it_should_reject_inside_decorators() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, _) = rejected("@eval\ndef f():\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);

  let (kind, _) = rejected("@x.__class__\nclass A:\n    pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
}

#[test]
fn it_should_reject_inside_match_cases() {
  common::setup();

  let policy = SandboxPolicy::base();
  let (kind, reason) = rejected("match 1:\n    case 1:\n        import os\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenImport);
  assert_eq!(reason, "Import of module 'os' is not allowed");

  let (kind, _) = rejected("match 1:\n    case x if x.__class__:\n        pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let (kind, _) = rejected("match 1:\n    case int(__class__=c):\n        pass\n", &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);
}

#[test]
fn it_should_reject_inside_except_handlers() {
  common::setup();

  let policy = SandboxPolicy::base();
  let source = "try:\n    pass\nexcept ValueError:\n    import os\n";
  let (kind, _) = rejected(source, &policy);
  assert_eq!(kind, ViolationKind::ForbiddenImport);

  let source = "try:\n    pass\nexcept x.__class__:\n    pass\n";
  let (kind, _) = rejected(source, &policy);
  assert_eq!(kind, ViolationKind::ForbiddenAttribute);

  let source = "try:\n    pass\nfinally:\n    eval('1')\n";
  let (kind, _) = rejected(source, &policy);
  assert_eq!(kind, ViolationKind::ForbiddenCall);
}

#[test]
fn it_should_reject_inside_other_expressions() {
  common::setup();

  let policy = SandboxPolicy::base();
  for source in [
    "x = f'{().__class__}'\n",
    "x = {'k': ().__class__}\n",
    "x = [1][().__class__:]\n",
    "x = 1 if ().__class__ else 2\n",
    "x: ().__class__ = 1\n",
    "assert True, ().__class__\n",
    "raise ValueError() from ().__class__\n",
    "while x.__dict__:\n    pass\n",
  ] {
    let (kind, _) = rejected(source, &policy);
    assert_eq!(kind, ViolationKind::ForbiddenAttribute, "{}", source);
  }
}
