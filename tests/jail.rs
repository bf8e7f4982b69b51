use std::fs;
use std::os::unix::fs::symlink;

use log::info;
use tempfile::tempdir;

use pyjail::{JailError, SandboxJail};

mod common;

#[test]
fn it_should_resolve_inside_jail() {
  common::setup();

  let dir = tempdir().unwrap();
  let jail = SandboxJail::create_in(dir.path()).unwrap();
  info!("Jail root: {}", jail.root().to_string_lossy());

  let resolved = jail.resolve("data.txt", "w").unwrap();
  assert_eq!(resolved, jail.root().join("data.txt"));

  let absolute = jail.root().join("data.txt");
  assert_eq!(jail.resolve(&absolute, "r").unwrap(), absolute);

  let resolved = jail.resolve("a/../b.txt", "w").unwrap();
  assert_eq!(resolved, jail.root().join("b.txt"));
}

#[test]
fn it_should_reject_escape() {
  common::setup();

  let dir = tempdir().unwrap();
  let jail = SandboxJail::create_in(dir.path()).unwrap();

  assert!(matches!(
    jail.resolve("/etc/passwd", "r"),
    Err(JailError::PathEscape(_))
  ));
  assert!(matches!(
    jail.resolve("../outside.txt", "w"),
    Err(JailError::PathEscape(_))
  ));
  assert!(matches!(
    jail.resolve("../../../../../../tmp/x", "w"),
    Err(JailError::PathEscape(_))
  ));
  assert!(!dir.path().join("outside.txt").exists());
  assert!(jail.open_log().is_empty());
}

#[test]
fn it_should_reject_symlink_escape() {
  common::setup();

  let dir = tempdir().unwrap();
  let outside = tempdir().unwrap();
  fs::write(outside.path().join("secret.txt"), "secret").unwrap();

  let jail = SandboxJail::create_in(dir.path()).unwrap();
  symlink(outside.path(), jail.root().join("link")).unwrap();

  assert!(matches!(
    jail.resolve("link/secret.txt", "r"),
    Err(JailError::PathEscape(_))
  ));
  assert!(matches!(
    jail.resolve("link/new.txt", "w"),
    Err(JailError::PathEscape(_))
  ));
  assert!(!outside.path().join("new.txt").exists());
}

#[test]
fn it_should_reject_parent_in_missing_tail() {
  common::setup();

  let dir = tempdir().unwrap();
  let jail = SandboxJail::create_in(dir.path()).unwrap();

  assert!(matches!(
    jail.resolve("missing/../../escape.txt", "w"),
    Err(JailError::PathEscape(_))
  ));
  assert!(!dir.path().join("escape.txt").exists());
  assert!(!jail.root().join("missing").exists());
}

#[test]
fn it_should_create_parents_for_write() {
  common::setup();

  let dir = tempdir().unwrap();
  let jail = SandboxJail::create_in(dir.path()).unwrap();

  let resolved = jail.resolve("nested/deeper/out.txt", "a").unwrap();
  assert!(jail.root().join("nested/deeper").is_dir());
  assert!(!resolved.exists());

  assert!(jail.resolve("other/in.txt", "r").is_ok());
  assert!(!jail.root().join("other").exists());
}

#[test]
fn it_should_record_opens() {
  common::setup();

  let dir = tempdir().unwrap();
  let jail = SandboxJail::create_in(dir.path()).unwrap();

  jail.resolve("a.txt", "w").unwrap();
  jail.resolve("a.txt", "r").unwrap();
  let _ = jail.resolve("/etc/hosts", "r");

  let log = jail.open_log();
  assert_eq!(log.len(), 2);
  assert_eq!(log[0].path(), &jail.root().join("a.txt"));
  assert_eq!(log[0].mode(), "w");
  assert_eq!(log[1].mode(), "r");
}

#[test]
fn it_should_isolate_jails() {
  common::setup();

  let dir = tempdir().unwrap();
  let first = SandboxJail::create_in(dir.path()).unwrap();
  let second = SandboxJail::create_in(dir.path()).unwrap();
  assert_ne!(first.root(), second.root());

  let path = first.resolve("shared.txt", "w").unwrap();
  fs::write(&path, "first").unwrap();

  assert!(matches!(
    second.resolve(&path, "r"),
    Err(JailError::PathEscape(_))
  ));
  assert!(!second.root().join("shared.txt").exists());
}

#[test]
fn it_should_remove_on_close() {
  common::setup();

  let dir = tempdir().unwrap();
  let jail = SandboxJail::create_in(dir.path()).unwrap();
  let root = jail.root().clone();
  fs::write(jail.resolve("x/y.txt", "w").unwrap(), "y").unwrap();
  drop(jail);
  assert!(!root.exists());

  let jail = SandboxJail::create_in(dir.path()).unwrap().keep();
  let root = jail.root().clone();
  drop(jail);
  assert!(root.exists());
}
