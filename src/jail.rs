use std::env;
use std::fmt::Display;
use std::fs::{canonicalize, create_dir_all};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info};
use nix::unistd::chdir;
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

#[derive(Debug)]
pub enum JailError {
  PathEscape(PathBuf),
  Io(io::Error),
}

/// One guarded open performed by the guest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRecord {
  path: PathBuf,
  mode: String,
}

/// Private directory tree that bounds all guest file operations of one run
#[derive(Debug)]
pub struct SandboxJail {
  root: PathBuf,
  log: Mutex<Vec<OpenRecord>>,
  keep: bool,
}

/// Switch the working directory and switch back on drop
pub struct WorkdirGuard {
  previous: PathBuf,
}

impl Display for JailError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      JailError::PathEscape(path) => f.write_fmt(format_args!(
        "Path {} is outside of the sandbox",
        path.to_string_lossy()
      )),
      JailError::Io(err) => Display::fmt(err, f),
    }
  }
}

impl std::error::Error for JailError {}

impl From<io::Error> for JailError {
  fn from(err: io::Error) -> Self {
    JailError::Io(err)
  }
}

impl OpenRecord {
  pub fn path(&self) -> &PathBuf {
    &self.path
  }

  pub fn mode(&self) -> &str {
    &self.mode
  }
}

/// Modes that may create the file
fn is_write_mode(mode: &str) -> bool {
  mode.contains(['w', 'a', 'x', '+'])
}

/// Canonicalize a path that may not exist yet.
///
/// The deepest existing ancestor is resolved through the file system, the
/// missing tail is then applied component by component.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, JailError> {
  match canonicalize(path) {
    Ok(real) => return Ok(real),
    Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
    Err(_) => {}
  }

  let components = path.components().collect::<Vec<Component>>();
  for split in (1..components.len()).rev() {
    let prefix = components[..split].iter().collect::<PathBuf>();
    let real = match canonicalize(&prefix) {
      Ok(real) => real,
      Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
      Err(err) => return Err(err.into()),
    };

    // The ancestor has no symlinks left, so `..` can be applied lexically
    let mut resolved = real;
    for component in &components[split..] {
      match component {
        Component::Normal(name) => resolved.push(name),
        Component::ParentDir => {
          resolved.pop();
        }
        _ => {}
      }
    }
    return Ok(resolved);
  }

  Err(JailError::Io(io::Error::new(
    io::ErrorKind::NotFound,
    format!("No such file or directory: {}", path.to_string_lossy()),
  )))
}

impl SandboxJail {
  /// Create a fresh, empty, uniquely named jail under `parent`
  pub fn create_in<P: AsRef<Path>>(parent: P) -> Result<Self, JailError> {
    let parent = parent.as_ref().absolutize()?.to_path_buf();
    create_dir_all(&parent)?;
    let dir = Builder::new().prefix("jail-").tempdir_in(&parent)?;
    let root = canonicalize(dir.keep())?;
    info!("Create sandbox jail: {}", root.to_string_lossy());

    Ok(SandboxJail {
      root,
      log: Mutex::new(vec![]),
      keep: false,
    })
  }

  /// Persist the jail directory after the run
  pub fn keep(mut self) -> Self {
    self.keep = true;
    self
  }

  pub fn root(&self) -> &PathBuf {
    &self.root
  }

  /// Map a guest path onto a real path inside the jail and record the open
  pub fn resolve<P: AsRef<Path>>(&self, path: P, mode: &str) -> Result<PathBuf, JailError> {
    let path = path.as_ref();
    let candidate = if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.root.join(path)
    };

    let resolved = canonicalize_lenient(&candidate)?;
    if !resolved.starts_with(&self.root) {
      info!(
        "Reject path {} (resolved to {})",
        path.to_string_lossy(),
        resolved.to_string_lossy()
      );
      return Err(JailError::PathEscape(path.to_path_buf()));
    }

    if is_write_mode(mode) && resolved != self.root {
      if let Some(parent) = resolved.parent() {
        create_dir_all(parent)?;
      }
    }

    debug!("Guest opens {} ({})", resolved.to_string_lossy(), mode);
    let record = OpenRecord {
      path: resolved.clone(),
      mode: mode.to_string(),
    };
    match self.log.lock() {
      Ok(mut log) => log.push(record),
      Err(poisoned) => poisoned.into_inner().push(record),
    }

    Ok(resolved)
  }

  /// Snapshot of every open recorded so far
  pub fn open_log(&self) -> Vec<OpenRecord> {
    match self.log.lock() {
      Ok(log) => log.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  /// Remove the jail directory, the jail must not be used afterwards
  pub fn close(&self) {
    if self.keep {
      debug!("Persist sandbox jail: {}", self.root.to_string_lossy());
      return;
    }
    if self.root.exists() {
      match remove_dir_all::remove_dir_all(&self.root) {
        Ok(_) => {
          info!("Remove sandbox jail: {}", self.root.to_string_lossy());
        }
        Err(err) => {
          error!(
            "Fails removing sandbox jail: {} ({})",
            self.root.to_string_lossy(),
            err
          );
        }
      }
    }
  }
}

impl Drop for SandboxJail {
  fn drop(&mut self) {
    self.close();
  }
}

impl WorkdirGuard {
  pub fn enter<P: AsRef<Path>>(dir: P) -> Result<Self, JailError> {
    let previous = env::current_dir()?;
    chdir(dir.as_ref()).map_err(io::Error::from)?;
    debug!("Change working directory to {}", dir.as_ref().to_string_lossy());
    Ok(WorkdirGuard { previous })
  }
}

impl Drop for WorkdirGuard {
  fn drop(&mut self) {
    if let Err(err) = chdir(&self.previous) {
      error!(
        "Fails restoring working directory {}: {}",
        self.previous.to_string_lossy(),
        err
      );
    }
  }
}
