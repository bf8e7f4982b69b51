use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::{errno::Errno, libc::STDOUT_FILENO, unistd::isatty};

use crate::jail::JailError;

pub enum PyJailError {
  Spawn(String),
  Channel(String),
  Jail(JailError),
  Cli(String),
  Nix(Errno),
  Fs(String),
  Json(serde_json::Error),
  Logger(FlexiLoggerError),
}

pub enum PyJailExit {
  Ok,
  Err(PyJailError),
}

impl PyJailError {
  pub fn spawn<MS: Into<String>>(msg: MS) -> PyJailError {
    PyJailError::Spawn(msg.into())
  }

  pub fn channel<MS: Into<String>>(msg: MS) -> PyJailError {
    PyJailError::Channel(msg.into())
  }

  pub fn cli<MS: Into<String>>(msg: MS) -> PyJailError {
    PyJailError::Cli(msg.into())
  }
}

impl Debug for PyJailError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for PyJailError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      PyJailError::Spawn(msg) => f.write_fmt(format_args!("PyJail Spawn Error: {}", msg)),
      PyJailError::Channel(msg) => f.write_fmt(format_args!("PyJail Channel Error: {}", msg)),
      PyJailError::Jail(err) => f.write_fmt(format_args!("PyJail Jail Error: {}", err)),
      PyJailError::Cli(msg) => f.write_fmt(format_args!("PyJail CLI Error: {}", msg)),
      PyJailError::Nix(errno) => f.write_fmt(format_args!("PyJail Nix Error: {}", errno)),
      PyJailError::Fs(msg) => f.write_fmt(format_args!("PyJail File System Error: {}", msg)),
      PyJailError::Json(err) => f.write_fmt(format_args!("PyJail JSON Error: {}", err)),
      PyJailError::Logger(err) => f.write_fmt(format_args!("PyJail Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for PyJailError {
  fn from(errno: Errno) -> Self {
    PyJailError::Nix(errno)
  }
}

impl From<std::io::Error> for PyJailError {
  fn from(err: std::io::Error) -> Self {
    PyJailError::Fs(err.to_string())
  }
}

impl From<JailError> for PyJailError {
  fn from(err: JailError) -> Self {
    PyJailError::Jail(err)
  }
}

impl From<serde_json::Error> for PyJailError {
  fn from(err: serde_json::Error) -> Self {
    PyJailError::Json(err)
  }
}

impl From<FlexiLoggerError> for PyJailError {
  fn from(err: FlexiLoggerError) -> Self {
    PyJailError::Logger(err)
  }
}

impl Error for PyJailError {}

impl Termination for PyJailExit {
  fn report(self) -> ExitCode {
    match self {
      PyJailExit::Ok => ExitCode::SUCCESS.report(),
      PyJailExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) => {
            let is_tty = isatty(STDOUT_FILENO).unwrap_or(false);
            if is_tty {
              format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
            } else {
              serde_json::json!({ "ok": false, "type": prefix, "message": message }).to_string()
            }
          }
          None => {
            format!("{}", err)
          }
        };
        eprintln!("{}", text);
        ExitCode::FAILURE.report()
      }
    }
  }
}
