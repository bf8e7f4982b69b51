use std::io::Read;
use std::os::unix::prelude::RawFd;
use std::process::ChildStdout;
use std::thread::{self, JoinHandle};

use log::{debug, error};
use nix::libc::{STDERR_FILENO, STDOUT_FILENO};
use nix::unistd::{self, close, dup, dup2};

use crate::error::PyJailError;
use crate::result::ExecutionResult;

/// Worker end of the one-shot result channel
pub struct ResultSender(RawFd);

/// Supervisor end of the one-shot result channel
pub struct ResultReceiver(JoinHandle<std::io::Result<Vec<u8>>>);

impl ResultSender {
  /// Keep the original stdout for the result and send everything else
  /// printed on stdout (guest `print` included) to stderr
  pub fn from_stdout() -> Result<Self, PyJailError> {
    let fd = dup(STDOUT_FILENO)?;
    dup2(STDERR_FILENO, STDOUT_FILENO)?;
    debug!("Result channel is fd {}", fd);
    Ok(ResultSender(fd))
  }

  /// Write the single result, the channel is gone afterwards
  pub fn send(self, result: &ExecutionResult) -> Result<usize, PyJailError> {
    let text = serde_json::to_string(result)?;
    let bytes = text.into_bytes();
    let mut written = 0;
    while written < bytes.len() {
      written += unistd::write(self.0, &bytes[written..])?;
    }
    Ok(written)
  }
}

impl Drop for ResultSender {
  fn drop(&mut self) {
    if let Err(err) = close(self.0) {
      error!("Close result channel fails: {}", err);
    }
  }
}

impl ResultReceiver {
  /// Drain the worker stdout on a separate thread
  pub fn spawn(mut stdout: ChildStdout) -> Self {
    let handle = thread::spawn(move || {
      let mut buf = vec![];
      stdout.read_to_end(&mut buf)?;
      Ok(buf)
    });
    ResultReceiver(handle)
  }

  /// Wait for the worker to close its end and decode the result
  pub fn recv(self) -> Result<ExecutionResult, PyJailError> {
    let buf = self
      .0
      .join()
      .map_err(|_| PyJailError::channel("Result reader thread panicked"))??;
    // 忽略 UTF-8 parse 错误
    let text = String::from_utf8_lossy(&buf);
    let text = text.trim();
    if text.is_empty() {
      return Err(PyJailError::channel("No result from the sandbox"));
    }
    debug!("Recv message: {} bytes", text.len());
    let result = serde_json::from_str::<ExecutionResult>(text)?;
    Ok(result)
  }
}
