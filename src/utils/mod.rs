use std::fs;
use std::path::Path;
use std::time::Duration;

use flexi_logger::DeferredNow;
use log::{error, info, Record};

use crate::PyJailError;

pub type TimeoutSeconds = f64;

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Start running guest program```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

/// One test snippet per non-empty line
pub fn parse_tests(text: &str) -> Vec<String> {
  text
    .lines()
    .map(|line| line.trim_end())
    .filter(|line| !line.trim().is_empty())
    .map(|line| line.to_string())
    .collect()
}

pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String, PyJailError> {
  let path = path.as_ref();
  match fs::read_to_string(path) {
    Ok(text) => {
      info!("Read {} bytes from {}", text.len(), path.to_string_lossy());
      Ok(text)
    }
    Err(err) => {
      error!("Read {} fails: {}", path.to_string_lossy(), err);
      Err(PyJailError::cli(format!(
        "Can not read {}: {}",
        path.to_string_lossy(),
        err
      )))
    }
  }
}

/// Seconds must be a positive number that fits in a `Duration`
pub fn parse_timeout(text: &str) -> Result<TimeoutSeconds, String> {
  match text.parse::<TimeoutSeconds>() {
    Ok(value) if value > 0.0 && Duration::try_from_secs_f64(value).is_ok() => Ok(value),
    _ => Err(format!("Invalid timeout: {}", text)),
  }
}
