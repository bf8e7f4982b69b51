use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::{debug, info};

use pyjail::channel::ResultSender;
use pyjail::utils::{default_format, parse_tests, parse_timeout, read_text, TimeoutSeconds};
use pyjail::{
  execute, GuestProgram, PyJailError, PyJailExit, SandboxPolicy, Supervisor, WorkerRequest,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(long, global = true, default_value_t = false, help = "Print debug logs")]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  #[command(about = "Run a Python submission against test snippets")]
  Run(RunArgs),

  #[command(hide = true)]
  Worker,
}

#[derive(Args, Debug)]
struct RunArgs {
  #[arg(help = "Python source file")]
  program: PathBuf,

  #[arg(long = "test", help = "Test snippet, can be repeated")]
  test: Vec<String>,

  #[arg(long, help = "File with one test snippet per line")]
  tests: Option<PathBuf>,

  #[arg(short, long, default_value = "4", value_parser = parse_timeout, help = "Time limit (unit: seconds)")]
  timeout: TimeoutSeconds,

  #[arg(long = "allow-import", help = "Allowed top level package, can be repeated")]
  allow_import: Vec<String>,

  #[arg(long = "allow-fs", default_value_t = false, help = "Expose open() inside the jail")]
  allow_fs: bool,

  #[arg(long, help = "Worker binary (default: $PYJAIL_WORKER or this binary)")]
  worker: Option<PathBuf>,
}

fn start_file_logger(verbose: bool) -> Result<LoggerHandle, PyJailError> {
  let level = if verbose { "pyjail=debug" } else { "pyjail=info" };
  let handle = Logger::try_with_str(level)?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("LOG_DIR").unwrap_or("./logs/".into()))
        .basename("pyjail")
        .discriminant(format!("{}", chrono::offset::Local::now().format("%Y-%m-%d")))
        .suppress_timestamp(),
    )
    .append()
    .duplicate_to_stderr(Duplicate::Warn)
    .format_for_files(default_format)
    .print_message()
    .start()?;
  Ok(handle)
}

fn run(verbose: bool, args: RunArgs) -> Result<(), PyJailError> {
  let _logger = start_file_logger(verbose)?;

  info!("Start running pyjail");

  let code = read_text(&args.program)?;
  let mut tests = args.test;
  if let Some(path) = args.tests {
    tests.extend(parse_tests(&read_text(path)?));
  }

  let policy = SandboxPolicy::builder()
    .allow_imports(args.allow_import)
    .allow_filesystem(args.allow_fs)
    .build();
  debug!("Sandbox policy: {:?}", policy);

  let mut supervisor = Supervisor::new(policy)?;
  if let Some(worker) = args.worker {
    supervisor = supervisor.worker(worker);
  }
  if verbose {
    supervisor = supervisor.debug();
  }

  let timeout = Duration::try_from_secs_f64(args.timeout)
    .map_err(|err| PyJailError::cli(format!("Invalid timeout {}: {}", args.timeout, err)))?;
  let result = supervisor.run(GuestProgram::new(code), tests, timeout);
  result.print();

  info!("Running pyjail finished");

  Ok(())
}

fn serve_worker(verbose: bool) -> Result<(), PyJailError> {
  // stdout 只用来回传结果
  let sender = ResultSender::from_stdout()?;

  let level = if verbose { "pyjail=debug" } else { "pyjail=warn" };
  let _logger = Logger::try_with_str(level)?
    .log_to_stderr()
    .format(default_format)
    .start()?;

  let mut input = String::new();
  io::stdin().read_to_string(&mut input)?;
  let request = serde_json::from_str::<WorkerRequest>(&input)?;

  let result = execute(request);
  sender.send(&result)?;

  Ok(())
}

fn main() -> PyJailExit {
  let cli = Cli::parse();
  let verbose = cli.verbose;

  let result = match cli.command {
    Commands::Run(args) => run(verbose, args),
    Commands::Worker => serve_worker(verbose),
  };

  match result {
    Ok(_) => PyJailExit::Ok,
    Err(err) => PyJailExit::Err(err),
  }
}
