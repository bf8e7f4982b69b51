pub use error::{PyJailError, PyJailExit};
pub use guard::{check, GuardError, GuardViolation, ViolationKind};
pub use jail::{JailError, OpenRecord, SandboxJail, WorkdirGuard};
pub use policy::{SandboxPolicy, SandboxPolicyBuilder};
pub use result::{ExecutionResult, ExitIndicator, Failure, RunReport};
pub use supervisor::{default_worker, run_safely, Supervisor, WORKER_COMMAND, WORKER_ENV};
pub use worker::{execute, GuestProgram, WorkerRequest};

pub mod capability;
pub mod channel;
mod error;
pub mod guard;
pub mod harness;
mod jail;
mod policy;
mod result;
mod supervisor;
pub mod utils;
mod worker;
