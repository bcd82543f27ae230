//! jobsh: a tiny shell with job control.
//!
//! The binary is the read-eval loop in `main.rs`. The modules are exposed
//! here so tests can drive the job-control core directly.
//!
//! | Module | Role |
//! |--------|------|
//! | [`job`] | Job table, shared handle, foreground waiter |
//! | [`executor`] | Forks commands into their own process group and registers them |
//! | [`reaper`] | Applies child exits, kills and stops to the job table |
//! | [`signals`] | Signal thread, relays to the foreground job, SIGCHLD critical sections |
//! | [`builtins`] | `quit`/`exit`, `fg`, `bg`, `jobs` |
//! | [`parser`] | Word splitting, trailing `&`, `PATH` lookup |
//! | [`shell`] | Read-eval loop |
//! | [`config`] | Command-line flags |
//! | [`error`] | Error type |

pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod parser;
pub mod reaper;
pub mod shell;
pub mod signals;

pub use error::{Error, Result};
pub use job::{Job, JobId, JobState, JobTable, Jobs};
