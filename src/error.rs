//! Error taxonomy for the shell.
//!
//! Errors are either fatal (an OS primitive the shell depends on failed) or
//! recoverable (reported to the user, and the read-eval loop carries on).

use std::ffi::NulError;

use thiserror::Error;

use crate::builtins::JobControlError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A system call failed. `op` names the failing operation.
    #[error("{op} error: {}", .source.desc())]
    Os {
        op: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("Tried to create too many jobs")]
    Capacity { max: usize },

    #[error("job ({pid}) is already in the foreground")]
    ForegroundTaken { pid: nix::unistd::Pid },

    #[error(transparent)]
    JobControl(#[from] JobControlError),

    #[error("invalid argument: {0}")]
    Nul(#[from] NulError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn os(op: &'static str, source: nix::Error) -> Self {
        Error::Os { op, source }
    }

    /// Whether the shell has to terminate after reporting this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Os { .. } | Error::Io(_) => true,
            Error::Capacity { .. }
            | Error::ForegroundTaken { .. }
            | Error::JobControl(_)
            | Error::Nul(_) => false,
        }
    }
}
