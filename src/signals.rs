//! Asynchronous side of the shell.
//!
//! Signals are received by a dedicated thread rather than in handler context.
//! SIGCHLD runs the reaper, SIGINT and SIGTSTP are relayed to the foreground
//! job's process group, SIGQUIT terminates the shell. SIGTTIN and SIGTTOU are
//! ignored outright.
//!
//! Everything that reads and then writes the job table from the controlling
//! thread does so inside a [`CriticalSection`].

use std::ops::{Deref, DerefMut};
use std::sync::MutexGuard;
use std::thread::{self, JoinHandle};

use nix::sys::signal::{killpg, signal, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGCHLD, SIGINT, SIGQUIT, SIGTSTP};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::job::{JobTable, Jobs};
use crate::reaper::{self, AnyChild};

/// Exclusive access to the job table with SIGCHLD blocked in this thread.
///
/// The reaper takes the same lock, so it cannot observe the table while a
/// critical section is open. Leave with [`CriticalSection::leave`] to get
/// unblock failures reported; dropping also unblocks.
pub struct CriticalSection<'a> {
    table: MutexGuard<'a, JobTable>,
    mask: SigSet,
    left: bool,
}

impl<'a> CriticalSection<'a> {
    pub fn enter(jobs: &'a Jobs) -> Result<Self> {
        let mask = child_signal_mask();
        mask.thread_block().map_err(|e| Error::os("sigprocmask", e))?;
        Ok(Self { table: jobs.lock(), mask, left: false })
    }

    pub fn leave(mut self) -> Result<()> {
        self.left = true;
        self.mask.thread_unblock().map_err(|e| Error::os("sigprocmask", e))
    }
}

impl Deref for CriticalSection<'_> {
    type Target = JobTable;

    fn deref(&self) -> &JobTable {
        &self.table
    }
}

impl DerefMut for CriticalSection<'_> {
    fn deref_mut(&mut self) -> &mut JobTable {
        &mut self.table
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        if self.left {
            return;
        }
        if let Err(e) = self.mask.thread_unblock() {
            error!(error = %e, "failed to unblock SIGCHLD");
        }
    }
}

/// The set holding only SIGCHLD.
pub fn child_signal_mask() -> SigSet {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    mask
}

/// Forwards `sig` to the foreground job's process group.
///
/// Returns the group signalled, or `None` when nothing is in the foreground;
/// the shell itself is never interrupted or stopped.
pub fn relay(jobs: &Jobs, sig: Signal) -> Result<Option<Pid>> {
    let table = jobs.lock();
    let Some(job) = table.foreground() else {
        debug!(?sig, "no foreground job, ignoring");
        return Ok(None);
    };
    let group = job.process_group;
    killpg(group, sig).map_err(|e| Error::os("kill", e))?;
    debug!(?sig, %group, job_id = job.id, "relayed signal");
    Ok(Some(group))
}

/// What the signal thread does after handling one signal.
#[derive(Debug, Eq, PartialEq)]
pub enum Dispatch {
    Continue,
    Quit,
}

/// Handles one signal delivered to the shell.
pub fn dispatch(jobs: &Jobs, sig: i32) -> Result<Dispatch> {
    match sig {
        SIGCHLD => {
            for event in reaper::reap(jobs, &mut AnyChild)? {
                if let Some(message) = event.message() {
                    println!("{message}");
                }
            }
        }
        SIGINT => {
            relay(jobs, Signal::SIGINT)?;
        }
        SIGTSTP => {
            relay(jobs, Signal::SIGTSTP)?;
        }
        SIGQUIT => {
            println!("Terminating after receipt of SIGQUIT signal");
            return Ok(Dispatch::Quit);
        }
        other => debug!(sig = other, "unexpected signal"),
    }
    Ok(Dispatch::Continue)
}

/// The running signal thread.
pub struct SignalThread {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl SignalThread {
    /// Ignores the terminal background read/write signals and starts
    /// receiving SIGCHLD, SIGINT, SIGTSTP and SIGQUIT on a new thread.
    pub fn spawn(jobs: Jobs) -> Result<Self> {
        ignore_terminal_signals()?;
        let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTSTP, SIGQUIT])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                for sig in signals.forever() {
                    match dispatch(&jobs, sig) {
                        Ok(Dispatch::Continue) => {}
                        Ok(Dispatch::Quit) => std::process::exit(1),
                        Err(e) => {
                            error!(error = %e, sig, "signal handling failed");
                            println!("{e}");
                            std::process::exit(1);
                        }
                    }
                }
            })?;
        Ok(Self { handle, thread })
    }

    pub fn shutdown(self) {
        self.handle.close();
        if self.thread.join().is_err() {
            error!("signal thread panicked");
        }
    }
}

fn ignore_terminal_signals() -> Result<()> {
    for sig in [Signal::SIGTTIN, Signal::SIGTTOU] {
        // SAFETY: SIG_IGN installs no handler code.
        unsafe { signal(sig, SigHandler::SigIgn) }.map_err(|e| Error::os("signal", e))?;
    }
    Ok(())
}
