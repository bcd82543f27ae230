use std::ffi::CString;
use std::ptr;

use libc::c_char;
use nix::errno::Errno;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{fork, setpgid, ForkResult, Pid};
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{Job, JobState, Jobs};
use crate::parser::{resolve_path, CommandLine};
use crate::signals::{child_signal_mask, CriticalSection};

/// Exit status of a child whose program could not be executed.
pub const EXIT_NOT_FOUND: i32 = 127;

/// How a launch ended for the caller.
#[derive(Debug)]
pub enum Launched {
    /// The job ran in the foreground and has since exited or stopped.
    Foreground,
    /// The job runs in the background. Holds its table entry at launch time.
    Background(Job),
}

/// Starts `cmd` as a new job and, for foreground jobs, waits until it no
/// longer holds the foreground.
pub fn launch(jobs: &Jobs, cmd: &CommandLine, cmdline: &str) -> Result<Launched> {
    let job = spawn(jobs, cmd, cmdline)?;
    if cmd.background {
        Ok(Launched::Background(job))
    } else {
        jobs.wait_for_foreground_clear();
        Ok(Launched::Foreground)
    }
}

/// Forks `cmd` into its own process group and registers it.
///
/// SIGCHLD stays blocked and the table stays locked from before the fork
/// until the job is in the table, so a child is never reaped before it has
/// been registered. A full table, or a foreground launch while another job
/// holds the foreground, is refused before anything is forked.
pub fn spawn(jobs: &Jobs, cmd: &CommandLine, cmdline: &str) -> Result<Job> {
    let image = ExecImage::prepare(&cmd.argv)?;
    let state = if cmd.background { JobState::Background } else { JobState::Foreground };

    let mut section = CriticalSection::enter(jobs)?;
    if section.is_full() {
        return Err(Error::Capacity { max: section.capacity() });
    }
    if state == JobState::Foreground {
        if let Some(holder) = section.foreground_pid() {
            return Err(Error::ForegroundTaken { pid: holder });
        }
    }

    // SAFETY: the child only makes async-signal-safe calls before exec or _exit.
    let pid = match unsafe { fork() }.map_err(|e| Error::os("fork", e))? {
        ForkResult::Child => image.exec(),
        ForkResult::Parent { child } => child,
    };

    // The child does this too; whichever runs first wins. Doing it here as
    // well means the group exists before any signal is relayed to it.
    match setpgid(pid, pid) {
        Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
        Err(e) => return Err(Error::os("setpgid", e)),
    }

    let job = section.insert_job(pid, state, cmdline)?.clone();
    section.leave()?;
    debug!(job_id = job.id, %pid, program = %image.program_name(), "launched");
    Ok(job)
}

/// Everything the child needs, built before forking so the child never
/// allocates.
struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    not_found: Vec<u8>,
}

impl ExecImage {
    fn prepare(argv: &[String]) -> Result<Self> {
        let program = argv.first().map(String::as_str).unwrap_or_default();
        let argv = argv
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(ptr::null());
        Ok(Self {
            program: CString::new(resolve_path(program))?,
            argv,
            argv_ptrs,
            not_found: format!("{program}: Command not found\n").into_bytes(),
        })
    }

    fn program_name(&self) -> String {
        self.argv
            .first()
            .map(|a| a.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Runs in the forked child.
    fn exec(&self) -> ! {
        let _ = child_signal_mask().thread_unblock();
        if setpgid(Pid::from_raw(0), Pid::from_raw(0)).is_err() {
            write_stdout(b"setpgid error\n");
            // SAFETY: terminating the child without running parent destructors.
            unsafe { libc::_exit(1) };
        }
        for sig in [Signal::SIGTTIN, Signal::SIGTTOU, Signal::SIGPIPE] {
            // SAFETY: restoring the default disposition installs no handler.
            let _ = unsafe { signal(sig, SigHandler::SigDfl) };
        }
        // SAFETY: both pointers come from CStrings owned by `self`, and the
        // argument vector is null-terminated.
        unsafe { libc::execv(self.program.as_ptr(), self.argv_ptrs.as_ptr()) };
        write_stdout(&self.not_found);
        unsafe { libc::_exit(EXIT_NOT_FOUND) }
    }
}

fn write_stdout(bytes: &[u8]) {
    // SAFETY: plain write(2) on a borrowed buffer.
    unsafe { libc::write(libc::STDOUT_FILENO, bytes.as_ptr().cast(), bytes.len()) };
}
