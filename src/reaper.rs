//! Child state-change reaping.
//!
//! [`reap`] drains every pending state change and applies it to the job
//! table. It never waits for a particular child, only for whatever is
//! available right now, so it returns promptly even while jobs keep running.

use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::job::{JobId, JobState, Jobs};

/// Where pending child state changes come from.
pub trait ChildStatusSource {
    /// Next pending state change, or `None` once nothing is pending.
    fn poll_change(&mut self) -> Result<Option<WaitStatus>>;
}

/// Non-blocking `waitpid` on any child, reporting exits, kills and stops.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyChild;

impl ChildStatusSource for AnyChild {
    fn poll_change(&mut self) -> Result<Option<WaitStatus>> {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
        loop {
            match waitpid(None, Some(flags)) {
                Err(Errno::EINTR) => continue,
                // ECHILD: no children left at all
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return Ok(None),
                Ok(status) => return Ok(Some(status)),
                Err(e) => return Err(Error::os("waitpid", e)),
            }
        }
    }
}

/// One state change applied to the job table.
///
/// `job_id` is looked up for the pid of this very change, and is `None` for
/// children that were never registered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReapEvent {
    Exited { job_id: Option<JobId>, pid: Pid, code: i32 },
    Signaled { job_id: Option<JobId>, pid: Pid, signal: Signal },
    Stopped { job_id: Option<JobId>, pid: Pid, signal: Signal },
}

impl ReapEvent {
    /// The line reported to the user, if this change is reported at all.
    pub fn message(&self) -> Option<String> {
        match self {
            ReapEvent::Exited { .. } => None,
            _ => Some(self.to_string()),
        }
    }
}

impl fmt::Display for ReapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (job_id, pid, what, sig) = match self {
            ReapEvent::Exited { job_id, pid, code } => {
                let id = job_id.unwrap_or(0);
                return write!(f, "Job [{id}] ({pid}) exited with status {code}");
            }
            ReapEvent::Signaled { job_id, pid, signal } => (job_id, pid, "terminated", signal),
            ReapEvent::Stopped { job_id, pid, signal } => (job_id, pid, "stopped", signal),
        };
        write!(f, "Job [{}] ({pid}) {what} by signal {}", job_id.unwrap_or(0), *sig as i32)
    }
}

/// Applies every pending child state change to the job table.
///
/// Exited and killed children are removed. Stopped children stay in the
/// table in the `Stopped` state. Waiters are notified once the table has been
/// updated.
pub fn reap(jobs: &Jobs, source: &mut impl ChildStatusSource) -> Result<Vec<ReapEvent>> {
    let mut events = Vec::new();
    {
        let mut table = jobs.lock();
        while let Some(status) = source.poll_change()? {
            let event = match status {
                WaitStatus::Exited(pid, code) => {
                    let job_id = table.job_id_for_pid(pid);
                    table.remove(pid);
                    ReapEvent::Exited { job_id, pid, code }
                }
                WaitStatus::Signaled(pid, signal, _) => {
                    let job_id = table.job_id_for_pid(pid);
                    table.remove(pid);
                    ReapEvent::Signaled { job_id, pid, signal }
                }
                WaitStatus::Stopped(pid, signal) => {
                    let job = table.find_by_pid_mut(pid);
                    let job_id = job.map(|job| {
                        job.state = JobState::Stopped;
                        job.id
                    });
                    ReapEvent::Stopped { job_id, pid, signal }
                }
                other => {
                    warn!(status = ?other, "ignoring unexpected wait status");
                    continue;
                }
            };
            if event_job_id(&event).is_none() {
                warn!(%event, "state change for an unregistered child");
            } else {
                debug!(%event, "reaped");
            }
            events.push(event);
        }
    }
    if !events.is_empty() {
        jobs.notify();
    }
    Ok(events)
}

fn event_job_id(event: &ReapEvent) -> Option<JobId> {
    match event {
        ReapEvent::Exited { job_id, .. }
        | ReapEvent::Signaled { job_id, .. }
        | ReapEvent::Stopped { job_id, .. } => *job_id,
    }
}
