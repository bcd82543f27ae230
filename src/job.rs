use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use nix::unistd::Pid;
use tracing::debug;

use crate::error::{Error, Result};

pub type JobId = u32;

/// Default number of job slots.
pub const MAX_JOBS: usize = 16;
/// Job ids wrap back to 1 after this value.
pub const MAX_JOB_ID: JobId = 1 << 16;

/// Job states and the transitions between them:
///
/// ```text
/// Foreground -> Stopped    : ctrl-z
/// Stopped    -> Foreground : fg
/// Stopped    -> Background : bg
/// Background -> Foreground : fg
/// ```
///
/// At most one job is in the `Foreground` state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum JobState {
    #[default]
    Undefined,
    Foreground,
    Background,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Undefined => "Undefined",
            JobState::Foreground => "Foreground",
            JobState::Background => "Running",
            JobState::Stopped => "Stopped",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub pid: Pid,
    /// Every control signal for the job goes to this group.
    pub process_group: Pid,
    pub state: JobState,
    pub cmdline: String,
}

impl Job {
    /// `[job_id] (pid) cmdline`, printed when a job moves to the background.
    pub fn notice(&self) -> String {
        format!("[{}] ({}) {}", self.id, self.pid, self.cmdline)
    }
}

/// `jobs` listing line: `[job_id] (pid) State cmdline`.
impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ({}) {} {}", self.id, self.pid, self.state, self.cmdline)
    }
}

/// Fixed-capacity registry of live jobs.
///
/// Slots are scanned linearly. Listing order is slot order, so a job inserted
/// after a removal can appear ahead of jobs with smaller ids.
#[derive(Debug)]
pub struct JobTable {
    slots: Vec<Option<Job>>,
    next_id: JobId, // recomputed from the largest live id on every removal
}

impl JobTable {
    pub fn new(capacity: usize) -> Self {
        Self { slots: vec![None; capacity], next_id: 1 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.jobs().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Registers a job in the first free slot and returns its job id.
    pub fn insert(&mut self, pid: Pid, state: JobState, cmdline: &str) -> Result<JobId> {
        self.insert_job(pid, state, cmdline).map(|job| job.id)
    }

    /// Like [`JobTable::insert`], returning the new entry.
    pub fn insert_job(&mut self, pid: Pid, state: JobState, cmdline: &str) -> Result<&Job> {
        if state == JobState::Foreground {
            if let Some(holder) = self.foreground_pid() {
                return Err(Error::ForegroundTaken { pid: holder });
            }
        }
        let max = self.slots.len();
        let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) else {
            return Err(Error::Capacity { max });
        };
        let id = self.next_id;
        self.next_id = following(id);
        debug!(job_id = id, %pid, ?state, cmdline, "added job");
        Ok(&*slot.insert(Job {
            id,
            pid,
            process_group: pid,
            state,
            cmdline: cmdline.to_string(),
        }))
    }

    /// Clears the slot holding `pid`. Returns false if no job has that pid.
    pub fn remove(&mut self, pid: Pid) -> bool {
        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|j| j.pid == pid))
        else {
            return false;
        };
        if let Some(job) = slot.take() {
            debug!(job_id = job.id, %pid, "deleted job");
        }
        self.next_id = following(self.max_job_id());
        true
    }

    pub fn find_by_pid(&self, pid: Pid) -> Option<&Job> {
        self.jobs().find(|j| j.pid == pid)
    }

    pub fn find_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Job> {
        self.slots.iter_mut().flatten().find(|j| j.pid == pid)
    }

    pub fn find_by_job_id(&self, id: JobId) -> Option<&Job> {
        self.jobs().find(|j| j.id == id)
    }

    pub fn find_by_job_id_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.slots.iter_mut().flatten().find(|j| j.id == id)
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.jobs().find(|j| j.state == JobState::Foreground)
    }

    pub fn foreground_pid(&self) -> Option<Pid> {
        self.foreground().map(|j| j.pid)
    }

    pub fn pid_for_job_id(&self, id: JobId) -> Option<Pid> {
        self.find_by_job_id(id).map(|j| j.pid)
    }

    pub fn job_id_for_pid(&self, pid: Pid) -> Option<JobId> {
        self.find_by_pid(pid).map(|j| j.id)
    }

    pub fn max_job_id(&self) -> JobId {
        self.jobs().map(|j| j.id).max().unwrap_or(0)
    }

    /// Snapshot of every live job in slot order.
    pub fn list(&self) -> Vec<Job> {
        self.jobs().cloned().collect()
    }

    fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }
}

/// The id handed out after `id`, wrapping back to 1 past [`MAX_JOB_ID`].
fn following(id: JobId) -> JobId {
    if id >= MAX_JOB_ID {
        1
    } else {
        id + 1
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new(MAX_JOBS)
    }
}

/// Shared handle to the job table.
///
/// Cloned into the signal thread. Whoever changes a job's state calls
/// [`Jobs::notify`] so the foreground waiter re-checks its predicate.
#[derive(Clone, Debug)]
pub struct Jobs {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    table: Mutex<JobTable>,
    changed: Condvar,
}

impl Jobs {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Shared {
                table: Mutex::new(JobTable::new(capacity)),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, JobTable> {
        self.inner.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        self.inner.changed.notify_all();
    }

    /// Blocks until no job is in the foreground.
    ///
    /// The foreground job can leave that state by exiting, by being stopped,
    /// or by being moved to the background. The table lock is released while
    /// blocked.
    pub fn wait_for_foreground_clear(&self) {
        let table = self.lock();
        let _table = self
            .inner
            .changed
            .wait_while(table, |t| t.foreground_pid().is_some())
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn list(&self) -> Vec<Job> {
        self.lock().list()
    }
}

impl Default for Jobs {
    fn default() -> Self {
        Self::new(MAX_JOBS)
    }
}
