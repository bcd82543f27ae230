use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobState, JobTable, Jobs};
use crate::signals::CriticalSection;

/// Commands the shell runs itself instead of forking.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Builtin {
    Quit,
    Fg,
    Bg,
    Jobs,
}

impl Builtin {
    pub fn classify(word: &str) -> Option<Self> {
        match word {
            "quit" | "exit" => Some(Builtin::Quit),
            "fg" => Some(Builtin::Fg),
            "bg" => Some(Builtin::Bg),
            "jobs" => Some(Builtin::Jobs),
            _ => None,
        }
    }
}

pub enum BuiltinResult {
    Handled,
    NotHandled,
    Exit,
}

/// Runs `argv` if it names a built-in command.
pub fn try_builtin(argv: &[String], jobs: &Jobs) -> Result<BuiltinResult> {
    let Some(builtin) = argv.first().and_then(|w| Builtin::classify(w)) else {
        return Ok(BuiltinResult::NotHandled);
    };
    match builtin {
        Builtin::Quit => return Ok(BuiltinResult::Exit),
        Builtin::Fg => fg(jobs, argv)?,
        Builtin::Bg => println!("{}", bg(jobs, argv)?.notice()),
        Builtin::Jobs => {
            for job in list_jobs(jobs) {
                println!("{job}");
            }
        }
    }
    Ok(BuiltinResult::Handled)
}

/// Bad or unresolvable `fg`/`bg` arguments. The messages are shown verbatim.
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum JobControlError {
    #[error("{0} command requires PID or %jobid argument")]
    MissingArgument(&'static str),

    #[error("{0}: argument must be a PID or %jobid")]
    InvalidArgument(&'static str),

    #[error("%{0}: No such job")]
    NoSuchJob(String),

    #[error("({0}): No such process")]
    NoSuchProcess(Pid),
}

/// A job named on the command line, as `%<job id>` or a bare pid.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobRef {
    Job(JobId),
    Process(Pid),
}

impl JobRef {
    pub fn parse(
        command: &'static str,
        arg: Option<&str>,
    ) -> std::result::Result<Self, JobControlError> {
        let arg = arg.ok_or(JobControlError::MissingArgument(command))?;
        if let Some(id) = arg.strip_prefix('%') {
            return id
                .parse()
                .map(JobRef::Job)
                .map_err(|_| JobControlError::NoSuchJob(id.to_string()));
        }
        if arg.chars().take(2).any(|c| c.is_ascii_alphabetic()) {
            return Err(JobControlError::InvalidArgument(command));
        }
        Ok(JobRef::Process(Pid::from_raw(leading_int(arg))))
    }

    fn resolve(self, table: &mut JobTable) -> std::result::Result<&mut Job, JobControlError> {
        match self {
            JobRef::Job(id) => table
                .find_by_job_id_mut(id)
                .ok_or_else(|| JobControlError::NoSuchJob(id.to_string())),
            JobRef::Process(pid) => table
                .find_by_pid_mut(pid)
                .ok_or(JobControlError::NoSuchProcess(pid)),
        }
    }
}

/// The integer at the start of `s` in the manner of C `atoi`: leading
/// whitespace, an optional sign, then digits up to the first non-digit. No
/// digits gives 0, and out-of-range values saturate.
fn leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |n, d| (n * 10 + i64::from(d - b'0')).min(i64::from(i32::MAX) + 1));
    let value = if negative { -magnitude } else { magnitude };
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// `fg <job>`: continues the job as the foreground job and waits for it.
pub fn fg(jobs: &Jobs, argv: &[String]) -> Result<()> {
    continue_as(jobs, "fg", argv, JobState::Foreground)?;
    jobs.wait_for_foreground_clear();
    Ok(())
}

/// `bg <job>`: continues a stopped job in the background.
pub fn bg(jobs: &Jobs, argv: &[String]) -> Result<Job> {
    let job = continue_as(jobs, "bg", argv, JobState::Background)?;
    jobs.notify();
    Ok(job)
}

/// Jobs in table order.
pub fn list_jobs(jobs: &Jobs) -> Vec<Job> {
    jobs.list()
}

fn continue_as(jobs: &Jobs, command: &'static str, argv: &[String], state: JobState) -> Result<Job> {
    let target = JobRef::parse(command, argv.get(1).map(String::as_str))?;

    let mut section = CriticalSection::enter(jobs)?;
    let holder = section.foreground_pid();
    let job = target.resolve(&mut section)?;
    if let Some(holder) = holder.filter(|&h| state == JobState::Foreground && h != job.pid) {
        return Err(Error::ForegroundTaken { pid: holder });
    }
    debug!(job_id = job.id, from = ?job.state, to = ?state, "job control");
    job.state = state;
    killpg(job.process_group, Signal::SIGCONT).map_err(|e| Error::os("kill", e))?;
    let job = job.clone();
    section.leave()?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor;
    use crate::parser::parse_line;
    use crate::reaper::{self, AnyChild};
    use serial_test::serial;
    use std::thread;
    use std::time::{Duration, Instant};

    fn args(line: &str) -> Vec<String> {
        parse_line(line).argv
    }

    fn reap_until(jobs: &Jobs, done: impl Fn(&JobTable) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&*jobs.lock()) {
            assert!(Instant::now() < deadline, "timed out reaping");
            reaper::reap(jobs, &mut AnyChild).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn job_control_error(result: Result<impl std::fmt::Debug>) -> JobControlError {
        match result {
            Err(Error::JobControl(e)) => e,
            other => panic!("expected a job control error, got {other:?}"),
        }
    }

    #[test]
    fn classifies_builtins() {
        assert_eq!(Builtin::classify("quit"), Some(Builtin::Quit));
        assert_eq!(Builtin::classify("exit"), Some(Builtin::Quit));
        assert_eq!(Builtin::classify("fg"), Some(Builtin::Fg));
        assert_eq!(Builtin::classify("bg"), Some(Builtin::Bg));
        assert_eq!(Builtin::classify("jobs"), Some(Builtin::Jobs));
        assert_eq!(Builtin::classify("/bin/ls"), None);
    }

    #[test]
    fn parses_job_references() {
        assert_eq!(JobRef::parse("fg", Some("%2")), Ok(JobRef::Job(2)));
        assert_eq!(JobRef::parse("bg", Some("1234")), Ok(JobRef::Process(Pid::from_raw(1234))));
        assert_eq!(
            JobRef::parse("fg", None),
            Err(JobControlError::MissingArgument("fg"))
        );
        assert_eq!(
            JobRef::parse("bg", Some("abc")),
            Err(JobControlError::InvalidArgument("bg"))
        );
        assert_eq!(
            JobRef::parse("fg", Some("%x")),
            Err(JobControlError::NoSuchJob("x".into()))
        );
    }

    #[test]
    fn pid_arguments_take_the_leading_number() {
        assert_eq!(JobRef::parse("fg", Some("12abc")), Ok(JobRef::Process(Pid::from_raw(12))));
        assert_eq!(JobRef::parse("bg", Some("7.5")), Ok(JobRef::Process(Pid::from_raw(7))));
        assert_eq!(JobRef::parse("fg", Some("-")), Ok(JobRef::Process(Pid::from_raw(0))));
        assert_eq!(
            JobRef::parse("fg", Some("1a")),
            Err(JobControlError::InvalidArgument("fg"))
        );
        assert_eq!(
            JobRef::parse("bg", Some("x1")),
            Err(JobControlError::InvalidArgument("bg"))
        );
        assert_eq!(leading_int("99999999999"), i32::MAX);
        assert_eq!(leading_int("-42x"), -42);
    }

    #[test]
    fn trailing_garbage_reports_the_parsed_pid() {
        let jobs = Jobs::default();
        assert_eq!(
            job_control_error(fg(&jobs, &args("fg 12abc"))),
            JobControlError::NoSuchProcess(Pid::from_raw(12))
        );
        assert_eq!(
            JobControlError::NoSuchProcess(Pid::from_raw(12)).to_string(),
            "(12): No such process"
        );
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            JobControlError::MissingArgument("fg").to_string(),
            "fg command requires PID or %jobid argument"
        );
        assert_eq!(
            JobControlError::InvalidArgument("bg").to_string(),
            "bg: argument must be a PID or %jobid"
        );
        assert_eq!(JobControlError::NoSuchJob("5".into()).to_string(), "%5: No such job");
        assert_eq!(
            JobControlError::NoSuchProcess(Pid::from_raw(999)).to_string(),
            "(999): No such process"
        );
    }

    #[test]
    fn unknown_targets_change_nothing() {
        let jobs = Jobs::default();
        jobs.lock()
            .insert(Pid::from_raw(500), JobState::Stopped, "sleep 100")
            .unwrap();
        let before = jobs.list();

        assert_eq!(
            job_control_error(fg(&jobs, &args("fg"))),
            JobControlError::MissingArgument("fg")
        );
        assert_eq!(
            job_control_error(bg(&jobs, &args("bg %7"))),
            JobControlError::NoSuchJob("7".into())
        );
        assert_eq!(
            job_control_error(fg(&jobs, &args("fg 501"))),
            JobControlError::NoSuchProcess(Pid::from_raw(501))
        );
        assert_eq!(jobs.list(), before);
    }

    #[test]
    fn try_builtin_dispatch() {
        let jobs = Jobs::default();
        assert!(matches!(try_builtin(&args("quit"), &jobs), Ok(BuiltinResult::Exit)));
        assert!(matches!(try_builtin(&args("jobs"), &jobs), Ok(BuiltinResult::Handled)));
        assert!(matches!(try_builtin(&args("sleep 1"), &jobs), Ok(BuiltinResult::NotHandled)));
        assert!(matches!(try_builtin(&[], &jobs), Ok(BuiltinResult::NotHandled)));
        assert!(try_builtin(&args("bg"), &jobs).is_err());
    }

    #[test]
    #[serial]
    fn bg_resumes_a_stopped_job() {
        let jobs = Jobs::default();
        let job = executor::spawn(&jobs, &parse_line("sleep 30 &"), "sleep 30 &").unwrap();
        killpg(job.process_group, Signal::SIGSTOP).unwrap();
        reap_until(&jobs, |t| t.find_by_pid(job.pid).unwrap().state == JobState::Stopped);

        let resumed = bg(&jobs, &args("bg %1")).unwrap();
        assert_eq!(resumed.notice(), format!("[1] ({}) sleep 30 &", job.pid));
        assert_eq!(jobs.lock().find_by_job_id(1).unwrap().state, JobState::Background);

        killpg(job.process_group, Signal::SIGKILL).unwrap();
        reap_until(&jobs, JobTable::is_empty);
    }

    #[test]
    #[serial]
    fn fg_waits_for_a_resumed_job() {
        let jobs = Jobs::default();
        let job = executor::spawn(&jobs, &parse_line("sleep 0.2 &"), "sleep 0.2 &").unwrap();
        killpg(job.process_group, Signal::SIGSTOP).unwrap();
        reap_until(&jobs, |t| t.find_by_pid(job.pid).unwrap().state == JobState::Stopped);

        let reaping = jobs.clone();
        let reaper = thread::spawn(move || reap_until(&reaping, JobTable::is_empty));

        fg(&jobs, &args(&format!("fg {}", job.pid))).unwrap();
        assert_eq!(jobs.lock().foreground_pid(), None);
        reaper.join().unwrap();
    }

    #[test]
    fn fg_is_refused_while_another_job_holds_the_foreground() {
        let jobs = Jobs::default();
        let holder = Pid::from_raw(600);
        jobs.lock().insert(holder, JobState::Foreground, "sleep 100").unwrap();
        jobs.lock().insert(Pid::from_raw(601), JobState::Stopped, "sleep 200").unwrap();

        let err = continue_as(&jobs, "fg", &args("fg %2"), JobState::Foreground).unwrap_err();
        assert!(matches!(err, Error::ForegroundTaken { pid } if pid == holder));
        assert_eq!(jobs.lock().find_by_job_id(2).unwrap().state, JobState::Stopped);
    }

    #[test]
    #[serial]
    fn at_most_one_foreground_job_while_jobs_change_hands() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let jobs = Jobs::default();
        let stop = Arc::new(AtomicBool::new(false));
        let sampler = {
            let (jobs, stop) = (jobs.clone(), Arc::clone(&stop));
            thread::spawn(move || {
                let mut most = 0;
                while !stop.load(Ordering::Relaxed) {
                    let count = jobs
                        .list()
                        .iter()
                        .filter(|j| j.state == JobState::Foreground)
                        .count();
                    most = most.max(count);
                    thread::yield_now();
                }
                most
            })
        };

        let background = executor::spawn(&jobs, &parse_line("sleep 0.3 &"), "sleep 0.3 &").unwrap();
        killpg(background.process_group, Signal::SIGSTOP).unwrap();
        reap_until(&jobs, |t| t.find_by_pid(background.pid).unwrap().state == JobState::Stopped);

        let reaping = jobs.clone();
        let reaper = thread::spawn(move || reap_until(&reaping, JobTable::is_empty));
        executor::launch(&jobs, &parse_line("sleep 0.1"), "sleep 0.1").unwrap();
        fg(&jobs, &args("fg %1")).unwrap();
        reaper.join().unwrap();

        stop.store(true, Ordering::Relaxed);
        assert!(sampler.join().unwrap() <= 1);
    }
}
