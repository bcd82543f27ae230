use std::io::{self, BufRead, Write};

use tracing::error;

use crate::builtins::{try_builtin, BuiltinResult};
use crate::error::Result;
use crate::executor::{self, Launched};
use crate::job::Jobs;
use crate::parser::parse_line;

/// Whether the read-eval loop keeps going.
#[derive(Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell {
    jobs: Jobs,
    prompt: Option<&'static str>,
}

impl Shell {
    pub fn new(jobs: Jobs, prompt: Option<&'static str>) -> Self {
        Self { jobs, prompt }
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    /// Reads and evaluates lines until `quit` or end of input.
    ///
    /// Returns the first fatal error; recoverable errors are printed and the
    /// loop continues.
    pub fn run(&mut self, mut input: impl BufRead) -> Result<()> {
        let mut buf = Vec::new();
        loop {
            self.show_prompt()?;
            buf.clear();
            if input.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            // Bytes that are not UTF-8 become U+FFFD instead of ending the shell.
            let line = String::from_utf8_lossy(&buf);
            if self.eval(&line)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    /// Evaluates one command line.
    pub fn eval(&mut self, line: &str) -> Result<Flow> {
        match self.dispatch(line) {
            Err(e) if !e.is_fatal() => {
                println!("{e}");
                Ok(Flow::Continue)
            }
            Err(e) => {
                error!(error = %e, line, "fatal error");
                Err(e)
            }
            flow => flow,
        }
    }

    fn dispatch(&mut self, line: &str) -> Result<Flow> {
        let cmd = parse_line(line);
        if cmd.argv.is_empty() {
            return Ok(Flow::Continue);
        }
        match try_builtin(&cmd.argv, &self.jobs)? {
            BuiltinResult::Exit => return Ok(Flow::Exit),
            BuiltinResult::Handled => return Ok(Flow::Continue),
            BuiltinResult::NotHandled => {}
        }
        let cmdline = line.trim_end_matches(['\n', '\r']);
        if let Launched::Background(job) = executor::launch(&self.jobs, &cmd, cmdline)? {
            println!("{}", job.notice());
        }
        Ok(Flow::Continue)
    }

    fn show_prompt(&self) -> Result<()> {
        if let Some(prompt) = self.prompt {
            let mut out = io::stdout().lock();
            out.write_all(prompt.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }
}
